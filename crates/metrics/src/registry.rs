//! Metric registry
//!
//! Metrics are registered once (at worker bring-up or lazily by components)
//! and keep their series for the worker's lifetime. Rendering walks every
//! metric in registration order.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

/// Per-worker collection of metrics.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    metrics: RefCell<Vec<MetricEntry>>,
}

enum MetricEntry {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monotonically increasing counter.
    pub fn counter(&self, name: impl Into<String>, label_names: &[&str]) -> Counter {
        let counter = Counter {
            inner: Rc::new(SeriesMetric::new(name, label_names)),
            bound: Rc::new(Vec::new()),
        };
        self.inner
            .metrics
            .borrow_mut()
            .push(MetricEntry::Counter(counter.clone()));
        counter
    }

    /// Register a gauge.
    pub fn gauge(&self, name: impl Into<String>, label_names: &[&str]) -> Gauge {
        let gauge = Gauge {
            inner: Rc::new(SeriesMetric::new(name, label_names)),
            bound: Rc::new(Vec::new()),
        };
        self.inner
            .metrics
            .borrow_mut()
            .push(MetricEntry::Gauge(gauge.clone()));
        gauge
    }

    /// Register a histogram with the given bucket boundaries (ascending).
    pub fn histogram(
        &self,
        name: impl Into<String>,
        label_names: &[&str],
        buckets: Vec<f64>,
    ) -> Histogram {
        let histogram = Histogram {
            name: Rc::new(name.into()),
            label_names: Rc::new(label_names.iter().map(|s| s.to_string()).collect()),
            buckets: Rc::new(buckets),
            series: Rc::new(RefCell::new(BTreeMap::new())),
            bound: Rc::new(Vec::new()),
        };
        self.inner
            .metrics
            .borrow_mut()
            .push(MetricEntry::Histogram(histogram.clone()));
        histogram
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.inner.metrics.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.metrics.borrow().is_empty()
    }

    /// Render every metric in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.inner.metrics.borrow().iter() {
            match entry {
                MetricEntry::Counter(c) => c.inner.render(&mut out),
                MetricEntry::Gauge(g) => g.inner.render(&mut out),
                MetricEntry::Histogram(h) => h.render(&mut out),
            }
        }
        out
    }
}

/// Value series shared by counters and gauges.
struct SeriesMetric {
    name: String,
    label_names: Vec<String>,
    series: RefCell<BTreeMap<Vec<String>, f64>>,
}

impl SeriesMetric {
    fn new(name: impl Into<String>, label_names: &[&str]) -> Self {
        Self {
            name: name.into(),
            label_names: label_names.iter().map(|s| s.to_string()).collect(),
            series: RefCell::new(BTreeMap::new()),
        }
    }

    fn add(&self, key: Vec<String>, delta: f64) {
        let mut series = self.series.borrow_mut();
        *series.entry(key).or_insert(0.0) += delta;
    }

    fn set(&self, key: Vec<String>, value: f64) {
        self.series.borrow_mut().insert(key, value);
    }

    fn get(&self, key: &[String]) -> f64 {
        self.series.borrow().get(key).copied().unwrap_or(0.0)
    }

    fn render(&self, out: &mut String) {
        for (labels, value) in self.series.borrow().iter() {
            out.push_str(&self.name);
            write_labels(out, &self.label_names, labels, None);
            let _ = writeln!(out, " {}", format_value(*value));
        }
    }
}

/// A handle's bound label prefix plus per-call labels, as one series key.
fn compose(bound: &[String], labels: &[&str]) -> Vec<String> {
    bound
        .iter()
        .cloned()
        .chain(labels.iter().map(|s| s.to_string()))
        .collect()
}

/// Monotonically increasing value per label tuple.
///
/// `with_labels` produces a persistent child handle pre-bound to a label
/// prefix; per-call labels are appended after the bound ones.
#[derive(Clone)]
pub struct Counter {
    inner: Rc<SeriesMetric>,
    bound: Rc<Vec<String>>,
}

impl Counter {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A child handle bound to `labels` (appended to this handle's own
    /// binding). The child addresses one fixed sub-series.
    pub fn with_labels(&self, labels: &[&str]) -> Counter {
        Counter {
            inner: Rc::clone(&self.inner),
            bound: Rc::new(compose(&self.bound, labels)),
        }
    }

    pub fn increase(&self, labels: &[&str], delta: f64) {
        self.inner.add(compose(&self.bound, labels), delta);
    }

    pub fn value(&self, labels: &[&str]) -> f64 {
        self.inner.get(&compose(&self.bound, labels))
    }
}

/// Point-in-time value per label tuple.
///
/// `with_labels` produces a persistent child handle pre-bound to a label
/// prefix; per-call labels are appended after the bound ones.
#[derive(Clone)]
pub struct Gauge {
    inner: Rc<SeriesMetric>,
    bound: Rc<Vec<String>>,
}

impl Gauge {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A child handle bound to `labels` (appended to this handle's own
    /// binding). The child addresses one fixed sub-series.
    pub fn with_labels(&self, labels: &[&str]) -> Gauge {
        Gauge {
            inner: Rc::clone(&self.inner),
            bound: Rc::new(compose(&self.bound, labels)),
        }
    }

    pub fn set(&self, labels: &[&str], value: f64) {
        self.inner.set(compose(&self.bound, labels), value);
    }

    pub fn add(&self, labels: &[&str], delta: f64) {
        self.inner.add(compose(&self.bound, labels), delta);
    }

    pub fn value(&self, labels: &[&str]) -> f64 {
        self.inner.get(&compose(&self.bound, labels))
    }
}

struct HistogramSeries {
    /// Count per bucket boundary (non-cumulative; summed at render).
    counts: Vec<u64>,
    /// Observations above the last boundary.
    overflow: u64,
    sum: f64,
    total: u64,
}

/// Distribution with configurable bucket boundaries.
///
/// `with_labels` produces a persistent child handle pre-bound to a label
/// prefix; per-call labels are appended after the bound ones.
#[derive(Clone)]
pub struct Histogram {
    name: Rc<String>,
    label_names: Rc<Vec<String>>,
    buckets: Rc<Vec<f64>>,
    series: Rc<RefCell<BTreeMap<Vec<String>, HistogramSeries>>>,
    bound: Rc<Vec<String>>,
}

impl Histogram {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A child handle bound to `labels` (appended to this handle's own
    /// binding). The child addresses one fixed sub-series.
    pub fn with_labels(&self, labels: &[&str]) -> Histogram {
        Histogram {
            name: Rc::clone(&self.name),
            label_names: Rc::clone(&self.label_names),
            buckets: Rc::clone(&self.buckets),
            series: Rc::clone(&self.series),
            bound: Rc::new(compose(&self.bound, labels)),
        }
    }

    pub fn observe(&self, labels: &[&str], value: f64) {
        let key = compose(&self.bound, labels);
        let mut series = self.series.borrow_mut();
        let entry = series.entry(key).or_insert_with(|| HistogramSeries {
            counts: vec![0; self.buckets.len()],
            overflow: 0,
            sum: 0.0,
            total: 0,
        });
        match self.buckets.iter().position(|b| value <= *b) {
            Some(i) => entry.counts[i] += 1,
            None => entry.overflow += 1,
        }
        entry.sum += value;
        entry.total += 1;
    }

    pub fn count(&self, labels: &[&str]) -> u64 {
        let key = compose(&self.bound, labels);
        self.series
            .borrow()
            .get(&key)
            .map(|s| s.total)
            .unwrap_or(0)
    }

    fn render(&self, out: &mut String) {
        for (labels, series) in self.series.borrow().iter() {
            let mut cumulative = 0u64;
            for (boundary, count) in self.buckets.iter().zip(series.counts.iter()) {
                cumulative += count;
                out.push_str(&self.name);
                write_labels(
                    out,
                    &self.label_names,
                    labels,
                    Some(&format_value(*boundary)),
                );
                let _ = writeln!(out, " {cumulative}");
            }
            out.push_str(&self.name);
            write_labels(out, &self.label_names, labels, Some("+Inf"));
            let _ = writeln!(out, " {}", series.total);

            out.push_str(&self.name);
            out.push_str("_count");
            write_labels(out, &self.label_names, labels, None);
            let _ = writeln!(out, " {}", series.total);

            out.push_str(&self.name);
            out.push_str("_sum");
            write_labels(out, &self.label_names, labels, None);
            let _ = writeln!(out, " {}", format_value(series.sum));
        }
    }
}

/// Write `{l1="v1",l2="v2",le="b"}`, or nothing when there are no labels.
fn write_labels(out: &mut String, names: &[String], values: &[String], le: Option<&str>) {
    let mut first = true;
    for (name, value) in names.iter().zip(values.iter()) {
        out.push(if first { '{' } else { ',' });
        first = false;
        let _ = write!(out, "{name}=\"{value}\"");
    }
    if let Some(le) = le {
        out.push(if first { '{' } else { ',' });
        first = false;
        let _ = write!(out, "le=\"{le}\"");
    }
    if !first {
        out.push('}');
    }
}

/// Integral values render without a trailing `.0`.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
