//! Sluice - Metrics
//!
//! Per-worker metric registry with counters, gauges, and histograms,
//! exposable as Prometheus text.
//!
//! # Design
//!
//! - **Single-threaded**: each worker owns its registry; values live in
//!   plain cells behind `Rc` handles, no atomics needed.
//! - **Labeled series**: a metric is created with its label names; each
//!   distinct label-value tuple becomes one exposition series.
//! - **Child handles**: `with_labels(...)` returns a persistent handle
//!   pre-bound to a label tuple, so hot paths address their sub-series
//!   without rebuilding label sets.
//! - **Exposition**: `render()` produces
//!   `name{label="value"} value` lines; histogram buckets carry `le`
//!   labels plus `+Inf`, followed by `_count` and `_sum`.
//!
//! # Example
//!
//! ```
//! use sluice_metrics::Registry;
//!
//! let registry = Registry::new();
//! let served = registry.counter("sluice_requests_total", &["listener"]);
//! served.increase(&["8080"], 1.0);
//!
//! // Or bind the label tuple once and reuse the handle
//! let on_8080 = served.with_labels(&["8080"]);
//! on_8080.increase(&[], 1.0);
//!
//! let text = registry.render();
//! assert!(text.contains("sluice_requests_total{listener=\"8080\"} 2"));
//! ```

mod registry;
mod reporter;

pub use registry::{Counter, Gauge, Histogram, Registry};
pub use reporter::Reporter;
