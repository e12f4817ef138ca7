//! Tests for the metric registry and Prometheus rendering

use crate::Registry;

#[test]
fn test_counter_accumulates() {
    let registry = Registry::new();
    let counter = registry.counter("requests_total", &["listener"]);

    counter.increase(&["8080"], 1.0);
    counter.increase(&["8080"], 2.0);
    counter.increase(&["9090"], 5.0);

    assert_eq!(counter.value(&["8080"]), 3.0);
    assert_eq!(counter.value(&["9090"]), 5.0);
    assert_eq!(counter.value(&["unknown"]), 0.0);
}

#[test]
fn test_gauge_set_and_add() {
    let registry = Registry::new();
    let gauge = registry.gauge("connections", &[]);

    gauge.set(&[], 10.0);
    gauge.add(&[], -3.0);
    assert_eq!(gauge.value(&[]), 7.0);
}

#[test]
fn test_render_counter_lines() {
    let registry = Registry::new();
    let counter = registry.counter("requests_total", &["listener", "result"]);
    counter.increase(&["8080", "ok"], 12.0);

    let text = registry.render();
    assert_eq!(
        text,
        "requests_total{listener=\"8080\",result=\"ok\"} 12\n"
    );
}

#[test]
fn test_render_unlabeled_metric() {
    let registry = Registry::new();
    let gauge = registry.gauge("uptime_seconds", &[]);
    gauge.set(&[], 42.5);

    assert_eq!(registry.render(), "uptime_seconds 42.5\n");
}

#[test]
fn test_histogram_buckets_are_cumulative() {
    let registry = Registry::new();
    let histogram = registry.histogram("latency", &[], vec![1.0, 5.0, 10.0]);

    histogram.observe(&[], 0.5);
    histogram.observe(&[], 0.75);
    histogram.observe(&[], 3.0);
    histogram.observe(&[], 20.0);

    let text = registry.render();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "latency{le=\"1\"} 2",
            "latency{le=\"5\"} 3",
            "latency{le=\"10\"} 3",
            "latency{le=\"+Inf\"} 4",
            "latency_count 4",
            "latency_sum 24.25",
        ]
    );
    assert_eq!(histogram.count(&[]), 4);
}

#[test]
fn test_histogram_positional_labels() {
    let registry = Registry::new();
    let histogram = registry.histogram("rtt", &["backend"], vec![1.0]);
    histogram.observe(&["a"], 0.5);

    let text = registry.render();
    assert!(text.contains("rtt{backend=\"a\",le=\"1\"} 1"));
    assert!(text.contains("rtt_count{backend=\"a\"} 1"));
    assert!(text.contains("rtt_sum{backend=\"a\"} 0.5"));
}

#[test]
fn test_counter_with_labels_child_addresses_one_series() {
    let registry = Registry::new();
    let counter = registry.counter("requests_total", &["listener"]);

    // The child is a persistent handle over one fixed label tuple
    let child = counter.with_labels(&["8080"]);
    child.increase(&[], 1.0);
    child.increase(&[], 2.0);

    // Child and parent address the same series
    assert_eq!(child.value(&[]), 3.0);
    assert_eq!(counter.value(&["8080"]), 3.0);
    assert_eq!(counter.value(&["9090"]), 0.0);

    // And the parent still works positionally on the same storage
    counter.increase(&["8080"], 1.0);
    assert_eq!(child.value(&[]), 4.0);

    assert_eq!(
        registry.render(),
        "requests_total{listener=\"8080\"} 4\n"
    );
}

#[test]
fn test_gauge_with_labels_child() {
    let registry = Registry::new();
    let gauge = registry.gauge("connections", &["listener"]);

    let child = gauge.with_labels(&["8080"]);
    child.set(&[], 7.0);
    child.add(&[], -2.0);

    assert_eq!(gauge.value(&["8080"]), 5.0);
    assert_eq!(registry.render(), "connections{listener=\"8080\"} 5\n");
}

#[test]
fn test_with_labels_binds_incrementally() {
    let registry = Registry::new();
    let counter = registry.counter("bytes_total", &["listener", "direction"]);

    // Partial binding: children of children extend the label prefix
    let listener = counter.with_labels(&["8080"]);
    let inbound = listener.with_labels(&["in"]);
    let outbound = listener.with_labels(&["out"]);

    inbound.increase(&[], 10.0);
    outbound.increase(&[], 20.0);
    // The partially bound handle can still supply the rest per call
    listener.increase(&["in"], 5.0);

    assert_eq!(counter.value(&["8080", "in"]), 15.0);
    assert_eq!(counter.value(&["8080", "out"]), 20.0);

    let text = registry.render();
    assert!(text.contains("bytes_total{listener=\"8080\",direction=\"in\"} 15"));
    assert!(text.contains("bytes_total{listener=\"8080\",direction=\"out\"} 20"));
}

#[test]
fn test_histogram_with_labels_child() {
    let registry = Registry::new();
    let histogram = registry.histogram("rtt", &["backend"], vec![1.0]);

    let child = histogram.with_labels(&["a"]);
    child.observe(&[], 0.5);
    child.observe(&[], 2.0);

    assert_eq!(child.count(&[]), 2);
    assert_eq!(histogram.count(&["a"]), 2);

    let text = registry.render();
    assert!(text.contains("rtt{backend=\"a\",le=\"1\"} 1"));
    assert!(text.contains("rtt{backend=\"a\",le=\"+Inf\"} 2"));
    assert!(text.contains("rtt_count{backend=\"a\"} 2"));
    assert!(text.contains("rtt_sum{backend=\"a\"} 2.5"));
}

#[test]
fn test_multiple_metrics_render_in_registration_order() {
    let registry = Registry::new();
    let first = registry.counter("first", &[]);
    let second = registry.counter("second", &[]);
    first.increase(&[], 1.0);
    second.increase(&[], 1.0);

    let text = registry.render();
    let first_pos = text.find("first").unwrap();
    let second_pos = text.find("second").unwrap();
    assert!(first_pos < second_pos);
}

#[test]
fn test_empty_registry_renders_nothing() {
    let registry = Registry::new();
    assert!(registry.render().is_empty());
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}
