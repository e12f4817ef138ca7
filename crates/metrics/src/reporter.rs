//! Periodic metrics reporter
//!
//! Logs a snapshot of the registry at a fixed interval through `tracing`.
//! The rendered text is also available on demand for scraping surfaces.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Registry;

/// Periodic reporter over one registry.
pub struct Reporter {
    registry: Registry,
    interval: Duration,
}

impl Reporter {
    pub fn new(registry: Registry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until cancelled, logging one snapshot per interval.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!(
            target: "metrics",
            interval_secs = self.interval.as_secs(),
            "metrics reporter starting"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    let text = self.registry.render();
                    tracing::info!(
                        target: "metrics",
                        metrics = self.registry.len(),
                        series_lines = text.lines().count(),
                        "metrics snapshot"
                    );
                    for line in text.lines() {
                        tracing::debug!(target: "metrics", "{line}");
                    }
                }
            }
        }
        tracing::debug!(target: "metrics", "metrics reporter stopped");
    }
}
