//! Scheduled tasks
//!
//! A task fires its pipeline on a fixed interval: each tick releases the
//! previous instance and starts a fresh one with a `StreamStart`. The
//! instance stays live until the next tick, so filters doing I/O get the
//! whole interval to finish.

use std::rc::Rc;
use std::time::Duration;

use sluice_event::Event;
use sluice_pipeline::{Context, Input, InputContext, Pipeline, PipelineLayout};
use tokio_util::sync::CancellationToken;

/// Interval-driven pipeline entry point.
pub struct Task;

impl Task {
    /// Spawn the scheduler on the current `LocalSet`.
    pub fn spawn(interval: Duration, layout: Rc<PipelineLayout>, cancel: CancellationToken) {
        tracing::info!(
            target: "task",
            pipeline = %layout.name(),
            interval_secs = interval.as_secs(),
            "task scheduled"
        );
        tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The interval's first tick fires immediately; schedule from
            // the next one
            ticker.tick().await;

            let mut current: Option<Pipeline> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Release the previous run before starting the next
                        current.take();
                        let pipeline = layout.alloc(Context::new(), Input::null());
                        tracing::debug!(
                            target: "task",
                            pipeline = %layout.name(),
                            id = pipeline.id(),
                            "task tick"
                        );
                        InputContext::run(|| pipeline.input(Event::StreamStart));
                        current = Some(pipeline);
                    }
                }
            }
            drop(current);
            tracing::debug!(target: "task", pipeline = %layout.name(), "task stopped");
        });
    }
}
