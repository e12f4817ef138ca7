//! Worker bring-up
//!
//! One worker = one current-thread event loop. `run_worker` binds the
//! module, starts every entry point, then waits for cancellation and drains
//! cooperatively: listeners stop accepting, filters get their shutdown
//! signal, session pools treat idle deadlines as expired.

use std::time::Duration;

use sluice_config::Config;
use sluice_metrics::{Registry, Reporter};
use sluice_net::{Listener, ListenerOptions};
use tokio_util::sync::CancellationToken;

use crate::bind::{bind_module, EngineError};
use crate::reader::Reader;
use crate::task::Task;

/// Run one worker until `cancel` fires.
///
/// Must be awaited from within a `LocalSet` on a current-thread runtime.
///
/// # Errors
///
/// Any bring-up failure (bad pipeline graph, bind failure, unreadable
/// reader file) aborts before any traffic is accepted.
pub async fn run_worker(config: Config, cancel: CancellationToken) -> Result<(), EngineError> {
    sluice_net::set_reuse_port(config.global.reuse_port);

    let module = bind_module(&config)?;
    tracing::info!(
        layouts = module.layouts().len(),
        listeners = config.listeners.len(),
        tasks = config.tasks.len(),
        readers = config.readers.len(),
        "worker starting"
    );

    let registry = Registry::new();
    let connections = registry.gauge("sluice_inbound_connections", &["listener"]);
    let peaks = registry.gauge("sluice_inbound_connections_peak", &["listener"]);

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for lc in &config.listeners {
        let layout =
            module
                .layout(&lc.pipeline)
                .ok_or_else(|| EngineError::MissingPipeline {
                    referenced_by: format!("listener {}:{}", lc.address, lc.port),
                    pipeline: lc.pipeline.clone(),
                })?;
        let options = ListenerOptions {
            max_connections: lc.max_connections,
            read_timeout: lc.read_timeout_secs.map(Duration::from_secs),
            write_timeout: lc.write_timeout_secs.map(Duration::from_secs),
            idle_timeout: lc.idle_timeout_secs.map(Duration::from_secs),
            transparent: lc.transparent,
            close_eof: lc.close_eof,
        };
        listeners.push(Listener::listen(&lc.address, lc.port, layout, options)?);
    }

    for tc in &config.tasks {
        let layout = module
            .layout(&tc.pipeline)
            .ok_or_else(|| EngineError::MissingPipeline {
                referenced_by: format!("task every {}s", tc.interval_secs),
                pipeline: tc.pipeline.clone(),
            })?;
        Task::spawn(
            Duration::from_secs(tc.interval_secs),
            layout,
            cancel.clone(),
        );
    }

    for rc in &config.readers {
        let layout = module
            .layout(&rc.pipeline)
            .ok_or_else(|| EngineError::MissingPipeline {
                referenced_by: format!("reader '{}'", rc.path),
                pipeline: rc.pipeline.clone(),
            })?;
        let chunk_size = rc.chunk_size.unwrap_or(config.global.chunk_size);
        let reader = Reader::open(rc.path.clone(), chunk_size, layout).await?;
        tokio::task::spawn_local(reader.run());
    }

    if config.metrics.enabled {
        let interval = Duration::from_secs(config.metrics.interval_secs.max(1));
        tokio::task::spawn_local(
            Reporter::new(registry.clone(), interval).run(cancel.clone()),
        );

        // Keep the connection gauges current alongside the reporter, with
        // one pre-bound child handle per listener
        let listener_stats: Vec<(Listener, sluice_metrics::Gauge, sluice_metrics::Gauge)> =
            listeners
                .iter()
                .map(|listener| {
                    let label = listener.port().to_string();
                    (
                        listener.clone(),
                        connections.with_labels(&[label.as_str()]),
                        peaks.with_labels(&[label.as_str()]),
                    )
                })
                .collect();
        let gauge_cancel = cancel.clone();
        tokio::task::spawn_local(async move {
            loop {
                tokio::select! {
                    _ = gauge_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        for (listener, active, peak) in &listener_stats {
                            active.set(&[], listener.active_connections() as f64);
                            peak.set(&[], listener.peak_connections() as f64);
                        }
                    }
                }
            }
        });
    }

    cancel.cancelled().await;

    tracing::info!("worker shutting down");
    for listener in &listeners {
        listener.close();
    }
    module.shutdown();

    Ok(())
}
