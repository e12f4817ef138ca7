//! Configuration binding
//!
//! Translates the declarative pipeline layout into bound `PipelineLayout`s.
//! Filter options map one-to-one onto the filter constructors; everything
//! the TOML validation let through is re-checked by the module bind, so a
//! broken graph can never reach a listener.

use std::time::Duration;

use sluice_config::{Config, FilterConfig};
use sluice_filters::{Connect, Dump, Fork, Link, Replay};
use sluice_mux::{Demux, Mux, MuxOptions};
use sluice_net::OutboundOptions;
use sluice_pipeline::{BindError, LayoutSpec, Module, ModuleBuilder};

/// Worker bring-up errors. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Pipeline graph failed to bind
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A listener failed to start
    #[error(transparent)]
    Listener(#[from] sluice_net::ListenerError),

    /// A connect filter's target is not `host:port`
    #[error("pipeline '{pipeline}': invalid connect target '{target}'")]
    InvalidTarget { pipeline: String, target: String },

    /// An entry point references a pipeline the module does not have
    #[error("{referenced_by} references unknown pipeline '{pipeline}'")]
    MissingPipeline {
        referenced_by: String,
        pipeline: String,
    },

    /// A reader's file could not be opened
    #[error("cannot open reader file '{path}': {source}")]
    ReaderOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bind every configured pipeline into a module.
pub fn bind_module(config: &Config) -> Result<Module, EngineError> {
    let mut builder = ModuleBuilder::new();

    for (name, pipeline) in &config.pipelines {
        let mut spec = LayoutSpec::new();
        for filter in &pipeline.filters {
            spec = append_filter(spec, name, filter)?;
        }
        builder.add(name.clone(), spec);
    }

    Ok(builder.bind()?)
}

fn append_filter(
    spec: LayoutSpec,
    pipeline: &str,
    filter: &FilterConfig,
) -> Result<LayoutSpec, EngineError> {
    let spec = match filter {
        FilterConfig::Connect {
            target,
            buffer_limit,
            retry_count,
            retry_delay_secs,
            connect_timeout_secs,
            read_timeout_secs,
            write_timeout_secs,
        } => {
            let (host, port) =
                Connect::parse_target(target).ok_or_else(|| EngineError::InvalidTarget {
                    pipeline: pipeline.to_string(),
                    target: target.clone(),
                })?;
            let options = OutboundOptions {
                buffer_limit: *buffer_limit,
                retry_count: *retry_count,
                retry_delay: Duration::from_secs(*retry_delay_secs),
                connect_timeout: connect_timeout_secs.map(Duration::from_secs),
                read_timeout: read_timeout_secs.map(Duration::from_secs),
                write_timeout: write_timeout_secs.map(Duration::from_secs),
            };
            spec.filter(Connect::new(host, port, options))
        }

        FilterConfig::Mux {
            to,
            key,
            max_idle_secs,
            max_queue,
            max_messages,
        } => {
            let mux = with_key(
                Mux::merge(mux_options(*max_idle_secs, *max_queue, *max_messages)),
                key,
            );
            spec.filter(mux).to(required(to))
        }

        FilterConfig::MuxQueue {
            to,
            key,
            max_idle_secs,
            max_queue,
            max_messages,
        } => {
            let mux = with_key(
                Mux::queue(mux_options(*max_idle_secs, *max_queue, *max_messages)),
                key,
            );
            spec.filter(mux).to(required(to))
        }

        FilterConfig::MuxFcgi {
            to,
            key,
            max_idle_secs,
            max_queue,
            max_messages,
        } => {
            let mux = with_key(
                sluice_fcgi::mux(mux_options(*max_idle_secs, *max_queue, *max_messages)),
                key,
            );
            spec.filter(mux).to(required(to))
        }

        FilterConfig::Demux { to } => spec.filter(Demux::unordered()).to(required(to)),
        FilterConfig::DemuxQueue { to } => spec.filter(Demux::queue()).to(required(to)),
        FilterConfig::DemuxFcgi { to } => spec.filter(sluice_fcgi::Demux::new()).to(required(to)),
        FilterConfig::Fork { to } => spec.filter(Fork::new()).to(required(to)),
        FilterConfig::Link { to } => spec.filter(Link::new()).to(required(to)),
        FilterConfig::Replay { to } => spec.filter(Replay::new()).to(required(to)),

        FilterConfig::Dump { tag } => spec.filter(Dump::new(tag.clone().unwrap_or_default())),
    };
    Ok(spec)
}

fn mux_options(max_idle_secs: u64, max_queue: i32, max_messages: i32) -> MuxOptions {
    MuxOptions {
        max_idle: Duration::from_secs(max_idle_secs),
        max_queue,
        max_messages,
    }
}

fn with_key(mux: Mux, key: &Option<String>) -> Mux {
    match key {
        Some(key) => {
            let key = key.clone();
            mux.with_selector(move |_| Some(key.as_str().into()))
        }
        None => mux,
    }
}

/// Config validation already rejected absent `to`s; the module bind is the
/// backstop for a missing one.
fn required(to: &Option<String>) -> String {
    to.clone().unwrap_or_default()
}

#[cfg(test)]
#[path = "bind_test.rs"]
mod bind_test;
