//! Cross-reference validation
//!
//! Runs after parse. Every failure here aborts worker bring-up with an
//! explanatory message.

use std::collections::HashSet;

use crate::{Config, ConfigError, FilterConfig, Result};

pub(crate) fn validate(config: &Config) -> Result<()> {
    // Entry points must reference existing pipelines
    for listener in &config.listeners {
        require_pipeline(
            config,
            &listener.pipeline,
            format!("listener {}:{}", listener.address, listener.port),
        )?;
    }
    for task in &config.tasks {
        require_pipeline(
            config,
            &task.pipeline,
            format!("task every {}s", task.interval_secs),
        )?;
    }
    for reader in &config.readers {
        require_pipeline(config, &reader.pipeline, format!("reader '{}'", reader.path))?;
    }

    // Unique listener bindings
    let mut bindings = HashSet::new();
    for listener in &config.listeners {
        if !bindings.insert((listener.address.clone(), listener.port)) {
            return Err(ConfigError::DuplicateListener {
                address: listener.address.clone(),
                port: listener.port,
            });
        }
    }

    // Filters: joints carry a resolvable `to`, connect targets parse
    for (name, pipeline) in &config.pipelines {
        for filter in &pipeline.filters {
            if let Some(to) = filter.joint_target() {
                match to {
                    None => {
                        return Err(ConfigError::MissingTo {
                            pipeline: name.clone(),
                            filter: filter.type_name().to_string(),
                        });
                    }
                    Some(target) => {
                        if !config.pipelines.contains_key(target) {
                            return Err(ConfigError::UnknownPipeline {
                                pipeline: target.clone(),
                                referenced_from: name.clone(),
                            });
                        }
                    }
                }
            }

            if let FilterConfig::Connect { target, .. } = filter {
                if !valid_target(target) {
                    return Err(ConfigError::InvalidTarget {
                        pipeline: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn require_pipeline(config: &Config, pipeline: &str, referenced_by: String) -> Result<()> {
    if config.pipelines.contains_key(pipeline) {
        Ok(())
    } else {
        Err(ConfigError::MissingPipeline {
            referenced_by,
            pipeline: pipeline.to_string(),
        })
    }
}

fn valid_target(target: &str) -> bool {
    match target.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
