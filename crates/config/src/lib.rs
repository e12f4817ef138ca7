//! Sluice Configuration
//!
//! TOML-based configuration with sensible defaults. Minimal config should
//! just work - only specify what you need to change.
//!
//! # Parsing
//!
//! ```
//! use sluice_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str(r#"
//! [pipeline.echo]
//! filters = []
//!
//! [[listener]]
//! port = 8080
//! pipeline = "echo"
//! "#).unwrap();
//! assert_eq!(config.listeners.len(), 1);
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [global]
//! reuse_port = true
//!
//! [log]
//! level = "info"
//!
//! [metrics]
//! enabled = true
//! interval_secs = 10
//!
//! [[listener]]
//! address = "0.0.0.0"
//! port = 20880
//! pipeline = "inbound"
//! max_connections = 1000
//!
//! [pipeline.inbound]
//! filters = [
//!     { type = "demux-fcgi", to = "per-request" },
//! ]
//!
//! [pipeline.per-request]
//! filters = [
//!     { type = "mux-queue", to = "upstream", key = "backend", max_queue = 8 },
//! ]
//!
//! [pipeline.upstream]
//! filters = [
//!     { type = "connect", target = "127.0.0.1:8080", retry_count = 2 },
//! ]
//! ```

mod error;
mod global;
mod listeners;
mod logging;
mod metrics;
mod pipelines;
mod tasks;
mod validation;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use listeners::ListenerConfig;
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use metrics::MetricsConfig;
pub use pipelines::{FilterConfig, PipelineConfig};
pub use tasks::{ReaderConfig, TaskConfig};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings
    pub global: GlobalConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Metrics reporting configuration
    pub metrics: MetricsConfig,

    /// TCP listeners
    #[serde(rename = "listener")]
    pub listeners: Vec<ListenerConfig>,

    /// Scheduled tasks
    #[serde(rename = "task")]
    pub tasks: Vec<TaskConfig>,

    /// File readers
    #[serde(rename = "reader")]
    pub readers: Vec<ReaderConfig>,

    /// Named pipelines
    #[serde(rename = "pipeline")]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross references
    ///
    /// Checks that every referenced pipeline exists, joint filters carry
    /// their `to`, connect targets parse, and listener bindings are unique.
    fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
