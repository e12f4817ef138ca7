//! Listener configuration

use serde::Deserialize;

/// One TCP listener bound to a pipeline.
///
/// # Example
///
/// ```toml
/// [[listener]]
/// address = "0.0.0.0"
/// port = 20880
/// pipeline = "inbound"
/// max_connections = 1000
/// read_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address.
    pub address: String,

    /// Listen port.
    pub port: u16,

    /// Pipeline each accepted connection runs.
    pub pipeline: String,

    /// Maximum concurrent connections (negative = unlimited).
    pub max_connections: i32,

    pub read_timeout_secs: Option<u64>,

    pub write_timeout_secs: Option<u64>,

    /// Close connections idle longer than this.
    pub idle_timeout_secs: Option<u64>,

    /// `IP_TRANSPARENT` (Linux only).
    pub transparent: bool,

    /// Shut the write side as soon as the peer half-closes.
    pub close_eof: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 0,
            pipeline: String::new(),
            max_connections: -1,
            read_timeout_secs: None,
            write_timeout_secs: None,
            idle_timeout_secs: None,
            transparent: false,
            close_eof: false,
        }
    }
}
