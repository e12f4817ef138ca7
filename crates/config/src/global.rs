//! Process-wide settings

use serde::Deserialize;

/// Global configuration
///
/// # Example
///
/// ```toml
/// [global]
/// reuse_port = true
/// chunk_size = 16384
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Set `SO_REUSEPORT` on every listener socket at bind time.
    pub reuse_port: bool,

    /// Chunk unit for socket reads and file readers (bytes).
    pub chunk_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            reuse_port: false,
            chunk_size: 16 * 1024,
        }
    }
}
