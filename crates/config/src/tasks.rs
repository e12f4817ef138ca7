//! Scheduled tasks and file readers

use serde::Deserialize;

/// A pipeline started on a fixed interval.
///
/// # Example
///
/// ```toml
/// [[task]]
/// interval_secs = 5
/// pipeline = "health-check"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Seconds between runs.
    pub interval_secs: u64,

    /// Pipeline each run instantiates.
    pub pipeline: String,
}

/// A file streamed into a pipeline as one message.
///
/// # Example
///
/// ```toml
/// [[reader]]
/// path = "seed/requests.bin"
/// pipeline = "ingest"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// File to read.
    pub path: String,

    /// Pipeline the file contents flow into.
    pub pipeline: String,

    /// Read chunk size; defaults to the global chunk unit.
    #[serde(default)]
    pub chunk_size: Option<usize>,
}
