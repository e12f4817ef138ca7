//! Configuration errors
//!
//! All of these are fatal at apply time: the worker does not start with a
//! half-valid configuration.

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML syntax or structure
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A listener, task, or reader references a pipeline that does not exist
    #[error("{referenced_by} references unknown pipeline '{pipeline}'")]
    MissingPipeline {
        referenced_by: String,
        pipeline: String,
    },

    /// A joint filter was declared without its sub-pipeline
    #[error("pipeline '{pipeline}': missing .to(...) on joint filter '{filter}'")]
    MissingTo { pipeline: String, filter: String },

    /// A filter's `to` names a pipeline that does not exist
    #[error("pipeline '{referenced_from}': unknown pipeline '{pipeline}'")]
    UnknownPipeline {
        pipeline: String,
        referenced_from: String,
    },

    /// Two listeners bind the same address and port
    #[error("duplicate listener on {address}:{port}")]
    DuplicateListener { address: String, port: u16 },

    /// A connect target is not `host:port`
    #[error("pipeline '{pipeline}': invalid connect target '{target}'")]
    InvalidTarget { pipeline: String, target: String },
}
