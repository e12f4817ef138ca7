//! Pipeline and filter configuration

use serde::Deserialize;

/// A named pipeline: an ordered list of filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

fn default_max_idle_secs() -> u64 {
    60
}

fn default_max_queue() -> i32 {
    1
}

/// One filter entry. The `type` field selects the filter; joint filters
/// carry a `to` naming their sub-pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FilterConfig {
    /// Terminal filter: connect to an upstream TCP endpoint.
    Connect {
        /// `host:port`
        target: String,
        #[serde(default)]
        buffer_limit: usize,
        #[serde(default)]
        retry_count: i32,
        #[serde(default)]
        retry_delay_secs: u64,
        #[serde(default)]
        connect_timeout_secs: Option<u64>,
        #[serde(default)]
        read_timeout_secs: Option<u64>,
        #[serde(default)]
        write_timeout_secs: Option<u64>,
    },

    /// Merge the stream into a pooled shared session, passing events
    /// through.
    Mux {
        #[serde(default)]
        to: Option<String>,
        /// Static session key; defaults to per-origin keying.
        #[serde(default)]
        key: Option<String>,
        #[serde(default = "default_max_idle_secs")]
        max_idle_secs: u64,
        #[serde(default = "default_max_queue")]
        max_queue: i32,
        #[serde(default)]
        max_messages: i32,
    },

    /// Strict request→response correlation over a pooled shared session.
    MuxQueue {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default = "default_max_idle_secs")]
        max_idle_secs: u64,
        #[serde(default = "default_max_queue")]
        max_queue: i32,
        #[serde(default)]
        max_messages: i32,
    },

    /// FastCGI client over a pooled shared session.
    MuxFcgi {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default = "default_max_idle_secs")]
        max_idle_secs: u64,
        #[serde(default = "default_max_queue")]
        max_queue: i32,
        #[serde(default)]
        max_messages: i32,
    },

    /// One sub-pipeline per message; replies forwarded as they complete.
    Demux {
        #[serde(default)]
        to: Option<String>,
    },

    /// One sub-pipeline per message; reply order preserved.
    DemuxQueue {
        #[serde(default)]
        to: Option<String>,
    },

    /// FastCGI server side: one sub-pipeline per request.
    DemuxFcgi {
        #[serde(default)]
        to: Option<String>,
    },

    /// Copy events into a sub-pipeline while passing them through.
    Fork {
        #[serde(default)]
        to: Option<String>,
    },

    /// Route events through a sub-pipeline.
    Link {
        #[serde(default)]
        to: Option<String>,
    },

    /// Buffer the stream; re-run the sub-pipeline on `StreamEnd(replay)`.
    Replay {
        #[serde(default)]
        to: Option<String>,
    },

    /// Log events, pass them through.
    Dump {
        #[serde(default)]
        tag: Option<String>,
    },
}

impl FilterConfig {
    /// The `type` value as written in config.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Mux { .. } => "mux",
            Self::MuxQueue { .. } => "mux-queue",
            Self::MuxFcgi { .. } => "mux-fcgi",
            Self::Demux { .. } => "demux",
            Self::DemuxQueue { .. } => "demux-queue",
            Self::DemuxFcgi { .. } => "demux-fcgi",
            Self::Fork { .. } => "fork",
            Self::Link { .. } => "link",
            Self::Replay { .. } => "replay",
            Self::Dump { .. } => "dump",
        }
    }

    /// Whether this filter owns a sub-pipeline, and the configured target.
    pub fn joint_target(&self) -> Option<&Option<String>> {
        match self {
            Self::Mux { to, .. }
            | Self::MuxQueue { to, .. }
            | Self::MuxFcgi { to, .. }
            | Self::Demux { to }
            | Self::DemuxQueue { to }
            | Self::DemuxFcgi { to }
            | Self::Fork { to }
            | Self::Link { to }
            | Self::Replay { to } => Some(to),
            Self::Connect { .. } | Self::Dump { .. } => None,
        }
    }
}
