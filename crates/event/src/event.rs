//! Event variants and message metadata
//!
//! Events form the vocabulary of the pipeline runtime. Filters consume one
//! event at a time and emit zero or more events downstream.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::Buffer;

/// Why a stream ended.
///
/// Carried by [`Event::StreamEnd`]. `Ok` is a normal close; everything else
/// describes the failure that terminated the stream. `Display` renders the
/// kebab-case names used in logs and protocol metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndError {
    /// Normal end of stream
    #[default]
    Ok,
    /// Peer reset the connection
    ConnectionReset,
    /// Remote refused the connection
    ConnectionRefused,
    /// Connect attempt timed out
    ConnectionTimeout,
    /// No data arrived within the read timeout
    ReadTimeout,
    /// A write could not complete within the write timeout
    WriteTimeout,
    /// The write buffer limit was exceeded
    BufferOverflow,
    /// A codec detected malformed input
    ProtocolError,
    /// Request to replay the buffered stream (consumed by the replay filter)
    Replay,
    /// Unclassified failure
    Unknown,
}

impl EndError {
    /// Whether this kind represents a connection-level failure that an
    /// outbound connection may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionReset | Self::ConnectionRefused | Self::ConnectionTimeout
        )
    }
}

impl fmt::Display for EndError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::ConnectionReset => "connection-reset",
            Self::ConnectionRefused => "connection-refused",
            Self::ConnectionTimeout => "connection-timeout",
            Self::ReadTimeout => "read-timeout",
            Self::WriteTimeout => "write-timeout",
            Self::BufferOverflow => "buffer-overflow",
            Self::ProtocolError => "protocol-error",
            Self::Replay => "replay",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Protocol metadata opening a message.
///
/// A string-keyed dictionary of JSON values. Codec filters populate it with
/// protocol fields (method, path, record ids, ...). Heads are built once and
/// shared behind `Rc` - see [`Event::MessageStart`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHead {
    fields: serde_json::Map<String, Value>,
}

impl MessageHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returning `self` for chained construction.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Fetch a field as i64, if present and numeric.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    /// Fetch a field as &str, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// Protocol metadata closing a message. Same shape as [`MessageHead`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageTail {
    fields: serde_json::Map<String, Value>,
}

impl MessageTail {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An event flowing through a pipeline.
///
/// Cloning is shallow: heads and tails are `Rc`-shared, `Data` shares its
/// chunk storage.
#[derive(Debug, Clone)]
pub enum Event {
    /// Opens a stream. Many pipelines start implicitly at the first event.
    StreamStart,
    /// Opens a logical message with protocol metadata.
    MessageStart(Rc<MessageHead>),
    /// An ordered slice of payload bytes.
    Data(Buffer),
    /// Closes the current message.
    MessageEnd(Rc<MessageTail>),
    /// Terminates the stream.
    StreamEnd(EndError),
}

impl Event {
    /// A `MessageStart` with an empty head.
    pub fn message_start() -> Self {
        Self::MessageStart(Rc::new(MessageHead::new()))
    }

    /// A `MessageEnd` with an empty tail.
    pub fn message_end() -> Self {
        Self::MessageEnd(Rc::new(MessageTail::new()))
    }

    /// A `Data` event over a single chunk.
    pub fn data(bytes: impl Into<bytes::Bytes>) -> Self {
        Self::Data(Buffer::from(bytes.into()))
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    pub fn is_message_start(&self) -> bool {
        matches!(self, Self::MessageStart(_))
    }

    pub fn is_message_end(&self) -> bool {
        matches!(self, Self::MessageEnd(_))
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self, Self::StreamEnd(_))
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamStart => "StreamStart",
            Self::MessageStart(_) => "MessageStart",
            Self::Data(_) => "Data",
            Self::MessageEnd(_) => "MessageEnd",
            Self::StreamEnd(_) => "StreamEnd",
        }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;
