//! Sluice - Event Model
//!
//! The typed events that flow through pipelines, and the chunked byte
//! buffer that carries payload data.
//!
//! # Event Streams
//!
//! A stream is a sequence of events between a `StreamStart` (often implicit
//! at the first event) and a terminal `StreamEnd`. Between `MessageStart`
//! and `MessageEnd`, only `Data` is legal:
//!
//! ```text
//! StreamStart  MessageStart  Data*  MessageEnd  ...  StreamEnd
//! ```
//!
//! # Zero-Copy
//!
//! Events are immutable once emitted and cheap to clone: message heads and
//! tails are shared behind `Rc`, and `Buffer` chunks are `bytes::Bytes`, so
//! cloning shares the underlying storage.

mod buffer;
mod event;

pub use buffer::{Buffer, DEFAULT_CHUNK_SIZE};
pub use event::{EndError, Event, MessageHead, MessageTail};
