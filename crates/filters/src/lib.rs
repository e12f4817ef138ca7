//! Sluice - Structural Filters
//!
//! The joint and terminal filters that shape pipelines without touching
//! payload bytes:
//!
//! - [`Connect`] - terminal: attaches an outbound connection and injects the
//!   reply stream back downstream.
//! - [`Fork`] - copies events into a sub-pipeline while passing them through.
//! - [`Link`] - routes events into a sub-pipeline whose output replaces this
//!   filter's own.
//! - [`Replay`] - buffers the stream and re-runs its sub-pipeline from the
//!   start when it signals `StreamEnd(Replay)`.
//! - [`Dump`] - logs events through `tracing`, passes them on unchanged.

mod connect;
mod dump;
mod fork;
mod link;
mod replay;

pub use connect::Connect;
pub use dump::Dump;
pub use fork::Fork;
pub use link::Link;
pub use replay::Replay;
