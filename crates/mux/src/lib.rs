//! Sluice - Multiplexing
//!
//! Coalesces many logical streams onto shared upstream transports and splits
//! shared transports back into per-message sub-pipelines.
//!
//! # Architecture
//!
//! ```text
//! [mux filters]            [SessionPool]               [shared pipeline]
//!   stream ──┐    key ──► SessionCluster ──► Session ──► sub-pipeline ──► upstream
//!   stream ──┼──────────────(share_count-ordered)          │
//!   stream ──┘              QueueMuxer ◄── replies ────────┘
//! ```
//!
//! # Key Design
//!
//! - **Session pooling**: sessions for one key live in a cluster ordered by
//!   ascending share count; allocation picks the least-loaded session within
//!   `max_queue`/`max_messages`, or opens a new one.
//! - **Recycling**: a pool-wide one-second tick drops sessions that are
//!   closed, over their message budget, idle past `max_idle`, or whose weak
//!   key object is gone. Shutdown forces the idle deadline.
//! - **Queue correlation**: the queue muxer preserves the order in which
//!   streams emitted their `MessageEnd` toward the shared transport; replies
//!   come back to the originating streams in that same order.

mod demux;
mod key;
mod mux;
mod queue;
mod session;

pub use demux::Demux;
pub use key::{KeyValue, ObjectKey, SessionKey};
pub use mux::{Mux, SessionSelector};
pub use queue::QueueMuxer;
pub use session::{MuxOptions, MuxStream, Multiplexer, Session, SessionCluster, SessionPool};
