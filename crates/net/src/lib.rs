//! Sluice - Network Endpoints
//!
//! TCP accept/connect endpoints binding sockets to pipelines.
//!
//! # Data Flow
//!
//! ```text
//! [Listener] ──accept──► [Inbound] ──reads as Data──► pipeline ──► ... ──┐
//!                             ▲                                          │
//!                             └───────── write buffer ◄── events ◄───────┘
//!
//! [connect filter] ──► [Outbound] ──write pump──► upstream
//!                            │◄──read pump── replies as Data
//! ```
//!
//! # Key Design
//!
//! - **Per-connection tasks**: read and write pumps run as `spawn_local`
//!   tasks; all endpoint state is single-threaded (`Rc`/`Cell`).
//! - **Connection gating**: a listener at `max_connections` stops accepting;
//!   pending connections wait in the OS backlog, none is reset.
//! - **Backpressure**: writes beyond `buffer_limit` are dropped and tallied
//!   in `discarded_data_size`; the first excess write emits a single
//!   `StreamEnd(BufferOverflow)`.
//! - **Timeouts**: connect/read/write timers map expiry to the matching
//!   `StreamEnd` kind and close the socket.

mod inbound;
mod listener;
mod outbound;
mod write_buffer;

pub use inbound::Inbound;
pub use listener::{find, set_reuse_port, Listener, ListenerError, ListenerOptions};
pub use outbound::{Outbound, OutboundOptions, OutboundState};
pub use write_buffer::{PushResult, WriteBuffer};
