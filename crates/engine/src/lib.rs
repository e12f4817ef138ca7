//! Sluice - Engine
//!
//! Turns a parsed configuration into a running worker: pipelines are bound
//! into layouts, listeners accept into them, tasks fire them on schedule,
//! readers stream files through them. Everything runs single-threaded on a
//! `LocalSet`; shutdown is cooperative via a `CancellationToken`.
//!
//! # Wiring
//!
//! ```text
//! Config ──bind──► Module (layouts) ──┬──► Listener × N
//!                                     ├──► Task × N
//!                                     ├──► Reader × N
//!                                     └──► metrics Reporter
//! ```

mod bind;
mod reader;
mod task;
mod worker;

pub use bind::{bind_module, EngineError};
pub use reader::Reader;
pub use task::Task;
pub use worker::run_worker;
