//! Sluice - Pipeline Runtime
//!
//! The filter-chain execution substrate: pipelines are instantiated from
//! immutable layouts, pooled per layout, and driven by turn-scoped input
//! contexts.
//!
//! # Architecture
//!
//! ```text
//! [Module]                [PipelineLayout]              [Pipeline]
//!   named layouts ──bind──► filter templates ──alloc──► cloned filters
//!   inline layouts          sub-layout refs    (pool)    head → ... → tail → output
//! ```
//!
//! # Key Design
//!
//! - **Turn-based delivery**: `Input::input()` enqueues onto a thread-local
//!   turn queue drained by the outermost `InputContext`. Filter re-entry is
//!   safe and per-edge ordering is preserved.
//! - **Deferred release**: pipelines dropped mid-turn are recycled at the end
//!   of the turn, never while the chain that freed them is still running.
//! - **Per-layout pooling**: instances are reset and reused; the layout
//!   tracks `allocated = in_use + pooled` at all times.
//! - **Bind-time validation**: joint filters must have their sub-pipelines
//!   attached (`missing .to(...)` is a configuration error, not a runtime
//!   surprise).
//!
//! # Example
//!
//! ```ignore
//! let mut module = ModuleBuilder::new();
//! module.add("echo", LayoutSpec::new().filter(MyFilter::new()));
//! let module = module.bind()?;
//!
//! let layout = module.layout("echo").unwrap();
//! let pipeline = layout.alloc(Context::new(), Input::from_fn(|evt| { ... }));
//! pipeline.input(Event::StreamStart);
//! ```

mod context;
mod filter;
mod input;
mod layout;
mod pipeline;
mod turn;

pub use context::Context;
pub use filter::{Filter, FilterCx};
pub use input::{EventSink, Input};
pub use layout::{BindError, LayoutSpec, Module, ModuleBuilder, PipelineLayout};
pub use pipeline::Pipeline;
pub use turn::InputContext;

// Re-export the event vocabulary for convenience
pub use sluice_event::{Buffer, EndError, Event, MessageHead, MessageTail};
