//! Filter contract
//!
//! A filter is one node in a pipeline. It consumes one event at a time and
//! may emit events downstream or dispatch them into sub-pipelines. Filter
//! instances are cloned from templates held by the layout; `reset()` returns
//! an instance to its template state before the pipeline is pooled.

use std::rc::Rc;

use sluice_event::Event;

use crate::context::Context;
use crate::input::Input;
use crate::layout::PipelineLayout;
use crate::pipeline::Pipeline;

/// One node in a pipeline.
///
/// `process` never suspends: it runs to completion, emitting synchronously
/// (through the turn queue) or registering an I/O or timer continuation.
pub trait Filter {
    /// Short name for logs and diagnostics (e.g. `"connect"`, `"mux-queue"`).
    fn describe(&self) -> &'static str;

    /// Produce a fresh instance from this template.
    fn clone_filter(&self) -> Box<dyn Filter>;

    /// Number of sub-pipeline slots this filter requires. Binding fails with
    /// a `missing .to(...)` error when a layout does not satisfy this.
    fn sub_slots(&self) -> usize {
        0
    }

    /// Consume one event.
    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event);

    /// Release all per-invocation references before return-to-pool.
    fn reset(&mut self) {}

    /// Cooperative drain: refuse new work, let in-flight work complete.
    fn shutdown(&mut self) {}
}

/// What a filter sees while processing: its downstream output, its resolved
/// sub-pipeline layouts, and the stream context.
pub struct FilterCx<'a> {
    output: &'a Input,
    subs: &'a [Rc<PipelineLayout>],
    context: &'a Rc<Context>,
}

impl<'a> FilterCx<'a> {
    pub(crate) fn new(
        output: &'a Input,
        subs: &'a [Rc<PipelineLayout>],
        context: &'a Rc<Context>,
    ) -> Self {
        Self {
            output,
            subs,
            context,
        }
    }

    /// Emit an event to the next filter (or the pipeline's chained consumer
    /// when this is the tail).
    pub fn output(&self, evt: Event) {
        self.output.input(evt);
    }

    /// A handle to this filter's downstream, for wiring into sub-pipelines
    /// or endpoints that reply later.
    pub fn output_handle(&self) -> Input {
        self.output.clone()
    }

    /// Allocate a sub-pipeline from slot `slot`, sharing this stream's
    /// context. The slot is guaranteed by bind-time validation.
    pub fn sub_pipeline(&self, slot: usize, output: Input) -> Pipeline {
        self.subs[slot].alloc(Rc::clone(self.context), output)
    }

    /// The resolved layout in slot `slot`, for filters that allocate with a
    /// context of their own (e.g. shared mux sessions).
    pub fn sub_layout(&self, slot: usize) -> Rc<PipelineLayout> {
        Rc::clone(&self.subs[slot])
    }

    pub fn context(&self) -> &Rc<Context> {
        self.context
    }
}
