//! Replay filter
//!
//! Buffers every input event while forwarding the stream into a
//! sub-pipeline. When the sub-pipeline emits `StreamEnd(Replay)`, a re-run
//! is scheduled: the old instance is released and the buffered sequence is
//! delivered to a fresh one. The filter's output is the latest attempt's
//! output.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use sluice_event::{EndError, Event};
use sluice_pipeline::{Context, Filter, FilterCx, Input, InputContext, Pipeline, PipelineLayout};

/// Joint filter that can re-run its sub-pipeline with the buffered stream.
pub struct Replay {
    shared: Rc<ReplayShared>,
}

struct ReplayShared {
    this: Weak<ReplayShared>,
    buffer: RefCell<Vec<Event>>,
    pipeline: RefCell<Option<Pipeline>>,
    output: RefCell<Option<Input>>,
    layout: RefCell<Option<Rc<PipelineLayout>>>,
    context: RefCell<Option<Rc<Context>>>,
    scheduled: Cell<bool>,
    attempts: Cell<u32>,
}

impl Replay {
    pub fn new() -> Self {
        Self {
            shared: Rc::new_cyclic(|this| ReplayShared {
                this: this.clone(),
                buffer: RefCell::new(Vec::new()),
                pipeline: RefCell::new(None),
                output: RefCell::new(None),
                layout: RefCell::new(None),
                context: RefCell::new(None),
                scheduled: Cell::new(false),
                attempts: Cell::new(0),
            }),
        }
    }

    /// Times the sub-pipeline has been re-run.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.get()
    }
}

impl Default for Replay {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayShared {
    /// The receiver between the sub-pipeline and this filter's output:
    /// a `StreamEnd(Replay)` triggers a re-run instead of propagating.
    fn receiver(&self) -> Input {
        let weak = self.this.clone();
        Input::from_fn(move |evt| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Event::StreamEnd(EndError::Replay) = evt {
                shared.schedule_replay();
                return;
            }
            let output = shared.output.borrow().clone();
            if let Some(output) = output.as_ref() {
                output.input(evt);
            }
        })
    }

    fn fresh_pipeline(&self) -> Option<Pipeline> {
        let layout = self.layout.borrow().clone()?;
        let context = self.context.borrow().clone()?;
        Some(layout.alloc(context, self.receiver()))
    }

    fn schedule_replay(self: Rc<Self>) {
        if self.scheduled.replace(true) {
            return;
        }
        tokio::task::spawn_local(async move {
            InputContext::run(|| {
                self.scheduled.set(false);
                self.replay();
            });
        });
    }

    /// Release the failed attempt and run the buffer against a fresh one.
    fn replay(&self) {
        let old = self.pipeline.borrow_mut().take();
        let Some(old) = old else {
            return;
        };
        tracing::debug!(target: "replay", pipeline = old.id(), "replaying buffered stream");
        drop(old);

        if let Some(pipeline) = self.fresh_pipeline() {
            self.attempts.set(self.attempts.get() + 1);
            for evt in self.buffer.borrow().iter() {
                pipeline.input(evt.clone());
            }
            *self.pipeline.borrow_mut() = Some(pipeline);
        }
    }
}

impl Filter for Replay {
    fn describe(&self) -> &'static str {
        "replay"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        if self.shared.output.borrow().is_none() {
            *self.shared.output.borrow_mut() = Some(cx.output_handle());
            *self.shared.layout.borrow_mut() = Some(cx.sub_layout(0));
            *self.shared.context.borrow_mut() = Some(Rc::clone(cx.context()));
        }
        if self.shared.pipeline.borrow().is_none() {
            let pipeline = self.shared.fresh_pipeline();
            *self.shared.pipeline.borrow_mut() = pipeline;
        }

        self.shared.buffer.borrow_mut().push(evt.clone());
        if let Some(pipeline) = self.shared.pipeline.borrow().as_ref() {
            pipeline.input(evt);
        }
    }

    fn reset(&mut self) {
        self.shared.buffer.borrow_mut().clear();
        *self.shared.pipeline.borrow_mut() = None;
        *self.shared.output.borrow_mut() = None;
        *self.shared.layout.borrow_mut() = None;
        *self.shared.context.borrow_mut() = None;
        self.shared.scheduled.set(false);
        self.shared.attempts.set(0);
    }
}

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;
