//! Pipeline instances
//!
//! A `Pipeline` is a runtime instance of a layout: cloned filter instances
//! linked head → tail, plus the stream context. Instances come from the
//! layout's free list and return to it when the handle is dropped - the
//! actual recycling is deferred to the end of the current turn so a filter
//! can never free the chain it is executing in.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use sluice_event::Event;

use crate::context::Context;
use crate::filter::{Filter, FilterCx};
use crate::input::{EventSink, Input};
use crate::layout::{FilterTemplate, PipelineLayout};
use crate::turn;

/// One filter instance within a pipeline.
pub(crate) struct Node {
    filter: Box<dyn Filter>,
    output: Input,
    subs: Vec<Rc<PipelineLayout>>,
    context: Rc<Context>,
    active: bool,
}

impl Node {
    pub(crate) fn shutdown(&mut self) {
        if self.active {
            self.filter.shutdown();
        }
    }
}

impl EventSink for Node {
    fn on_event(&mut self, evt: Event) {
        // Events addressed to a recycled instance are dropped.
        if !self.active {
            return;
        }
        let Node {
            filter,
            output,
            subs,
            context,
            ..
        } = self;
        let mut cx = FilterCx::new(output, subs, context);
        filter.process(&mut cx, evt);
    }
}

/// Forwards the tail filter's output to whatever the pipeline is currently
/// chained to.
struct TailForward {
    target: Rc<RefCell<Input>>,
}

impl EventSink for TailForward {
    fn on_event(&mut self, evt: Event) {
        let target = self.target.borrow().clone();
        target.input(evt);
    }
}

/// The reusable innards of a pipeline instance.
pub(crate) struct PipelineState {
    nodes: Vec<Rc<RefCell<Node>>>,
    tail: Rc<RefCell<Input>>,
    head: Input,
}

impl PipelineState {
    pub(crate) fn build(templates: &[FilterTemplate]) -> Self {
        let tail = Rc::new(RefCell::new(Input::null()));
        let forward: Rc<RefCell<dyn EventSink>> = Rc::new(RefCell::new(TailForward {
            target: Rc::clone(&tail),
        }));
        let mut next = Input::new(forward);

        let mut nodes: Vec<Rc<RefCell<Node>>> = Vec::with_capacity(templates.len());
        for template in templates.iter().rev() {
            let node = Rc::new(RefCell::new(Node {
                filter: template.filter.borrow().clone_filter(),
                output: next,
                subs: template.subs.clone(),
                context: Context::new(),
                active: false,
            }));
            next = Input::new(Rc::clone(&node) as Rc<RefCell<dyn EventSink>>);
            nodes.push(node);
        }
        nodes.reverse();

        PipelineState {
            nodes,
            tail,
            head: next,
        }
    }

    pub(crate) fn nodes(&self) -> &[Rc<RefCell<Node>>] {
        &self.nodes
    }

    pub(crate) fn activate(&self, context: &Rc<Context>, output: Input) {
        *self.tail.borrow_mut() = output;
        for node in &self.nodes {
            let mut node = node.borrow_mut();
            node.context = Rc::clone(context);
            node.active = true;
        }
    }

    pub(crate) fn deactivate(&self) {
        for node in &self.nodes {
            let mut node = node.borrow_mut();
            node.filter.reset();
            node.active = false;
        }
        *self.tail.borrow_mut() = Input::null();
    }
}

/// Handle to a live pipeline instance.
///
/// Dropping the handle recycles the instance at the end of the current turn
/// (auto-release): each filter is reset, the tail is unchained, and the
/// instance returns to its layout's pool.
pub struct Pipeline {
    layout: Weak<PipelineLayout>,
    state: Option<PipelineState>,
    id: u64,
}

impl Pipeline {
    pub(crate) fn new(layout: Weak<PipelineLayout>, state: PipelineState, id: u64) -> Self {
        Self {
            layout,
            state: Some(state),
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The layout this instance was cloned from, while it is still bound.
    pub fn layout(&self) -> Option<Rc<PipelineLayout>> {
        self.layout.upgrade()
    }

    /// Feed one event to the head filter.
    pub fn input(&self, evt: Event) {
        if let Some(state) = &self.state {
            state.head.input(evt);
        }
    }

    /// A clonable handle to the head, for wiring this pipeline as an event
    /// target that outlives the borrow.
    pub fn input_handle(&self) -> Input {
        match &self.state {
            Some(state) => state.head.clone(),
            None => Input::null(),
        }
    }

    /// Re-chain the tail output.
    pub fn chain(&self, output: Input) {
        if let Some(state) = &self.state {
            *state.tail.borrow_mut() = output;
        }
    }

    /// Propagate a cooperative drain signal to every filter instance.
    pub fn shutdown(&self) {
        if let Some(state) = &self.state {
            for node in &state.nodes {
                node.borrow_mut().shutdown();
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let layout = self.layout.clone();
            let id = self.id;
            turn::defer(move || {
                // A gone layout means the whole worker is tearing down;
                // the instance just drops instead of pooling.
                if let Some(layout) = layout.upgrade() {
                    layout.recycle(state, id);
                }
            });
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("id", &self.id).finish()
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
