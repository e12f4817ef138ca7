//! Pipeline layouts and the module registry
//!
//! A `PipelineLayout` is an immutable template: an ordered list of filter
//! templates plus the sub-layouts each joint filter dispatches into.
//! Layouts are produced by binding a `ModuleBuilder`, which validates the
//! whole graph up front - a joint filter without its `.to(...)` target or a
//! reference to an unknown pipeline aborts the bind with a typed error.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::context::Context;
use crate::filter::Filter;
use crate::input::Input;
use crate::pipeline::{Node, Pipeline, PipelineState};

/// Binding errors. All are fatal at apply time.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// A joint filter was declared without enough sub-pipelines
    #[error("pipeline '{pipeline}': missing .to(...) on joint filter '{filter}'")]
    MissingTo {
        pipeline: String,
        filter: &'static str,
    },

    /// A non-joint filter was given a sub-pipeline
    #[error("pipeline '{pipeline}': filter '{filter}' does not take .to(...)")]
    UnexpectedTo {
        pipeline: String,
        filter: &'static str,
    },

    /// A `.to(...)` names a pipeline that does not exist
    #[error("pipeline '{referenced_from}': unknown pipeline '{pipeline}'")]
    UnknownPipeline {
        pipeline: String,
        referenced_from: String,
    },

    /// Two pipelines share a name
    #[error("duplicate pipeline '{name}'")]
    DuplicateLayout { name: String },
}

/// Reference from a joint filter to one of its sub-pipelines.
enum ToRef {
    /// A named (shared) pipeline
    Named(String),
    /// An inline (indexed, anonymous) pipeline
    Inline(LayoutSpec),
}

struct FilterSpec {
    filter: Box<dyn Filter>,
    to: Vec<ToRef>,
}

/// Declarative description of one pipeline: filters in order, each joint
/// followed by its `.to(...)` targets.
#[derive(Default)]
pub struct LayoutSpec {
    entries: Vec<FilterSpec>,
}

impl LayoutSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter template.
    #[must_use]
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.entries.push(FilterSpec {
            filter: Box::new(filter),
            to: Vec::new(),
        });
        self
    }

    /// Attach a named sub-pipeline to the most recently appended filter.
    #[must_use]
    pub fn to(mut self, name: impl Into<String>) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.to.push(ToRef::Named(name.into()));
        }
        self
    }

    /// Attach an inline sub-pipeline to the most recently appended filter.
    #[must_use]
    pub fn to_inline(mut self, spec: LayoutSpec) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.to.push(ToRef::Inline(spec));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects named pipelines and binds them into a [`Module`].
#[derive(Default)]
pub struct ModuleBuilder {
    named: Vec<(String, LayoutSpec)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named pipeline.
    pub fn add(&mut self, name: impl Into<String>, spec: LayoutSpec) -> &mut Self {
        self.named.push((name.into(), spec));
        self
    }

    /// Resolve every layout and validate the graph.
    pub fn bind(self) -> Result<Module, BindError> {
        let mut binder = Binder::default();

        // Phase 1: create a shell per named layout so references can be
        // resolved regardless of declaration order (including cycles).
        let mut specs = Vec::with_capacity(self.named.len());
        for (name, spec) in self.named {
            if binder.by_name.contains_key(&name) {
                return Err(BindError::DuplicateLayout { name });
            }
            let layout = binder.shell(name.clone());
            binder.by_name.insert(name, Rc::clone(&layout));
            specs.push((layout, spec));
        }

        // Phase 2: fill in filter templates and resolve every `.to(...)`.
        for (layout, spec) in specs {
            binder.fill(&layout, spec)?;
        }

        Ok(Module {
            by_name: binder.by_name,
            all: binder.all,
        })
    }
}

#[derive(Default)]
struct Binder {
    by_name: HashMap<String, Rc<PipelineLayout>>,
    all: Vec<Rc<PipelineLayout>>,
}

impl Binder {
    fn shell(&mut self, name: String) -> Rc<PipelineLayout> {
        let index = self.all.len();
        let layout = Rc::new_cyclic(|this| PipelineLayout::new(name, index, this.clone()));
        self.all.push(Rc::clone(&layout));
        layout
    }

    fn fill(&mut self, layout: &Rc<PipelineLayout>, spec: LayoutSpec) -> Result<(), BindError> {
        for entry in spec.entries {
            let slots = entry.filter.sub_slots();
            let name = entry.filter.describe();
            if entry.to.len() < slots {
                return Err(BindError::MissingTo {
                    pipeline: layout.name().to_string(),
                    filter: name,
                });
            }
            if entry.to.len() > slots {
                return Err(BindError::UnexpectedTo {
                    pipeline: layout.name().to_string(),
                    filter: name,
                });
            }

            let mut subs = Vec::with_capacity(entry.to.len());
            for to in entry.to {
                match to {
                    ToRef::Named(target) => {
                        let sub = self.by_name.get(&target).cloned().ok_or_else(|| {
                            BindError::UnknownPipeline {
                                pipeline: target,
                                referenced_from: layout.name().to_string(),
                            }
                        })?;
                        subs.push(sub);
                    }
                    ToRef::Inline(inline) => {
                        let index = self.all.len();
                        let sub = self.shell(format!("{}[{}]", layout.name(), index));
                        self.fill(&sub, inline)?;
                        subs.push(sub);
                    }
                }
            }

            layout.append(entry.filter, subs);
        }

        tracing::debug!(
            target: "pipe-def",
            layout = %layout.name(),
            index = layout.index(),
            filters = layout.filter_count(),
            "layout bound"
        );
        Ok(())
    }
}

/// A bound set of pipeline layouts.
#[derive(Debug)]
pub struct Module {
    by_name: HashMap<String, Rc<PipelineLayout>>,
    all: Vec<Rc<PipelineLayout>>,
}

impl Module {
    /// Look up a named layout.
    pub fn layout(&self, name: &str) -> Option<Rc<PipelineLayout>> {
        self.by_name.get(name).cloned()
    }

    /// Every layout, named and inline, in bind order.
    pub fn layouts(&self) -> &[Rc<PipelineLayout>] {
        &self.all
    }

    /// Propagate shutdown to every layout.
    pub fn shutdown(&self) {
        for layout in &self.all {
            layout.shutdown();
        }
    }
}

pub(crate) struct FilterTemplate {
    pub(crate) filter: RefCell<Box<dyn Filter>>,
    pub(crate) subs: Vec<Rc<PipelineLayout>>,
}

/// An immutable pipeline template with a free-list pool of instances.
///
/// Pool conservation holds at all times:
/// `allocated() == in_use() + pooled()`.
pub struct PipelineLayout {
    name: String,
    index: usize,
    this: Weak<PipelineLayout>,
    templates: RefCell<Vec<FilterTemplate>>,
    pool: RefCell<Vec<PipelineState>>,
    live: RefCell<Vec<Weak<RefCell<Node>>>>,
    allocated: Cell<usize>,
    in_use: Cell<usize>,
    next_id: Cell<u64>,
}

impl PipelineLayout {
    fn new(name: String, index: usize, this: Weak<PipelineLayout>) -> Self {
        Self {
            name,
            index,
            this,
            templates: RefCell::new(Vec::new()),
            pool: RefCell::new(Vec::new()),
            live: RefCell::new(Vec::new()),
            allocated: Cell::new(0),
            in_use: Cell::new(0),
            next_id: Cell::new(1),
        }
    }

    /// Build a standalone layout without a module. Used by endpoints and
    /// tests that wire pipelines programmatically.
    pub fn standalone(
        name: impl Into<String>,
        filters: Vec<Box<dyn Filter>>,
    ) -> Rc<PipelineLayout> {
        let name = name.into();
        let layout = Rc::new_cyclic(|this| PipelineLayout::new(name, 0, this.clone()));
        for filter in filters {
            layout.append(filter, Vec::new());
        }
        layout
    }

    fn append(&self, filter: Box<dyn Filter>, subs: Vec<Rc<PipelineLayout>>) {
        self.templates.borrow_mut().push(FilterTemplate {
            filter: RefCell::new(filter),
            subs,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn filter_count(&self) -> usize {
        self.templates.borrow().len()
    }

    /// Instances ever built for this layout.
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// Instances currently attached to an event source.
    pub fn in_use(&self) -> usize {
        self.in_use.get()
    }

    /// Instances resting in the free list.
    pub fn pooled(&self) -> usize {
        self.pool.borrow().len()
    }

    /// Allocate an instance: pop from the pool or clone the templates.
    ///
    /// The instance's tail is chained to `output`; dropping the returned
    /// handle recycles the instance at the end of the current turn.
    pub fn alloc(&self, context: Rc<Context>, output: Input) -> Pipeline {
        let state = match self.pool.borrow_mut().pop() {
            Some(state) => state,
            None => {
                self.allocated.set(self.allocated.get() + 1);
                self.build_state()
            }
        };
        state.activate(&context, output);
        self.in_use.set(self.in_use.get() + 1);

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        tracing::debug!(
            target: "pipeline",
            layout = %self.name,
            id,
            context = context.id(),
            "pipeline allocated"
        );
        Pipeline::new(self.this.clone(), state, id)
    }

    pub(crate) fn recycle(&self, state: PipelineState, id: u64) {
        state.deactivate();
        self.in_use.set(self.in_use.get() - 1);
        self.pool.borrow_mut().push(state);
        tracing::debug!(target: "pipeline", layout = %self.name, id, "pipeline recycled");
    }

    fn build_state(&self) -> PipelineState {
        let state = PipelineState::build(&self.templates.borrow());
        let mut live = self.live.borrow_mut();
        for node in state.nodes() {
            live.push(Rc::downgrade(node));
        }
        state
    }

    /// Cooperative drain: shut down the filter templates and every live
    /// filter instance cloned from them.
    pub fn shutdown(&self) {
        for template in self.templates.borrow().iter() {
            template.filter.borrow_mut().shutdown();
        }
        let mut live = self.live.borrow_mut();
        live.retain(|weak| match weak.upgrade() {
            Some(node) => {
                node.borrow_mut().shutdown();
                true
            }
            None => false,
        });
    }
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("filters", &self.filter_count())
            .field("allocated", &self.allocated.get())
            .field("in_use", &self.in_use.get())
            .finish()
    }
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod layout_test;
