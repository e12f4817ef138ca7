//! Per-stream context
//!
//! Every pipeline instance runs under a `Context`: a numbered scope carrying
//! the originating endpoint (used by mux filters for default session keying)
//! and a small bag of named variables that filters may read and write.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Stream-scoped state shared by a pipeline and its sub-pipelines.
pub struct Context {
    id: u64,
    origin: RefCell<Option<Rc<dyn Any>>>,
    vars: RefCell<serde_json::Map<String, Value>>,
}

impl Context {
    /// A fresh context with a worker-unique id.
    pub fn new() -> Rc<Self> {
        let id = NEXT_ID.with(|n| {
            let id = n.get();
            n.set(id + 1);
            id
        });
        Rc::new(Self {
            id,
            origin: RefCell::new(None),
            vars: RefCell::new(serde_json::Map::new()),
        })
    }

    /// A fresh context whose origin is the given endpoint object.
    pub fn with_origin(origin: Rc<dyn Any>) -> Rc<Self> {
        let ctx = Self::new();
        *ctx.origin.borrow_mut() = Some(origin);
        ctx
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The endpoint this stream originated from, if any. Mux filters use
    /// this as the default session key.
    pub fn origin(&self) -> Option<Rc<dyn Any>> {
        self.origin.borrow().clone()
    }

    pub fn set_origin(&self, origin: Rc<dyn Any>) {
        *self.origin.borrow_mut() = Some(origin);
    }

    pub fn set_var(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.borrow_mut().insert(key.into(), value.into());
    }

    pub fn var(&self, key: &str) -> Option<Value> {
        self.vars.borrow().get(key).cloned()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}
