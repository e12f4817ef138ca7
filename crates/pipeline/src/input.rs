//! Event sinks and input handles
//!
//! An `Input` is a cheap clonable handle to anything that consumes events.
//! Delivery goes through the turn queue (see `turn`), so a sink is never
//! re-entered while it is already processing.

use std::cell::RefCell;
use std::rc::Rc;

use sluice_event::Event;

use crate::turn;

/// Anything that consumes events.
pub trait EventSink {
    fn on_event(&mut self, evt: Event);
}

/// Clonable handle to an event sink.
///
/// `input()` enqueues onto the current turn; the outermost `InputContext`
/// drains the queue in FIFO order.
#[derive(Clone)]
pub struct Input {
    sink: Rc<RefCell<dyn EventSink>>,
}

impl Input {
    pub fn new(sink: Rc<RefCell<dyn EventSink>>) -> Self {
        Self { sink }
    }

    /// An input that silently drops every event.
    pub fn null() -> Self {
        Self::new(Rc::new(RefCell::new(NullSink)))
    }

    /// Adapt a closure. Used by taps, endpoints, and tests.
    pub fn from_fn(f: impl FnMut(Event) + 'static) -> Self {
        Self::new(Rc::new(RefCell::new(FnSink(f))))
    }

    /// Deliver an event through the current turn.
    pub fn input(&self, evt: Event) {
        turn::deliver(self.clone(), evt);
    }

    /// Whether two handles point at the same sink.
    pub fn same_sink(&self, other: &Input) -> bool {
        Rc::ptr_eq(&self.sink, &other.sink)
    }

    pub(crate) fn deliver_now(&self, evt: Event) {
        self.sink.borrow_mut().on_event(evt);
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input").finish_non_exhaustive()
    }
}

struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _evt: Event) {}
}

struct FnSink<F>(F);

impl<F: FnMut(Event)> EventSink for FnSink<F> {
    fn on_event(&mut self, evt: Event) {
        (self.0)(evt);
    }
}
