//! Turn-scoped input contexts
//!
//! A turn brackets one external stimulus (a socket read, a timer firing, an
//! accepted connection) and all of its synchronous consequences. Events are
//! queued FIFO and drained by the outermost scope; pipelines freed during
//! the turn are recycled only after the queue is empty. Nested scopes
//! flatten to the outermost release point.

use std::cell::RefCell;
use std::collections::VecDeque;

use sluice_event::Event;

use crate::input::Input;

thread_local! {
    static TURN: RefCell<Option<Turn>> = const { RefCell::new(None) };
}

#[derive(Default)]
struct Turn {
    queue: VecDeque<(Input, Event)>,
    deferred: Vec<Box<dyn FnOnce()>>,
}

/// Scope marker for one input turn.
///
/// Most callers never touch this directly: `Input::input()` opens a turn on
/// demand. External event sources (inbound reads, timers) use
/// `InputContext::run` to bracket a batch of deliveries so that deferred
/// releases happen once, at the end.
pub struct InputContext;

impl InputContext {
    /// Run `f` inside a turn. If a turn is already active, `f` simply joins
    /// it and the outermost scope keeps ownership of the drain.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        let is_outermost = TURN.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                *slot = Some(Turn::default());
                true
            } else {
                false
            }
        });

        let result = f();

        if is_outermost {
            drain();
            TURN.with(|cell| *cell.borrow_mut() = None);
        }

        result
    }
}

/// Whether a turn is currently active on this thread.
pub fn is_active() -> bool {
    TURN.with(|cell| cell.borrow().is_some())
}

/// Queue an event for delivery within the current turn, opening a turn if
/// none is active.
pub(crate) fn deliver(input: Input, evt: Event) {
    let rejected = TURN.with(move |cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(turn) => {
                turn.queue.push_back((input, evt));
                None
            }
            None => Some((input, evt)),
        }
    });
    if let Some((input, evt)) = rejected {
        InputContext::run(|| deliver(input, evt));
    }
}

/// Defer `f` to the end of the current turn (after all queued events have
/// been delivered), opening a turn if none is active.
pub fn defer(f: impl FnOnce() + 'static) {
    let rejected = TURN.with(move |cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(turn) => {
                turn.deferred.push(Box::new(f));
                None
            }
            None => Some(f),
        }
    });
    if let Some(f) = rejected {
        InputContext::run(|| defer(f));
    }
}

fn drain() {
    loop {
        // Pop outside of delivery so sinks can enqueue freely.
        let item = TURN.with(|cell| {
            cell.borrow_mut()
                .as_mut()
                .and_then(|turn| turn.queue.pop_front())
        });
        if let Some((input, evt)) = item {
            input.deliver_now(evt);
            continue;
        }

        // Queue empty: run deferred releases. A release may enqueue further
        // events (e.g. a final StreamEnd), so loop back to the queue.
        let release = TURN.with(|cell| {
            cell.borrow_mut()
                .as_mut()
                .and_then(|turn| turn.deferred.pop())
        });
        match release {
            Some(f) => f(),
            None => break,
        }
    }
}

#[cfg(test)]
#[path = "turn_test.rs"]
mod turn_test;
