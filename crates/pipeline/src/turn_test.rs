//! Tests for turn-scoped delivery

use std::cell::RefCell;
use std::rc::Rc;

use sluice_event::Event;

use super::{defer, is_active, InputContext};
use crate::input::Input;

#[test]
fn test_no_turn_outside_run() {
    assert!(!is_active());
    InputContext::run(|| assert!(is_active()));
    assert!(!is_active());
}

#[test]
fn test_nested_scopes_flatten() {
    InputContext::run(|| {
        assert!(is_active());
        InputContext::run(|| assert!(is_active()));
        // Still the same outer turn
        assert!(is_active());
    });
    assert!(!is_active());
}

#[test]
fn test_delivery_order_is_fifo() {
    let seen = Rc::new(RefCell::new(Vec::new()));

    let sink = {
        let seen = Rc::clone(&seen);
        Input::from_fn(move |evt| {
            if let Event::Data(data) = evt {
                seen.borrow_mut().push(data.to_bytes());
            }
        })
    };

    InputContext::run(|| {
        sink.input(Event::data(&b"1"[..]));
        sink.input(Event::data(&b"2"[..]));
        sink.input(Event::data(&b"3"[..]));
        // Nothing delivered until the outermost scope drains
        assert!(seen.borrow().is_empty());
    });

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert_eq!(&seen[0][..], b"1");
    assert_eq!(&seen[1][..], b"2");
    assert_eq!(&seen[2][..], b"3");
}

#[test]
fn test_input_without_turn_delivers_immediately() {
    let seen = Rc::new(RefCell::new(0u32));
    let sink = {
        let seen = Rc::clone(&seen);
        Input::from_fn(move |_| *seen.borrow_mut() += 1)
    };

    // No surrounding InputContext: input() opens and drains its own turn.
    sink.input(Event::StreamStart);
    assert_eq!(*seen.borrow(), 1);
}

#[test]
fn test_reentrant_delivery_preserves_per_edge_order() {
    // A sink that, upon the first event, feeds two more events to a second
    // sink. The second sink must see them in emission order.
    let seen = Rc::new(RefCell::new(Vec::new()));
    let second = {
        let seen = Rc::clone(&seen);
        Input::from_fn(move |evt| {
            if let Event::Data(d) = evt {
                seen.borrow_mut().push(d.to_bytes());
            }
        })
    };

    let first = {
        let second = second.clone();
        Input::from_fn(move |_| {
            second.input(Event::data(&b"a"[..]));
            second.input(Event::data(&b"b"[..]));
        })
    };

    InputContext::run(|| first.input(Event::StreamStart));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(&seen[0][..], b"a");
    assert_eq!(&seen[1][..], b"b");
}

#[test]
fn test_defer_runs_after_queued_events() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let sink = {
        let order = Rc::clone(&order);
        Input::from_fn(move |_| order.borrow_mut().push("event"))
    };

    InputContext::run(|| {
        {
            let order = Rc::clone(&order);
            defer(move || order.borrow_mut().push("deferred"));
        }
        sink.input(Event::StreamStart);
    });

    assert_eq!(*order.borrow(), vec!["event", "deferred"]);
}

#[test]
fn test_deferred_release_may_enqueue_more_events() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let sink = {
        let order = Rc::clone(&order);
        Input::from_fn(move |_| order.borrow_mut().push("late"))
    };

    InputContext::run(|| {
        let order = Rc::clone(&order);
        defer(move || {
            order.borrow_mut().push("release");
            sink.input(Event::StreamStart);
        });
    });

    // The event enqueued by the release is still drained before the turn ends.
    assert_eq!(*order.borrow(), vec!["release", "late"]);
}

#[test]
fn test_defer_without_turn_runs_inline() {
    let ran = Rc::new(RefCell::new(false));
    {
        let ran = Rc::clone(&ran);
        defer(move || *ran.borrow_mut() = true);
    }
    assert!(*ran.borrow());
}
