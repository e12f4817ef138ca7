//! Tests for Event and message metadata

use std::rc::Rc;

use crate::{EndError, Event, MessageHead};

#[test]
fn test_end_error_display() {
    assert_eq!(EndError::Ok.to_string(), "ok");
    assert_eq!(EndError::ConnectionReset.to_string(), "connection-reset");
    assert_eq!(EndError::ConnectionRefused.to_string(), "connection-refused");
    assert_eq!(
        EndError::ConnectionTimeout.to_string(),
        "connection-timeout"
    );
    assert_eq!(EndError::ReadTimeout.to_string(), "read-timeout");
    assert_eq!(EndError::WriteTimeout.to_string(), "write-timeout");
    assert_eq!(EndError::BufferOverflow.to_string(), "buffer-overflow");
    assert_eq!(EndError::ProtocolError.to_string(), "protocol-error");
    assert_eq!(EndError::Replay.to_string(), "replay");
    assert_eq!(EndError::Unknown.to_string(), "unknown");
}

#[test]
fn test_end_error_retryable() {
    assert!(EndError::ConnectionRefused.is_retryable());
    assert!(EndError::ConnectionReset.is_retryable());
    assert!(EndError::ConnectionTimeout.is_retryable());
    assert!(!EndError::ReadTimeout.is_retryable());
    assert!(!EndError::Ok.is_retryable());
    assert!(!EndError::ProtocolError.is_retryable());
}

#[test]
fn test_head_fields() {
    let head = MessageHead::new()
        .with("id", 7)
        .with("method", "GET")
        .with("keepAlive", true);

    assert_eq!(head.get_i64("id"), Some(7));
    assert_eq!(head.get_str("method"), Some("GET"));
    assert_eq!(head.get("keepAlive").and_then(|v| v.as_bool()), Some(true));
    assert!(head.get("missing").is_none());
}

#[test]
fn test_clone_shares_head() {
    let head = Rc::new(MessageHead::new().with("id", 1));
    let evt = Event::MessageStart(Rc::clone(&head));
    let clone = evt.clone();

    match (&evt, &clone) {
        (Event::MessageStart(a), Event::MessageStart(b)) => {
            assert!(Rc::ptr_eq(a, b));
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_event_kind_names() {
    assert_eq!(Event::StreamStart.kind(), "StreamStart");
    assert_eq!(Event::message_start().kind(), "MessageStart");
    assert_eq!(Event::data(&b"x"[..]).kind(), "Data");
    assert_eq!(Event::message_end().kind(), "MessageEnd");
    assert_eq!(Event::StreamEnd(EndError::Ok).kind(), "StreamEnd");
}

#[test]
fn test_predicates() {
    assert!(Event::data(&b"x"[..]).is_data());
    assert!(Event::message_start().is_message_start());
    assert!(Event::message_end().is_message_end());
    assert!(Event::StreamEnd(EndError::Ok).is_stream_end());
    assert!(!Event::StreamStart.is_data());
}
