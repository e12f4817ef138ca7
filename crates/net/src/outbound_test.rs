//! Tests for Outbound: connect, retry, timeouts, overflow accounting

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use sluice_event::{Buffer, EndError, Event};
use sluice_pipeline::Input;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::LocalSet;

use crate::{Outbound, OutboundOptions, OutboundState};

fn capture() -> (Input, Rc<RefCell<Vec<Event>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let events = Rc::clone(&events);
        Input::from_fn(move |evt| events.borrow_mut().push(evt))
    };
    (sink, events)
}

fn end_error(events: &[Event]) -> Option<EndError> {
    events.iter().find_map(|evt| match evt {
        Event::StreamEnd(err) => Some(*err),
        _ => None,
    })
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// One-shot upstream: accepts a connection, echoes everything back.
async fn spawn_echo_server() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::task::spawn_local(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    port
}

#[tokio::test]
async fn test_connect_send_receive_end() {
    LocalSet::new()
        .run_until(async {
            let port = spawn_echo_server().await;

            let (sink, events) = capture();
            let outbound = Outbound::new(sink, OutboundOptions::default());
            assert_eq!(outbound.state(), OutboundState::Idle);

            outbound.connect("127.0.0.1", port);
            wait_for(|| outbound.connected()).await;
            assert_eq!(outbound.state(), OutboundState::Connected);
            assert!(outbound.address().is_some());

            outbound.send(Buffer::from(&b"ping"[..]));
            wait_for(|| {
                events
                    .borrow()
                    .iter()
                    .any(|evt| matches!(evt, Event::Data(d) if d.len() == 4))
            })
            .await;

            // Half-close: flush then shutdown write
            outbound.end();
            wait_for(|| end_error(&events.borrow()).is_some()).await;
            // Echo server closes after our FIN → remote close after drain
            assert_eq!(end_error(&events.borrow()), Some(EndError::Ok));
            assert_eq!(outbound.state(), OutboundState::Closed);
        })
        .await;
}

#[tokio::test]
async fn test_connection_refused_with_retries() {
    LocalSet::new()
        .run_until(async {
            // Reserve a port nothing is listening on
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = probe.local_addr().unwrap().port();
            drop(probe);

            let (sink, events) = capture();
            let outbound = Outbound::new(
                sink,
                OutboundOptions {
                    retry_count: 2,
                    retry_delay: Duration::from_millis(10),
                    ..Default::default()
                },
            );
            outbound.connect("127.0.0.1", port);

            wait_for(|| end_error(&events.borrow()).is_some()).await;
            assert_eq!(
                end_error(&events.borrow()),
                Some(EndError::ConnectionRefused)
            );
            assert_eq!(outbound.retries(), 2);
            assert_eq!(outbound.state(), OutboundState::Closed);
        })
        .await;
}

#[tokio::test]
async fn test_no_retry_by_default() {
    LocalSet::new()
        .run_until(async {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = probe.local_addr().unwrap().port();
            drop(probe);

            let (sink, events) = capture();
            let outbound = Outbound::new(sink, OutboundOptions::default());
            outbound.connect("127.0.0.1", port);

            wait_for(|| end_error(&events.borrow()).is_some()).await;
            assert_eq!(outbound.retries(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_read_timeout_ends_stream() {
    LocalSet::new()
        .run_until(async {
            // A server that accepts but never writes
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            tokio::task::spawn_local(async move {
                let (_stream, _) = listener.accept().await.unwrap();
                tokio::time::sleep(Duration::from_secs(10)).await;
            });

            let (sink, events) = capture();
            let outbound = Outbound::new(
                sink,
                OutboundOptions {
                    read_timeout: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            );
            outbound.connect("127.0.0.1", port);

            wait_for(|| end_error(&events.borrow()).is_some()).await;
            assert_eq!(end_error(&events.borrow()), Some(EndError::ReadTimeout));
            assert_eq!(outbound.state(), OutboundState::Closed);
        })
        .await;
}

#[tokio::test]
async fn test_buffer_overflow_accounting() {
    LocalSet::new()
        .run_until(async {
            let (sink, events) = capture();
            let outbound = Outbound::new(
                sink,
                OutboundOptions {
                    buffer_limit: 1024,
                    ..Default::default()
                },
            );

            // 4096 bytes offered in one turn with nothing draining the
            // buffer: 1024 kept, the rest tallied
            outbound.send(Buffer::from(vec![0u8; 4096]));

            assert!(outbound.overflowed());
            assert!(outbound.discarded_data_size() >= 3072);
            assert_eq!(
                end_error(&events.borrow()),
                Some(EndError::BufferOverflow)
            );

            // Further writes are dropped silently, counter preserved
            outbound.send(Buffer::from(vec![0u8; 100]));
            assert_eq!(outbound.discarded_data_size(), 3072 + 100);
            let ends = events
                .borrow()
                .iter()
                .filter(|evt| evt.is_stream_end())
                .count();
            assert_eq!(ends, 1);
        })
        .await;
}

#[tokio::test]
async fn test_connect_timeout() {
    LocalSet::new()
        .run_until(async {
            // RFC 5737 TEST-NET-1: non-routable, connect hangs
            let (sink, events) = capture();
            let outbound = Outbound::new(
                sink,
                OutboundOptions {
                    connect_timeout: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            );
            outbound.connect("192.0.2.1", 9);

            wait_for(|| end_error(&events.borrow()).is_some()).await;
            assert_eq!(
                end_error(&events.borrow()),
                Some(EndError::ConnectionTimeout)
            );
        })
        .await;
}
