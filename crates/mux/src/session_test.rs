//! Tests for session pooling and recycling
//!
//! Recycling tests run on a paused tokio clock: sleeping past the idle
//! deadline drives the pool's one-second tick deterministically.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use sluice_event::Event;
use sluice_pipeline::Input;
use tokio::task::LocalSet;

use crate::key::{KeyValue, SessionKey};
use crate::queue::QueueMuxer;
use crate::session::{MuxOptions, Multiplexer, PendingWaiter, SessionPool};

fn queue_muxer() -> Box<dyn Fn() -> Box<dyn Multiplexer>> {
    Box::new(|| Box::new(QueueMuxer::new()))
}

fn options(max_queue: i32, max_messages: i32, max_idle: Duration) -> MuxOptions {
    MuxOptions {
        max_idle,
        max_queue,
        max_messages,
    }
}

#[tokio::test]
async fn test_sequential_streams_reuse_one_session() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(1, 0, Duration::from_secs(60));

            let first = pool.alloc(SessionKey::from("backend"), opts.clone(), queue_muxer());
            assert_eq!(first.share_count(), 1);
            first.free();
            assert!(first.is_free());

            // The first stream completed, so the second reuses its session
            let second = pool.alloc(SessionKey::from("backend"), opts, queue_muxer());
            assert!(Rc::ptr_eq(&first, &second));
            assert_eq!(second.cluster_size(), 1);
            second.free();
        })
        .await;
}

#[tokio::test]
async fn test_concurrent_streams_over_max_queue_open_new_session() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(1, 0, Duration::from_secs(60));

            let first = pool.alloc(SessionKey::from("backend"), opts.clone(), queue_muxer());
            let second = pool.alloc(SessionKey::from("backend"), opts, queue_muxer());

            assert!(!Rc::ptr_eq(&first, &second));
            assert_eq!(first.cluster_size(), 2);

            first.free();
            second.free();
        })
        .await;
}

#[tokio::test]
async fn test_max_queue_unlimited_shares_one_session() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 0, Duration::from_secs(60));

            let key = SessionKey::from("up");
            let a = pool.alloc(key.clone(), opts.clone(), queue_muxer());
            let b = pool.alloc(key.clone(), opts.clone(), queue_muxer());
            let c = pool.alloc(key, opts, queue_muxer());

            assert!(Rc::ptr_eq(&a, &b));
            assert!(Rc::ptr_eq(&b, &c));
            assert_eq!(a.share_count(), 3);
            assert_eq!(a.message_count(), 3);

            a.free();
            b.free();
            c.free();
        })
        .await;
}

#[tokio::test]
async fn test_max_messages_retires_session() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 2, Duration::from_secs(60));

            let key = SessionKey::from("up");
            let a = pool.alloc(key.clone(), opts.clone(), queue_muxer());
            let b = pool.alloc(key.clone(), opts.clone(), queue_muxer());
            // Third allocation exceeds the message budget of the first session
            let c = pool.alloc(key, opts, queue_muxer());

            assert!(Rc::ptr_eq(&a, &b));
            assert!(!Rc::ptr_eq(&a, &c));

            a.free();
            b.free();
            c.free();
        })
        .await;
}

#[tokio::test]
async fn test_closed_session_is_skipped() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 0, Duration::from_secs(60));

            let key = SessionKey::from("up");
            let a = pool.alloc(key.clone(), opts.clone(), queue_muxer());

            // Link an empty shared pipeline: whatever goes in comes straight
            // back out on the reply side.
            let layout = sluice_pipeline::PipelineLayout::standalone("upstream", vec![]);
            let pipeline = layout.alloc(sluice_pipeline::Context::new(), Input::null());
            let upstream = pipeline.input_handle();
            a.link(pipeline);

            // A reply-side StreamEnd marks the session closed
            upstream.input(Event::StreamEnd(sluice_event::EndError::ConnectionReset));
            assert!(a.is_closed());

            // Allocation must skip the closed session and open a fresh one
            let b = pool.alloc(key, opts, queue_muxer());
            assert!(!Rc::ptr_eq(&a, &b));

            a.free();
            b.free();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_recycled_after_max_idle() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(1, 0, Duration::from_secs(2));

            let session = pool.alloc(SessionKey::from("idle"), opts, queue_muxer());
            assert_eq!(pool.cluster_count(), 1);
            session.free();

            // maxIdle = 2s: the session must be gone no later than 3s after
            // free_time (maxIdle + one tick)
            tokio::time::sleep(Duration::from_secs(4)).await;

            assert_eq!(pool.cluster_count(), 0);
            assert_eq!(session.cluster_size(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_session_survives_idle_deadline() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 0, Duration::from_secs(2));

            let session = pool.alloc(SessionKey::from("busy"), opts, queue_muxer());

            tokio::time::sleep(Duration::from_secs(10)).await;

            // Still shared: not recycled
            assert_eq!(pool.cluster_count(), 1);
            assert_eq!(session.share_count(), 1);

            session.free();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_forces_idle_drain() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            // A long idle window that would normally keep the session alive
            let opts = options(1, 0, Duration::from_secs(3600));

            let session = pool.alloc(SessionKey::from("draining"), opts, queue_muxer());
            session.free();

            pool.shutdown();
            tokio::time::sleep(Duration::from_secs(2)).await;

            assert_eq!(pool.cluster_count(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_weak_key_eviction_on_next_tick() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(1, 0, Duration::from_secs(3600));

            let origin: Rc<dyn Any> = Rc::new("inbound #1");
            let key = SessionKey::object(&origin);

            let session = pool.alloc(key, opts, queue_muxer());
            session.free();
            assert_eq!(pool.cluster_count(), 1);

            // The key object goes away; the cluster must be evicted from the
            // weak map and its sessions recycled at the next tick.
            drop(origin);
            tokio::time::sleep(Duration::from_secs(2)).await;

            assert_eq!(pool.cluster_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_value_and_object_keys_are_distinct_maps() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 0, Duration::from_secs(60));

            let origin: Rc<dyn Any> = Rc::new(42u32);
            let a = pool.alloc(SessionKey::from("k"), opts.clone(), queue_muxer());
            let b = pool.alloc(SessionKey::object(&origin), opts, queue_muxer());

            assert!(!Rc::ptr_eq(&a, &b));
            assert_eq!(pool.cluster_count(), 2);

            a.free();
            b.free();
        })
        .await;
}

#[tokio::test]
async fn test_pending_session_flushes_waiters() {
    LocalSet::new()
        .run_until(async {
            let pool = SessionPool::new();
            let opts = options(0, 0, Duration::from_secs(60));

            let session = pool.alloc(SessionKey::from("tls"), opts, queue_muxer());
            session.set_pending(true);

            struct Flag(Cell<bool>);
            impl PendingWaiter for Flag {
                fn on_session_ready(&self, _session: &Rc<crate::session::Session>) {
                    self.0.set(true);
                }
            }

            let flag = Rc::new(Flag(Cell::new(false)));
            session.add_waiter(Rc::clone(&flag) as Rc<dyn PendingWaiter>);

            assert!(!flag.0.get());
            session.set_pending(false);
            assert!(flag.0.get());

            session.free();
        })
        .await;
}

#[test]
fn test_key_value_display() {
    assert_eq!(KeyValue::Null.to_string(), "null");
    assert_eq!(KeyValue::from("a").to_string(), "a");
    assert_eq!(KeyValue::from(7i64).to_string(), "7");
    assert_eq!(
        KeyValue::Tuple(vec![KeyValue::from("a"), KeyValue::from(1i64)]).to_string(),
        "(a,1)"
    );
}
