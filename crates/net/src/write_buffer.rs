//! Bounded write buffer
//!
//! Serializes pipeline output toward a socket. The limit is enforced at
//! byte granularity: a write that straddles the limit keeps the bytes that
//! fit and tallies the rest in `discarded_data_size`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use sluice_event::Buffer;
use tokio::sync::Notify;

/// Outcome of one `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushResult {
    pub accepted: usize,
    pub discarded: usize,
    /// True exactly once: the push that first exceeded the limit.
    pub first_overflow: bool,
}

/// Byte queue between a pipeline and a socket write pump.
pub struct WriteBuffer {
    buffer: RefCell<Buffer>,
    limit: usize,
    discarded: Cell<u64>,
    overflowed: Cell<bool>,
    ended: Cell<bool>,
    notify: Rc<Notify>,
}

impl WriteBuffer {
    /// `limit` of 0 means unlimited.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: RefCell::new(Buffer::new()),
            limit,
            discarded: Cell::new(0),
            overflowed: Cell::new(false),
            ended: Cell::new(false),
            notify: Rc::new(Notify::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }

    /// Total bytes dropped against a full buffer over the connection's life.
    pub fn discarded_data_size(&self) -> u64 {
        self.discarded.get()
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.get()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }

    /// Queue bytes for the pump. Bytes beyond the limit are dropped and
    /// tallied; the pump is woken either way.
    pub fn push(&self, mut data: Buffer) -> PushResult {
        let offered = data.len();
        let mut accepted = offered;

        if self.limit > 0 {
            let used = self.buffer.borrow().len();
            let space = self.limit.saturating_sub(used);
            if offered > space {
                let kept = data.shift(space);
                accepted = kept.len();
                data = kept;
            }
        }

        let discarded = offered - accepted;
        let mut first_overflow = false;
        if discarded > 0 {
            self.discarded.set(self.discarded.get() + discarded as u64);
            if !self.overflowed.get() {
                self.overflowed.set(true);
                first_overflow = true;
            }
        }

        if accepted > 0 {
            self.buffer.borrow_mut().push_buffer(&data);
        }
        self.notify.notify_one();

        PushResult {
            accepted,
            discarded,
            first_overflow,
        }
    }

    /// Signal that no further bytes will be pushed; the pump flushes and
    /// shuts down the write side.
    pub fn end(&self) {
        self.ended.set(true);
        self.notify.notify_one();
    }

    /// Pop the next chunk for writing, if any.
    pub fn pop_chunk(&self) -> Option<Bytes> {
        let mut buffer = self.buffer.borrow_mut();
        let len = buffer.len();
        if len == 0 {
            return None;
        }
        let chunk = buffer.shift(len.min(sluice_event::DEFAULT_CHUNK_SIZE));
        Some(chunk.to_bytes())
    }

    /// Wait until there is something to write or the stream is ended.
    pub async fn wait(&self) {
        let notify = Rc::clone(&self.notify);
        notify.notified().await;
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

#[cfg(test)]
#[path = "write_buffer_test.rs"]
mod write_buffer_test;
