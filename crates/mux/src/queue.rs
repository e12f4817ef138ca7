//! Queue muxer
//!
//! In-order request/response correlation atop a session, for protocols with
//! strict request→response ordering on one transport.
//!
//! A stream buffers `MessageStart` + `Data`* locally; on `MessageEnd` the
//! whole message is emitted to the shared transport and the stream is
//! enqueued. Replies are routed to the head-of-queue stream in order. A
//! one-way stream never enqueues; a dedicated stream claims the transport
//! for the remainder of the session.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use sluice_event::{Buffer, Event, MessageHead};
use sluice_pipeline::Input;

use crate::session::{MuxStream, Multiplexer};

/// Strict-order multiplexer. One per session.
pub struct QueueMuxer {
    inner: Rc<QueueInner>,
}

struct QueueInner {
    /// Streams awaiting replies, in emit order.
    streams: RefCell<VecDeque<Rc<QueueStream>>>,
    /// Input of the shared pipeline (set by `open`).
    output: RefCell<Option<Input>>,
    dedicated: Cell<bool>,
}

impl QueueInner {
    fn emit(&self, evt: Event) {
        if let Some(output) = self.output.borrow().as_ref() {
            output.input(evt);
        }
    }
}

impl QueueMuxer {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueueInner {
                streams: RefCell::new(VecDeque::new()),
                output: RefCell::new(None),
                dedicated: Cell::new(false),
            }),
        }
    }

    /// Streams currently awaiting replies.
    pub fn queued_streams(&self) -> usize {
        self.inner.streams.borrow().len()
    }

    /// Register another expected reply for the head-of-queue stream, for
    /// protocols that pipeline multiple replies per request.
    pub fn increase_queue_count(&self) {
        if let Some(head) = self.inner.streams.borrow().front() {
            head.queued_count.set(head.queued_count.get() + 1);
        }
    }
}

impl Default for QueueMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for QueueMuxer {
    fn open(&self, session_input: Input) {
        *self.inner.output.borrow_mut() = Some(session_input);
    }

    /// Route one reply event to the head-of-queue stream.
    fn on_reply(&self, evt: Event) {
        let inner = &self.inner;

        if inner.dedicated.get() {
            if let Some(head) = inner.streams.borrow().front().cloned() {
                head.dedicated.set(true);
                head.output.borrow().input(evt);
            }
            return;
        }

        match evt {
            Event::MessageStart(_) => {
                if let Some(head) = inner.streams.borrow().front() {
                    // Idempotent on the first replied MessageStart
                    if !head.started.get() {
                        head.started.set(true);
                        head.output.borrow().input(evt);
                    }
                }
            }
            Event::Data(_) => {
                if let Some(head) = inner.streams.borrow().front() {
                    if head.started.get() {
                        head.output.borrow().input(evt);
                    }
                }
            }
            Event::MessageEnd(_) => {
                let head = inner.streams.borrow().front().cloned();
                if let Some(head) = head {
                    if head.started.get() {
                        let remaining = head.queued_count.get() - 1;
                        head.queued_count.set(remaining);
                        if remaining == 0 {
                            // Final reply: dequeue and close the stream
                            inner.streams.borrow_mut().pop_front();
                            head.output.borrow().input(evt);
                        } else {
                            head.started.set(false);
                            head.output.borrow().input(evt);
                        }
                    }
                }
            }
            Event::StreamEnd(_) => {
                // The shared transport died: every queued stream gets a
                // synthetic MessageStart (if not yet started) plus the end.
                let streams = std::mem::take(&mut *inner.streams.borrow_mut());
                for stream in streams {
                    if !stream.started.get() {
                        stream.output.borrow().input(Event::message_start());
                    }
                    stream.output.borrow().input(evt.clone());
                }
            }
            Event::StreamStart => {}
        }
    }

    fn open_stream(&self, output: Input) -> Rc<dyn MuxStream> {
        Rc::new_cyclic(|this| QueueStream {
            muxer: Rc::downgrade(&self.inner),
            this: this.clone(),
            output: RefCell::new(output),
            start: RefCell::new(None),
            buffer: RefCell::new(Buffer::new()),
            queued_count: Cell::new(0),
            one_way: Cell::new(false),
            started: Cell::new(false),
            dedicated: Cell::new(false),
        })
    }

    fn close_stream(&self, stream: &Rc<dyn MuxStream>) {
        if let Some(stream) = stream.as_any().downcast_ref::<QueueStream>() {
            // Unchain: replies addressed to a closed caller are dropped.
            // The stream itself stays queued until its reply arrives so
            // ordering for the streams behind it is preserved.
            *stream.output.borrow_mut() = Input::null();
        }
    }

    fn set_one_way(&self, stream: &Rc<dyn MuxStream>) {
        if let Some(stream) = stream.as_any().downcast_ref::<QueueStream>() {
            stream.one_way.set(true);
        }
    }

    fn dedicate(&self) {
        self.inner.dedicated.set(true);
    }

    fn close(&self) {
        self.inner.streams.borrow_mut().clear();
        self.inner.dedicated.set(false);
        *self.inner.output.borrow_mut() = None;
    }
}

/// One logical request/response over the shared transport.
///
/// Retained while (a) the caller has not closed it and (b) it is enqueued
/// for a reply.
struct QueueStream {
    muxer: Weak<QueueInner>,
    this: Weak<QueueStream>,
    output: RefCell<Input>,
    start: RefCell<Option<Rc<MessageHead>>>,
    buffer: RefCell<Buffer>,
    queued_count: Cell<u32>,
    one_way: Cell<bool>,
    started: Cell<bool>,
    dedicated: Cell<bool>,
}

impl MuxStream for QueueStream {
    fn write(&self, evt: Event) {
        let Some(muxer) = self.muxer.upgrade() else {
            return;
        };

        if self.dedicated.get() {
            muxer.emit(evt);
            return;
        }

        match evt {
            Event::MessageStart(head) => {
                let mut start = self.start.borrow_mut();
                if start.is_none() {
                    *start = Some(head);
                }
            }
            Event::Data(data) => {
                if self.start.borrow().is_some() && self.queued_count.get() == 0 {
                    self.buffer.borrow_mut().push_buffer(&data);
                }
            }
            Event::MessageEnd(_) | Event::StreamEnd(_) => {
                let start = self.start.borrow().clone();
                if let Some(head) = start {
                    if self.queued_count.get() == 0 {
                        self.queued_count.set(1);
                        if !self.one_way.get() {
                            if let Some(me) = self.this.upgrade() {
                                muxer.streams.borrow_mut().push_back(me);
                            }
                        }
                        muxer.emit(Event::MessageStart(head));
                        let body = self.buffer.borrow_mut().take();
                        if !body.is_empty() {
                            muxer.emit(Event::Data(body));
                        }
                        let end = match evt {
                            Event::MessageEnd(tail) => Event::MessageEnd(tail),
                            _ => Event::message_end(),
                        };
                        muxer.emit(end);
                    }
                }
            }
            Event::StreamStart => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
