//! Demux filters
//!
//! Reverse of mux: for each inbound message on the shared transport, open a
//! fresh sub-pipeline instance, write the message into it, and forward its
//! reply back to the shared transport.
//!
//! `Demux::queue` preserves reply order: the head-of-queue reply streams
//! through as it arrives, replies that complete out of order are buffered
//! until every earlier reply has been forwarded. `Demux::unordered` forwards
//! each reply whole as it completes.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use sluice_event::{EndError, Event};
use sluice_pipeline::{Filter, FilterCx, Input, Pipeline};

#[derive(Clone, Copy, PartialEq)]
enum Ordering {
    Strict,
    Unordered,
}

/// Joint filter: one sub-pipeline instance per inbound message.
pub struct Demux {
    ordering: Ordering,
    shared: Rc<DemuxShared>,
    /// Stream currently receiving input events (between MessageStart and
    /// MessageEnd).
    current: Option<Rc<DemuxStream>>,
    shut: bool,
}

struct DemuxShared {
    ordering: Ordering,
    output: RefCell<Option<Input>>,
    queue: RefCell<VecDeque<Rc<DemuxStream>>>,
    eos: Cell<Option<EndError>>,
}

struct DemuxStream {
    pipeline: RefCell<Option<Pipeline>>,
    buffer: RefCell<Vec<Event>>,
    started: Cell<bool>,
    complete: Cell<bool>,
}

impl DemuxShared {
    fn new(ordering: Ordering) -> Rc<Self> {
        Rc::new(Self {
            ordering,
            output: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            eos: Cell::new(None),
        })
    }

    fn forward(&self, evt: Event) {
        if let Some(output) = self.output.borrow().as_ref() {
            output.input(evt);
        }
    }

    /// One reply event from a sub-pipeline.
    fn on_reply(&self, stream: &Rc<DemuxStream>, evt: Event) {
        let evt = match evt {
            Event::StreamStart => return,
            // A sub-pipeline failure terminates just that reply
            Event::StreamEnd(_) => {
                if !stream.started.get() {
                    stream.complete.set(true);
                    self.flush();
                    return;
                }
                Event::message_end()
            }
            other => other,
        };

        if evt.is_message_start() {
            stream.started.set(true);
        }
        let completes = evt.is_message_end();

        match self.ordering {
            Ordering::Strict => {
                let is_head = self
                    .queue
                    .borrow()
                    .front()
                    .map(|s| Rc::ptr_eq(s, stream))
                    .unwrap_or(false);
                if is_head {
                    self.forward(evt);
                } else {
                    stream.buffer.borrow_mut().push(evt);
                }
            }
            Ordering::Unordered => {
                stream.buffer.borrow_mut().push(evt);
            }
        }

        if completes {
            stream.complete.set(true);
            self.flush();
        }
    }

    /// Forward whatever is ready, in the configured order, then the pending
    /// end-of-stream once every reply is out.
    fn flush(&self) {
        match self.ordering {
            Ordering::Strict => loop {
                let head = self.queue.borrow().front().cloned();
                let Some(head) = head else { break };
                for evt in head.buffer.borrow_mut().drain(..) {
                    self.forward(evt);
                }
                if !head.complete.get() {
                    break;
                }
                self.queue.borrow_mut().pop_front();
                head.pipeline.borrow_mut().take();
            },
            Ordering::Unordered => {
                let done: Vec<Rc<DemuxStream>> = {
                    let queue = self.queue.borrow();
                    queue.iter().filter(|s| s.complete.get()).cloned().collect()
                };
                for stream in done {
                    for evt in stream.buffer.borrow_mut().drain(..) {
                        self.forward(evt);
                    }
                    self.queue
                        .borrow_mut()
                        .retain(|s| !Rc::ptr_eq(s, &stream));
                    stream.pipeline.borrow_mut().take();
                }
            }
        }

        if self.queue.borrow().is_empty() {
            if let Some(err) = self.eos.take() {
                self.forward(Event::StreamEnd(err));
            }
        }
    }
}

impl Demux {
    /// Strict reply ordering (`demuxQueue`).
    pub fn queue() -> Self {
        Self::new(Ordering::Strict)
    }

    /// Forward replies as they complete (`demux`).
    pub fn unordered() -> Self {
        Self::new(Ordering::Unordered)
    }

    fn new(ordering: Ordering) -> Self {
        Self {
            ordering,
            shared: DemuxShared::new(ordering),
            current: None,
            shut: false,
        }
    }
}

impl Filter for Demux {
    fn describe(&self) -> &'static str {
        match self.ordering {
            Ordering::Strict => "demux-queue",
            Ordering::Unordered => "demux",
        }
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new(self.ordering))
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        if self.shared.output.borrow().is_none() {
            *self.shared.output.borrow_mut() = Some(cx.output_handle());
        }

        match evt {
            Event::StreamStart => {}
            Event::MessageStart(_) => {
                if self.current.is_some() || self.shut {
                    return;
                }
                let stream = Rc::new(DemuxStream {
                    pipeline: RefCell::new(None),
                    buffer: RefCell::new(Vec::new()),
                    started: Cell::new(false),
                    complete: Cell::new(false),
                });

                let reply = {
                    let shared = Rc::clone(&self.shared);
                    let stream = Rc::clone(&stream);
                    Input::from_fn(move |evt| shared.on_reply(&stream, evt))
                };
                let pipeline = cx.sub_pipeline(0, reply);
                pipeline.input(evt);

                *stream.pipeline.borrow_mut() = Some(pipeline);
                self.shared.queue.borrow_mut().push_back(Rc::clone(&stream));
                self.current = Some(stream);
            }
            Event::Data(_) => {
                if let Some(stream) = &self.current {
                    if let Some(pipeline) = stream.pipeline.borrow().as_ref() {
                        pipeline.input(evt);
                    }
                }
            }
            Event::MessageEnd(_) => {
                if let Some(stream) = self.current.take() {
                    if let Some(pipeline) = stream.pipeline.borrow().as_ref() {
                        pipeline.input(evt);
                    }
                }
            }
            Event::StreamEnd(err) => {
                self.shut = true;
                self.current = None;
                self.shared.eos.set(Some(err));
                self.shared.flush();
            }
        }
    }

    fn reset(&mut self) {
        self.current = None;
        self.shut = false;
        self.shared.queue.borrow_mut().clear();
        self.shared.eos.set(None);
        *self.shared.output.borrow_mut() = None;
    }

    fn shutdown(&mut self) {
        self.shut = true;
    }
}

#[cfg(test)]
#[path = "demux_test.rs"]
mod demux_test;
