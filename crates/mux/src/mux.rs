//! Mux filters
//!
//! `Mux::queue` replaces each stream with its correlated reply from a shared
//! session (`muxQueue` semantics); `Mux::merge` copies the stream into the
//! shared session and passes events through unchanged (`mux` semantics;
//! merge streams are one-way by construction).
//!
//! Per-invocation life, on the first event:
//! 1. evaluate the session selector (default: the stream's origin endpoint
//!    as a weak object key),
//! 2. allocate a session from the shared pool,
//! 3. link the session's shared sub-pipeline if it has none yet,
//! 4. queue behind a pending session, buffering input locally,
//! 5. open a stream chained to the filter's output.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sluice_event::{Event, MessageHead};
use sluice_pipeline::{Context, Filter, FilterCx, Input};

use crate::key::{KeyValue, SessionKey};
use crate::queue::QueueMuxer;
use crate::session::{MuxOptions, MuxStream, Multiplexer, PendingWaiter, Session, SessionPool};

/// Maps a stream's context to its session key. `None` falls back to the
/// default keying.
pub type SessionSelector = Rc<dyn Fn(&Context) -> Option<SessionKey>>;

#[derive(Clone, Copy, PartialEq)]
enum MuxKind {
    Queue,
    Merge,
}

/// Joint filter coalescing streams onto pooled shared sessions.
pub struct Mux {
    kind: MuxKind,
    name: &'static str,
    pool: Rc<SessionPool>,
    make_muxer: Rc<dyn Fn() -> Box<dyn Multiplexer>>,
    selector: Option<SessionSelector>,
    options: MuxOptions,
    one_way: Option<Rc<dyn Fn(&MessageHead) -> bool>>,
    core: Rc<MuxCore>,
    started: bool,
}

/// Per-instance mux state, shared with the session's waiting list while the
/// session is pending.
struct MuxCore {
    session: RefCell<Option<Rc<Session>>>,
    stream: RefCell<Option<Rc<dyn MuxStream>>>,
    output: RefCell<Option<Input>>,
    key: RefCell<Option<SessionKey>>,
    waiting: Cell<bool>,
    buffered: RefCell<Vec<Event>>,
    one_way_all: bool,
}

impl MuxCore {
    fn new(one_way_all: bool) -> Rc<Self> {
        Rc::new(Self {
            session: RefCell::new(None),
            stream: RefCell::new(None),
            output: RefCell::new(None),
            key: RefCell::new(None),
            waiting: Cell::new(false),
            buffered: RefCell::new(Vec::new()),
            one_way_all,
        })
    }

    fn open_stream_on(&self, session: &Rc<Session>) {
        if self.stream.borrow().is_some() {
            return;
        }
        let Some(output) = self.output.borrow().clone() else {
            return;
        };
        let stream = session.open_stream(output);
        if self.one_way_all {
            session.muxer().set_one_way(&stream);
        }
        *self.stream.borrow_mut() = Some(stream);
    }

    fn write(&self, evt: Event) {
        if self.waiting.get() {
            self.buffered.borrow_mut().push(evt);
        } else if let Some(stream) = self.stream.borrow().clone() {
            stream.write(evt);
        }
    }
}

impl PendingWaiter for MuxCore {
    fn on_session_ready(&self, session: &Rc<Session>) {
        self.waiting.set(false);
        self.open_stream_on(session);
        let buffered = std::mem::take(&mut *self.buffered.borrow_mut());
        if let Some(stream) = self.stream.borrow().clone() {
            for evt in buffered {
                stream.write(evt);
            }
        }
    }
}

impl Mux {
    /// Strict request→response correlation (`muxQueue`).
    pub fn queue(options: MuxOptions) -> Self {
        Self::new(MuxKind::Queue, "mux-queue", options, || {
            Box::new(QueueMuxer::new())
        })
    }

    /// Merge-only muxing (`mux`): events also pass through downstream.
    pub fn merge(options: MuxOptions) -> Self {
        Self::new(MuxKind::Merge, "mux", options, || Box::new(QueueMuxer::new()))
    }

    /// A mux filter whose sessions use a protocol-specific multiplexer
    /// (e.g. FastCGI id-based correlation).
    pub fn custom(
        name: &'static str,
        options: MuxOptions,
        make_muxer: impl Fn() -> Box<dyn Multiplexer> + 'static,
    ) -> Self {
        Self::new(MuxKind::Queue, name, options, make_muxer)
    }

    fn new(
        kind: MuxKind,
        name: &'static str,
        options: MuxOptions,
        make_muxer: impl Fn() -> Box<dyn Multiplexer> + 'static,
    ) -> Self {
        Self {
            kind,
            name,
            pool: SessionPool::new(),
            make_muxer: Rc::new(make_muxer),
            selector: None,
            options,
            one_way: None,
            core: MuxCore::new(kind == MuxKind::Merge),
            started: false,
        }
    }

    /// Override the session key derivation.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Fn(&Context) -> Option<SessionKey> + 'static) -> Self {
        self.selector = Some(Rc::new(selector));
        self
    }

    /// Predicate on the first `MessageStart`: when true, the stream expects
    /// no reply.
    #[must_use]
    pub fn with_one_way(mut self, predicate: impl Fn(&MessageHead) -> bool + 'static) -> Self {
        self.one_way = Some(Rc::new(predicate));
        self
    }

    /// The session pool shared by every instance cloned from this template.
    pub fn pool(&self) -> &Rc<SessionPool> {
        &self.pool
    }

    fn select_key(&self, cx: &FilterCx<'_>) -> SessionKey {
        if let Some(selector) = &self.selector {
            if let Some(key) = selector(cx.context()) {
                return key;
            }
        }
        match cx.context().origin() {
            Some(origin) => SessionKey::object(&origin),
            None => SessionKey::Value(KeyValue::Null),
        }
    }

    fn open_stream(&mut self, cx: &mut FilterCx<'_>) {
        let core = Rc::clone(&self.core);
        if core.stream.borrow().is_some() || core.waiting.get() {
            return;
        }

        if core.output.borrow().is_none() {
            *core.output.borrow_mut() = Some(cx.output_handle());
        }

        let session = {
            let existing = core.session.borrow().clone();
            match existing {
                Some(session) => session,
                None => {
                    let key = self.select_key(cx);
                    let make_muxer = Rc::clone(&self.make_muxer);
                    let session = self.pool.alloc(
                        key.clone(),
                        self.options.clone(),
                        Box::new(move || make_muxer()),
                    );
                    *core.key.borrow_mut() = Some(key);
                    *core.session.borrow_mut() = Some(Rc::clone(&session));
                    session
                }
            }
        };

        if !session.has_pipeline() {
            let context = Context::new();
            if let Some(key) = core.key.borrow().as_ref() {
                context.set_var("mux.key", key.to_string());
            }
            context.set_var("mux.cluster_size", session.cluster_size() as i64);
            let pipeline = cx.sub_layout(0).alloc(context, Input::null());
            session.link(pipeline);
        }

        if session.is_pending() {
            core.waiting.set(true);
            session.add_waiter(core as Rc<dyn PendingWaiter>);
            return;
        }

        core.open_stream_on(&session);
    }
}

impl Filter for Mux {
    fn describe(&self) -> &'static str {
        self.name
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self {
            kind: self.kind,
            name: self.name,
            pool: Rc::clone(&self.pool),
            make_muxer: Rc::clone(&self.make_muxer),
            selector: self.selector.clone(),
            options: self.options.clone(),
            one_way: self.one_way.clone(),
            core: MuxCore::new(self.kind == MuxKind::Merge),
            started: false,
        })
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        self.open_stream(cx);

        if self.kind == MuxKind::Queue && !self.started {
            if let Event::MessageStart(head) = &evt {
                if let Some(predicate) = &self.one_way {
                    if predicate(head) {
                        let session = self.core.session.borrow().clone();
                        let stream = self.core.stream.borrow().clone();
                        if let (Some(session), Some(stream)) = (session, stream) {
                            session.muxer().set_one_way(&stream);
                        }
                    }
                }
                self.started = true;
            }
        }

        match self.kind {
            MuxKind::Queue => self.core.write(evt),
            MuxKind::Merge => {
                self.core.write(evt.clone());
                cx.output(evt);
            }
        }
    }

    fn reset(&mut self) {
        let core = &self.core;
        if let Some(session) = core.session.borrow_mut().take() {
            if core.waiting.get() {
                let waiter = Rc::clone(core) as Rc<dyn PendingWaiter>;
                session.remove_waiter(&waiter);
                core.waiting.set(false);
            }
            if let Some(stream) = core.stream.borrow_mut().take() {
                session.close_stream(&stream);
            }
            session.free();
        }
        core.buffered.borrow_mut().clear();
        *core.output.borrow_mut() = None;
        *core.key.borrow_mut() = None;
        self.started = false;
    }

    fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
#[path = "mux_test.rs"]
mod mux_test;
