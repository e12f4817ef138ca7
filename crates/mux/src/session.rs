//! Session pooling
//!
//! A `Session` is a shared back-channel to a single upstream: one sub-pipeline
//! reused by many logical streams. Sessions for the same key form a
//! `SessionCluster`, ordered by ascending share count so the least-loaded
//! reusable session is at the head. Clusters live in a `SessionPool`, which
//! runs the recycling tick.
//!
//! Lifecycle invariants:
//! - while `share_count > 0` a session is never recycled;
//! - at `share_count == 0` the session records `free_time` and enters the
//!   idle window governed by `max_idle`;
//! - the pool tick (every second) unlinks sessions that are closed, over
//!   their message budget, idle past the deadline, or whose weak key object
//!   is gone; shutdown treats every idle deadline as already expired.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use sluice_event::{EndError, Event};
use sluice_pipeline::{Input, InputContext, Pipeline};
use tokio::time::Instant;

use crate::key::{KeyValue, SessionKey};

/// Options governing session selection and recycling.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Idle window before a free session is recycled.
    pub max_idle: Duration,
    /// Maximum concurrent streams per session (≤ 0 = unlimited).
    pub max_queue: i32,
    /// Maximum messages per session before it is retired (≤ 0 = unlimited).
    pub max_messages: i32,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(60),
            max_queue: 1,
            max_messages: 0,
        }
    }
}

/// A logical stream opened on a session.
pub trait MuxStream {
    /// Feed one event from the caller into the stream.
    fn write(&self, evt: Event);

    fn as_any(&self) -> &dyn Any;
}

/// Protocol-specific multiplexing strategy carried by a session.
///
/// The queue muxer implements strict request→response ordering; the FastCGI
/// client correlates by request id instead.
pub trait Multiplexer {
    /// Wire the shared pipeline's input. Stream traffic goes here.
    fn open(&self, session_input: Input);

    /// Route one reply event arriving from the shared pipeline.
    fn on_reply(&self, evt: Event);

    /// Open a logical stream whose replies go to `output`.
    fn open_stream(&self, output: Input) -> Rc<dyn MuxStream>;

    /// Close a stream previously opened.
    fn close_stream(&self, stream: &Rc<dyn MuxStream>);

    /// Mark a stream as expecting no reply.
    fn set_one_way(&self, _stream: &Rc<dyn MuxStream>) {}

    /// Claim the transport exclusively for the head stream.
    fn dedicate(&self) {}

    /// Tear down when the session unlinks.
    fn close(&self);
}

/// Notified when a pending session becomes ready.
pub trait PendingWaiter {
    fn on_session_ready(&self, session: &Rc<Session>);
}

/// A shared upstream reused by multiple logical streams.
pub struct Session {
    this: Weak<Session>,
    muxer: Box<dyn Multiplexer>,
    share_count: Cell<i32>,
    message_count: Cell<i32>,
    free_time: Cell<Option<Instant>>,
    is_closed: Cell<bool>,
    is_pending: Cell<bool>,
    pipeline: RefCell<Option<Pipeline>>,
    cluster: RefCell<Option<Weak<SessionCluster>>>,
    waiting: RefCell<Vec<Rc<dyn PendingWaiter>>>,
}

impl Session {
    fn new(muxer: Box<dyn Multiplexer>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            muxer,
            share_count: Cell::new(0),
            message_count: Cell::new(0),
            free_time: Cell::new(None),
            is_closed: Cell::new(false),
            is_pending: Cell::new(false),
            pipeline: RefCell::new(None),
            cluster: RefCell::new(None),
            waiting: RefCell::new(Vec::new()),
        })
    }

    pub fn share_count(&self) -> i32 {
        self.share_count.get()
    }

    pub fn message_count(&self) -> i32 {
        self.message_count.get()
    }

    pub fn is_free(&self) -> bool {
        self.share_count.get() <= 0
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.get()
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending.get()
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.borrow().is_some()
    }

    /// Number of sessions in this session's cluster (including this one).
    pub fn cluster_size(&self) -> usize {
        self.cluster
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|c| c.session_count())
            .unwrap_or(0)
    }

    pub fn muxer(&self) -> &dyn Multiplexer {
        self.muxer.as_ref()
    }

    /// Mark the session pending (e.g. mid-handshake). Clearing the flag
    /// flushes every waiting muxer.
    pub fn set_pending(&self, pending: bool) {
        if pending == self.is_pending.get() {
            return;
        }
        self.is_pending.set(pending);
        if !pending {
            let Some(this) = self.this.upgrade() else {
                return;
            };
            let waiters = std::mem::take(&mut *self.waiting.borrow_mut());
            for waiter in waiters {
                waiter.on_session_ready(&this);
            }
        }
    }

    pub(crate) fn add_waiter(&self, waiter: Rc<dyn PendingWaiter>) {
        self.waiting.borrow_mut().push(waiter);
    }

    pub(crate) fn remove_waiter(&self, waiter: &Rc<dyn PendingWaiter>) {
        self.waiting
            .borrow_mut()
            .retain(|w| !Rc::ptr_eq(w, waiter));
    }

    /// Attach the shared sub-pipeline: stream traffic flows into it, its
    /// output is routed back through the muxer's reply path.
    ///
    /// The reply chain holds only a weak back-pointer, so session → pipeline
    /// → session never forms a strong cycle.
    pub fn link(&self, pipeline: Pipeline) {
        let weak = self.this.clone();
        pipeline.chain(Input::from_fn(move |evt| {
            if let Some(session) = weak.upgrade() {
                session.on_reply(evt);
            }
        }));
        self.muxer.open(pipeline.input_handle());
        *self.pipeline.borrow_mut() = Some(pipeline);
    }

    /// Detach the shared pipeline: send it a final `StreamEnd` and release
    /// it (deferred to the end of the turn).
    pub(crate) fn unlink(&self) {
        if let Some(pipeline) = self.pipeline.borrow_mut().take() {
            self.muxer.close();
            pipeline.input(Event::StreamEnd(EndError::Ok));
            tracing::debug!(target: "mux", pipeline = pipeline.id(), "session unlinked");
        }
    }

    /// Give up one share. The cluster re-sorts and, at zero shares, the
    /// session enters its idle window.
    pub fn free(&self) {
        let cluster = self.cluster.borrow().as_ref().and_then(Weak::upgrade);
        match cluster {
            Some(cluster) => cluster.free(self),
            None => self.unlink(),
        }
    }

    /// Remove this session from its cluster.
    pub(crate) fn detach(&self) {
        let cluster = self.cluster.borrow_mut().take().and_then(|c| c.upgrade());
        if let Some(cluster) = cluster {
            cluster.discard(self);
        }
    }

    pub fn open_stream(&self, output: Input) -> Rc<dyn MuxStream> {
        self.muxer.open_stream(output)
    }

    pub fn close_stream(&self, stream: &Rc<dyn MuxStream>) {
        self.muxer.close_stream(stream);
    }

    fn on_reply(&self, evt: Event) {
        let is_end = evt.is_stream_end();
        self.muxer.on_reply(evt);
        if is_end {
            self.is_closed.set(true);
        }
    }
}

pub(crate) enum RecycleNow {
    At(Instant),
    /// Shutdown: every idle deadline counts as expired.
    Forced,
}

impl RecycleNow {
    fn expired(&self, free_time: Option<Instant>, max_idle: Duration) -> bool {
        match self {
            Self::Forced => true,
            Self::At(now) => match free_time {
                Some(t) => now.saturating_duration_since(t) >= max_idle,
                None => false,
            },
        }
    }
}

/// All sessions sharing one key, ordered by ascending share count.
pub struct SessionCluster {
    this: Weak<SessionCluster>,
    key: SessionKey,
    options: MuxOptions,
    make_muxer: Box<dyn Fn() -> Box<dyn Multiplexer>>,
    sessions: RefCell<Vec<Rc<Session>>>,
    pool: Weak<SessionPool>,
    weak_gone: Cell<bool>,
    recycle_scheduled: Cell<bool>,
}

impl SessionCluster {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn options(&self) -> &MuxOptions {
        &self.options
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Pick the least-loaded reusable session, or open a new one.
    ///
    /// The walk starts at the head (lowest share count) and takes the first
    /// open session within the queue and message budgets.
    pub fn alloc(&self) -> Rc<Session> {
        let max_queue = self.options.max_queue;
        let max_messages = self.options.max_messages;

        let found = self.sessions.borrow().iter().find_map(|s| {
            if s.is_closed() {
                return None;
            }
            let fits_queue = max_queue <= 0 || s.share_count() < max_queue;
            let fits_messages = max_messages <= 0 || s.message_count() < max_messages;
            (fits_queue && fits_messages).then(|| Rc::clone(s))
        });

        if let Some(session) = found {
            session.share_count.set(session.share_count.get() + 1);
            session.message_count.set(session.message_count.get() + 1);
            session.free_time.set(None);
            self.sort(&session);
            return session;
        }

        let session = Session::new((self.make_muxer)());
        *session.cluster.borrow_mut() = Some(self.this.clone());
        session.share_count.set(1);
        session.message_count.set(1);
        self.sessions.borrow_mut().insert(0, Rc::clone(&session));
        self.schedule_recycling();
        tracing::debug!(
            target: "mux",
            key = %self.key,
            sessions = self.session_count(),
            "session opened"
        );
        session
    }

    /// Release one share of `session`.
    pub(crate) fn free(&self, session: &Session) {
        session.share_count.set(session.share_count.get() - 1);
        if session.is_free() {
            session.free_time.set(Some(Instant::now()));
        }
        self.sort(session);
    }

    /// Remove `session` from the cluster entirely.
    pub(crate) fn discard(&self, session: &Session) {
        self.sessions
            .borrow_mut()
            .retain(|s| !std::ptr::eq(Rc::as_ptr(s), session));
        tracing::debug!(
            target: "mux",
            key = %self.key,
            sessions = self.session_count(),
            "session discarded"
        );
        self.after_mutation();
    }

    /// Bubble `session` to its correct position, keeping ascending order.
    /// Amortized O(cluster size); clusters are short in practice.
    fn sort(&self, session: &Session) {
        {
            let mut v = self.sessions.borrow_mut();
            if let Some(mut i) = v
                .iter()
                .position(|s| std::ptr::eq(Rc::as_ptr(s), session))
            {
                while i > 0 && v[i - 1].share_count() > v[i].share_count() {
                    v.swap(i - 1, i);
                    i -= 1;
                }
                while i + 1 < v.len() && v[i + 1].share_count() < v[i].share_count() {
                    v.swap(i, i + 1);
                    i += 1;
                }
            }
        }
        self.after_mutation();
    }

    fn after_mutation(&self) {
        self.schedule_recycling();
        if self.sessions.borrow().is_empty() {
            if let (Some(pool), Some(this)) = (self.pool.upgrade(), self.this.upgrade()) {
                pool.remove_cluster(&this);
            }
        }
    }

    /// Schedule (or cancel) recycling depending on whether the head session
    /// is idle.
    fn schedule_recycling(&self) {
        let head_is_free = self
            .sessions
            .borrow()
            .first()
            .map(|s| s.is_free())
            .unwrap_or(false);
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if head_is_free {
            if !self.recycle_scheduled.get() {
                if let Some(this) = self.this.upgrade() {
                    self.recycle_scheduled.set(true);
                    pool.schedule(this);
                }
            }
        } else if self.recycle_scheduled.get() {
            self.recycle_scheduled.set(false);
            pool.unschedule(self);
        }
    }

    pub(crate) fn mark_weak_gone(&self) {
        self.weak_gone.set(true);
    }

    pub(crate) fn force_schedule(&self) {
        if !self.recycle_scheduled.get() {
            if let (Some(pool), Some(this)) = (self.pool.upgrade(), self.this.upgrade()) {
                self.recycle_scheduled.set(true);
                pool.schedule(this);
            }
        }
    }

    /// Drop expired sessions from the idle head of the cluster.
    pub(crate) fn recycle(&self, now: &RecycleNow) {
        let max_idle = self.options.max_idle;
        let max_messages = self.options.max_messages;
        let weak_gone = self.weak_gone.get();

        let expired: Vec<Rc<Session>> = {
            let sessions = self.sessions.borrow();
            let mut out = Vec::new();
            for s in sessions.iter() {
                if !s.is_free() {
                    break;
                }
                let over_budget = max_messages > 0 && s.message_count() >= max_messages;
                if s.is_closed()
                    || weak_gone
                    || over_budget
                    || now.expired(s.free_time.get(), max_idle)
                {
                    out.push(Rc::clone(s));
                }
            }
            out
        };

        for session in expired {
            session.unlink();
            session.detach();
        }
    }
}

/// The per-worker collection of session clusters.
///
/// Clusters under value keys live in the value map; clusters under object
/// keys live in a weak map swept on every recycle tick.
pub struct SessionPool {
    this: Weak<SessionPool>,
    clusters: RefCell<HashMap<KeyValue, Rc<SessionCluster>>>,
    weak_clusters: RefCell<HashMap<usize, Rc<SessionCluster>>>,
    recycle_clusters: RefCell<Vec<Rc<SessionCluster>>>,
    recycling: Cell<bool>,
    has_shutdown: Cell<bool>,
}

impl SessionPool {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            clusters: RefCell::new(HashMap::new()),
            weak_clusters: RefCell::new(HashMap::new()),
            recycle_clusters: RefCell::new(Vec::new()),
            recycling: Cell::new(false),
            has_shutdown: Cell::new(false),
        })
    }

    /// Number of live clusters (both keyings).
    pub fn cluster_count(&self) -> usize {
        self.clusters.borrow().len() + self.weak_clusters.borrow().len()
    }

    /// Look up or create the cluster for `key`, then allocate a session
    /// from it.
    ///
    /// `options` and `make_muxer` only apply when the cluster does not exist
    /// yet; an existing cluster keeps the options it was created with.
    pub fn alloc(
        &self,
        key: SessionKey,
        options: MuxOptions,
        make_muxer: Box<dyn Fn() -> Box<dyn Multiplexer>>,
    ) -> Rc<Session> {
        let existing = match &key {
            SessionKey::Value(v) => self.clusters.borrow().get(v).cloned(),
            SessionKey::Object(o) => self.weak_clusters.borrow().get(&o.addr()).cloned(),
        };

        let cluster = match existing {
            Some(cluster) => cluster,
            None => {
                let cluster = Rc::new_cyclic(|this| SessionCluster {
                    this: this.clone(),
                    key: key.clone(),
                    options,
                    make_muxer,
                    sessions: RefCell::new(Vec::new()),
                    pool: self.this.clone(),
                    weak_gone: Cell::new(false),
                    recycle_scheduled: Cell::new(false),
                });
                match &key {
                    SessionKey::Value(v) => {
                        self.clusters
                            .borrow_mut()
                            .insert(v.clone(), Rc::clone(&cluster));
                    }
                    SessionKey::Object(o) => {
                        self.weak_clusters
                            .borrow_mut()
                            .insert(o.addr(), Rc::clone(&cluster));
                    }
                }
                cluster
            }
        };

        cluster.alloc()
    }

    /// Treat every idle deadline as expired from now on.
    pub fn shutdown(&self) {
        self.has_shutdown.set(true);
        self.ensure_recycling();
    }

    pub fn has_shutdown(&self) -> bool {
        self.has_shutdown.get()
    }

    pub(crate) fn schedule(&self, cluster: Rc<SessionCluster>) {
        self.recycle_clusters.borrow_mut().push(cluster);
        self.ensure_recycling();
    }

    pub(crate) fn unschedule(&self, cluster: &SessionCluster) {
        self.recycle_clusters
            .borrow_mut()
            .retain(|c| !std::ptr::eq(Rc::as_ptr(c), cluster));
    }

    pub(crate) fn remove_cluster(&self, cluster: &Rc<SessionCluster>) {
        match cluster.key() {
            SessionKey::Value(v) => {
                self.clusters.borrow_mut().remove(v);
            }
            SessionKey::Object(o) => {
                self.weak_clusters.borrow_mut().remove(&o.addr());
            }
        }
        self.unschedule(cluster);
        cluster.recycle_scheduled.set(false);
    }

    /// Arm the one-second recycle timer if there is anything to watch.
    fn ensure_recycling(&self) {
        if self.recycling.get() {
            return;
        }
        if self.recycle_clusters.borrow().is_empty() && self.weak_clusters.borrow().is_empty() {
            return;
        }
        let Some(pool) = self.this.upgrade() else {
            return;
        };
        self.recycling.set(true);

        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            InputContext::run(|| pool.tick());
        });
    }

    fn tick(&self) {
        self.recycling.set(false);

        // Sweep object-keyed clusters whose key object is gone.
        let dead: Vec<(usize, Rc<SessionCluster>)> = self
            .weak_clusters
            .borrow()
            .iter()
            .filter_map(|(addr, cluster)| match cluster.key() {
                SessionKey::Object(o) if o.is_gone() => Some((*addr, Rc::clone(cluster))),
                _ => None,
            })
            .collect();
        for (addr, cluster) in dead {
            self.weak_clusters.borrow_mut().remove(&addr);
            cluster.mark_weak_gone();
            cluster.force_schedule();
        }

        let now = if self.has_shutdown.get() {
            RecycleNow::Forced
        } else {
            RecycleNow::At(Instant::now())
        };

        let snapshot: Vec<Rc<SessionCluster>> = self.recycle_clusters.borrow().clone();
        for cluster in snapshot {
            cluster.recycle(&now);
        }

        self.ensure_recycling();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
