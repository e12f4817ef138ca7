//! Outbound connections
//!
//! An `Outbound` is constructed by a `connect` filter: it resolves the
//! target, connects (with retries for connection-level failures), then runs
//! a write pump draining the buffer to the socket and a read pump injecting
//! the reply stream back into the configured output.
//!
//! State machine:
//!
//! ```text
//! idle → resolving → connecting → connected → half-closed → closed
//!            │            │
//!            └── retry ◄──┘   (connection-level failures only)
//! ```

use std::cell::{Cell, RefCell};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::BytesMut;
use sluice_event::{Buffer, EndError, Event, DEFAULT_CHUNK_SIZE};
use sluice_pipeline::{Input, InputContext};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::write_buffer::WriteBuffer;

thread_local! {
    static OUTBOUND_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// Connection options for an outbound endpoint.
#[derive(Debug, Clone)]
pub struct OutboundOptions {
    /// Write buffer cap in bytes (0 = unlimited).
    pub buffer_limit: usize,
    /// Reconnection attempts for connection-level failures.
    pub retry_count: i32,
    /// Delay between reconnection attempts.
    pub retry_delay: Duration,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            buffer_limit: 0,
            retry_count: 0,
            retry_delay: Duration::ZERO,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Idle,
    Resolving,
    Connecting,
    Connected,
    HalfClosed,
    Closed,
}

/// An outgoing TCP connection bound to a reply output.
#[derive(Clone)]
pub struct Outbound {
    inner: Rc<Inner>,
    /// Cloned only with handles; drives the live-endpoint count.
    tag: Rc<()>,
}

struct Inner {
    options: OutboundOptions,
    output: Input,
    state: Cell<OutboundState>,
    host: RefCell<String>,
    port: Cell<u16>,
    address: RefCell<Option<SocketAddr>>,
    retries: Cell<i32>,
    connection_time: Cell<Duration>,
    write: WriteBuffer,
    end_emitted: Cell<bool>,
    cancel: CancellationToken,
}

impl Outbound {
    /// Create an endpoint whose reply stream is injected into `output`.
    pub fn new(output: Input, options: OutboundOptions) -> Self {
        OUTBOUND_COUNT.with(|n| n.set(n.get() + 1));
        let buffer_limit = options.buffer_limit;
        Self {
            inner: Rc::new(Inner {
                options,
                output,
                state: Cell::new(OutboundState::Idle),
                host: RefCell::new(String::new()),
                port: Cell::new(0),
                address: RefCell::new(None),
                retries: Cell::new(0),
                connection_time: Cell::new(Duration::ZERO),
                write: WriteBuffer::new(buffer_limit),
                end_emitted: Cell::new(false),
                cancel: CancellationToken::new(),
            }),
            tag: Rc::new(()),
        }
    }

    /// Live outbound endpoints on this worker.
    pub fn count() -> usize {
        OUTBOUND_COUNT.with(Cell::get)
    }

    pub fn state(&self) -> OutboundState {
        self.inner.state.get()
    }

    pub fn host(&self) -> String {
        self.inner.host.borrow().clone()
    }

    pub fn port(&self) -> u16 {
        self.inner.port.get()
    }

    /// Resolved remote address, once resolution has succeeded.
    pub fn address(&self) -> Option<SocketAddr> {
        *self.inner.address.borrow()
    }

    pub fn connected(&self) -> bool {
        matches!(
            self.inner.state.get(),
            OutboundState::Connected | OutboundState::HalfClosed
        )
    }

    /// Bytes currently queued for writing.
    pub fn buffered(&self) -> usize {
        self.inner.write.len()
    }

    pub fn overflowed(&self) -> bool {
        self.inner.write.is_overflowed()
    }

    pub fn ended(&self) -> bool {
        self.inner.write.is_ended()
    }

    pub fn retries(&self) -> i32 {
        self.inner.retries.get()
    }

    /// Sum of bytes offered to a full write buffer.
    pub fn discarded_data_size(&self) -> u64 {
        self.inner.write.discarded_data_size()
    }

    /// Time from `connect()` to the TCP connection being established.
    pub fn connection_time(&self) -> Duration {
        self.inner.connection_time.get()
    }

    /// Start connecting. Must be called at most once, from within the
    /// worker's `LocalSet`.
    pub fn connect(&self, host: impl Into<String>, port: u16) {
        if self.inner.state.get() != OutboundState::Idle {
            return;
        }
        *self.inner.host.borrow_mut() = host.into();
        self.inner.port.set(port);
        self.inner.state.set(OutboundState::Resolving);

        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(run(inner));
    }

    /// Queue bytes toward the remote peer. Bytes beyond `buffer_limit` are
    /// dropped and tallied; the first excess emits `StreamEnd(BufferOverflow)`.
    pub fn send(&self, data: Buffer) {
        if self.inner.write.is_ended() || self.inner.state.get() == OutboundState::Closed {
            return;
        }
        let result = self.inner.write.push(data);
        if result.first_overflow {
            tracing::warn!(
                target: "outbound",
                host = %self.inner.host.borrow(),
                port = self.inner.port.get(),
                discarded = result.discarded,
                "write buffer overflow"
            );
            self.inner.emit_end(EndError::BufferOverflow);
        }
    }

    /// Wake the write pump to flush whatever is buffered.
    pub fn flush(&self) {
        self.inner.write.wake();
    }

    /// Flush then shut down the write side (→ half-closed).
    pub fn end(&self) {
        self.inner.write.end();
    }

    /// Drop the connection immediately: pending connects are abandoned and
    /// both pumps stop at their next suspension point.
    pub fn close(&self) {
        self.inner.state.set(OutboundState::Closed);
        self.inner.cancel.cancel();
        self.inner.write.wake();
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        if Rc::strong_count(&self.tag) == 1 {
            OUTBOUND_COUNT.with(|n| n.set(n.get() - 1));
        }
    }
}

impl Inner {
    fn emit_end(&self, kind: EndError) {
        if self.end_emitted.replace(true) {
            return;
        }
        tracing::debug!(
            target: "outbound",
            host = %self.host.borrow(),
            port = self.port.get(),
            error = %kind,
            "stream end"
        );
        let output = self.output.clone();
        InputContext::run(|| output.input(Event::StreamEnd(kind)));
    }

    /// Resolve and connect once.
    async fn establish(&self) -> Result<TcpStream, EndError> {
        self.state.set(OutboundState::Resolving);
        let target = format!("{}:{}", self.host.borrow(), self.port.get());

        let addr = match tokio::net::lookup_host(&target).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => return Err(EndError::Unknown),
            },
            Err(e) => {
                tracing::debug!(target: "outbound", target = %target, error = %e, "resolve failed");
                return Err(EndError::Unknown);
            }
        };
        *self.address.borrow_mut() = Some(addr);

        self.state.set(OutboundState::Connecting);
        let connecting = TcpStream::connect(addr);
        let result = match self.options.connect_timeout {
            Some(t) => timeout(t, connecting)
                .await
                .map_err(|_| EndError::ConnectionTimeout)?,
            None => connecting.await,
        };
        result.map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => EndError::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => EndError::ConnectionReset,
            ErrorKind::TimedOut => EndError::ConnectionTimeout,
            _ => EndError::Unknown,
        })
    }
}

async fn run(inner: Rc<Inner>) {
    let started = Instant::now();
    let mut attempt: i32 = 0;

    let stream = loop {
        let establishing = inner.establish();
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => {
                inner.state.set(OutboundState::Closed);
                return;
            }
            result = establishing => result,
        };
        match result {
            Ok(stream) => break stream,
            Err(kind) => {
                if attempt < inner.options.retry_count {
                    attempt += 1;
                    inner.retries.set(attempt);
                    tracing::debug!(
                        target: "outbound",
                        host = %inner.host.borrow(),
                        port = inner.port.get(),
                        attempt,
                        error = %kind,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(inner.options.retry_delay).await;
                    continue;
                }
                inner.state.set(OutboundState::Closed);
                inner.emit_end(kind);
                return;
            }
        }
    };

    if inner.cancel.is_cancelled() {
        inner.state.set(OutboundState::Closed);
        return;
    }

    inner.connection_time.set(started.elapsed());
    inner.state.set(OutboundState::Connected);
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(target: "outbound", error = %e, "failed to set TCP_NODELAY");
    }
    tracing::debug!(
        target: "outbound",
        host = %inner.host.borrow(),
        port = inner.port.get(),
        retries = inner.retries.get(),
        connection_time_ms = inner.connection_time.get().as_millis() as u64,
        "connected"
    );

    let (rd, wr) = stream.into_split();
    let writer = tokio::task::spawn_local(write_pump(Rc::clone(&inner), wr));
    read_pump(Rc::clone(&inner), rd).await;

    // Unblock the writer so it can observe the closed state
    inner.write.wake();
    let _ = writer.await;
}

async fn write_pump(inner: Rc<Inner>, mut wr: OwnedWriteHalf) {
    loop {
        if inner.state.get() == OutboundState::Closed {
            return;
        }
        match inner.write.pop_chunk() {
            Some(chunk) => {
                let writing = wr.write_all(&chunk);
                let result = match inner.options.write_timeout {
                    Some(t) => match timeout(t, writing).await {
                        Ok(result) => result,
                        Err(_) => {
                            inner.state.set(OutboundState::Closed);
                            inner.emit_end(EndError::WriteTimeout);
                            return;
                        }
                    },
                    None => writing.await,
                };
                if result.is_err() {
                    inner.state.set(OutboundState::Closed);
                    inner.emit_end(EndError::ConnectionReset);
                    return;
                }
            }
            None => {
                if inner.write.is_ended() {
                    let _ = wr.shutdown().await;
                    if inner.state.get() == OutboundState::Connected {
                        inner.state.set(OutboundState::HalfClosed);
                    }
                    return;
                }
                inner.write.wait().await;
            }
        }
    }
}

async fn read_pump(inner: Rc<Inner>, mut rd: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(DEFAULT_CHUNK_SIZE);
    loop {
        if inner.state.get() == OutboundState::Closed {
            return;
        }
        buf.reserve(DEFAULT_CHUNK_SIZE);

        let reading = async {
            let read = rd.read_buf(&mut buf);
            match inner.options.read_timeout {
                Some(t) => timeout(t, read).await.map_err(|_| None)?.map_err(Some),
                None => read.await.map_err(Some),
            }
        };
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => {
                inner.state.set(OutboundState::Closed);
                return;
            }
            result = reading => result,
        };
        let result = match result {
            Ok(n) => Ok(n),
            // Timeout carries no io::Error
            Err(None) => {
                inner.state.set(OutboundState::Closed);
                inner.emit_end(EndError::ReadTimeout);
                return;
            }
            Err(Some(e)) => Err(e),
        };

        match result {
            Ok(0) => {
                // Remote close after drain
                if inner.write.is_ended() {
                    inner.state.set(OutboundState::Closed);
                }
                inner.emit_end(EndError::Ok);
                return;
            }
            Ok(_) => {
                let chunk = buf.split().freeze();
                let output = inner.output.clone();
                InputContext::run(|| output.input(Event::Data(Buffer::from(chunk))));
            }
            Err(e) => {
                tracing::debug!(target: "outbound", error = %e, "read failed");
                inner.state.set(OutboundState::Closed);
                inner.emit_end(EndError::ConnectionReset);
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "outbound_test.rs"]
mod outbound_test;
