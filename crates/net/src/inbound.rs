//! Inbound connections
//!
//! An accepted connection owns one socket and one pipeline. Read bytes
//! become `Data` events after an implicit `StreamStart`; events emitted by
//! the pipeline's tail are serialized back to the socket through the write
//! buffer. Close produces a final `StreamEnd(Ok)` (peer half-close) or
//! `StreamEnd(ConnectionReset)`.

use std::any::Any;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::BytesMut;
use sluice_event::{Buffer, EndError, Event, DEFAULT_CHUNK_SIZE};
use sluice_pipeline::{Context, Input, InputContext, Pipeline, PipelineLayout};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::listener::ListenerOptions;
use crate::write_buffer::WriteBuffer;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
    static INBOUND_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// One accepted connection. The `Rc<Inbound>` doubles as the stream's
/// origin object, so mux filters key sessions per inbound by default.
pub struct Inbound {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    write: WriteBuffer,
}

impl Inbound {
    /// Live inbound connections on this worker.
    pub fn count() -> usize {
        INBOUND_COUNT.with(Cell::get)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Wire an accepted socket to a fresh pipeline and start its pumps.
    /// `on_close` runs once the connection is fully torn down.
    pub(crate) fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        layout: &Rc<PipelineLayout>,
        options: &ListenerOptions,
        on_close: impl FnOnce() + 'static,
    ) {
        let id = NEXT_ID.with(|n| {
            let id = n.get();
            n.set(id + 1);
            id
        });
        INBOUND_COUNT.with(|n| n.set(n.get() + 1));

        let local = stream.local_addr().unwrap_or(peer);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(target: "inbound", id, error = %e, "failed to set TCP_NODELAY");
        }

        let inbound = Rc::new(Inbound {
            id,
            peer,
            local,
            write: WriteBuffer::new(0),
        });
        tracing::debug!(target: "inbound", id, peer = %peer, "connection accepted");

        // Pipeline tail → write buffer
        let output = {
            let inbound = Rc::clone(&inbound);
            Input::from_fn(move |evt| match evt {
                Event::Data(data) => {
                    inbound.write.push(data);
                }
                Event::StreamEnd(_) => inbound.write.end(),
                _ => {}
            })
        };

        let context = Context::with_origin(Rc::clone(&inbound) as Rc<dyn Any>);
        let pipeline = layout.alloc(context, output);
        let head = pipeline.input_handle();

        let (rd, wr) = stream.into_split();
        let options = options.clone();

        let writer = tokio::task::spawn_local(write_pump(
            Rc::clone(&inbound),
            wr,
            head,
            options.write_timeout,
        ));

        tokio::task::spawn_local(async move {
            read_pump(Rc::clone(&inbound), rd, &pipeline, &options).await;
            inbound.write.wake();
            let _ = writer.await;
            // Only now is it safe to recycle the pipeline: the write side
            // may have been delivering replies after the peer half-closed.
            drop(pipeline);
            INBOUND_COUNT.with(|n| n.set(n.get() - 1));
            tracing::debug!(target: "inbound", id = inbound.id, "connection closed");
            on_close();
        });
    }
}

/// Forward socket reads into the pipeline. Returns when the peer
/// half-closes, resets, or a timer expires. The pipeline handle is dropped
/// here once the write side has also finished.
async fn read_pump(
    inbound: Rc<Inbound>,
    mut rd: OwnedReadHalf,
    pipeline: &Pipeline,
    options: &ListenerOptions,
) {
    let head = pipeline.input_handle();
    InputContext::run(|| head.input(Event::StreamStart));

    // Both timers re-arm on every read, so per iteration the earlier
    // deadline is the one that can fire: an expired read timeout ends the
    // stream with ReadTimeout, an expired idle timeout closes the
    // connection quietly.
    enum Expired {
        Read,
        Idle,
    }
    let deadline = match (options.read_timeout, options.idle_timeout) {
        (None, None) => None,
        (Some(r), None) => Some((r, Expired::Read)),
        (None, Some(i)) => Some((i, Expired::Idle)),
        (Some(r), Some(i)) => {
            if r <= i {
                Some((r, Expired::Read))
            } else {
                Some((i, Expired::Idle))
            }
        }
    };

    let mut buf = BytesMut::with_capacity(DEFAULT_CHUNK_SIZE);
    loop {
        buf.reserve(DEFAULT_CHUNK_SIZE);
        let reading = rd.read_buf(&mut buf);
        let result = match &deadline {
            None => reading.await,
            Some((wait, expired)) => match timeout(*wait, reading).await {
                Ok(result) => result,
                Err(_) => {
                    match expired {
                        Expired::Read => {
                            InputContext::run(|| {
                                head.input(Event::StreamEnd(EndError::ReadTimeout))
                            });
                        }
                        Expired::Idle => {
                            tracing::debug!(target: "inbound", id = inbound.id, "idle timeout");
                            InputContext::run(|| head.input(Event::StreamEnd(EndError::Ok)));
                        }
                    }
                    inbound.write.end();
                    break;
                }
            },
        };

        match result {
            Ok(0) => {
                InputContext::run(|| head.input(Event::StreamEnd(EndError::Ok)));
                if options.close_eof {
                    inbound.write.end();
                }
                break;
            }
            Ok(_) => {
                let chunk = buf.split().freeze();
                InputContext::run(|| head.input(Event::Data(Buffer::from(chunk))));
            }
            Err(e) => {
                tracing::debug!(target: "inbound", id = inbound.id, error = %e, "read failed");
                InputContext::run(|| head.input(Event::StreamEnd(EndError::ConnectionReset)));
                inbound.write.end();
                break;
            }
        }
    }
}

/// Drain the write buffer to the socket until the stream ends.
async fn write_pump(
    inbound: Rc<Inbound>,
    mut wr: OwnedWriteHalf,
    head: Input,
    write_timeout: Option<Duration>,
) {
    loop {
        match inbound.write.pop_chunk() {
            Some(chunk) => {
                let writing = wr.write_all(&chunk);
                let result = match write_timeout {
                    Some(t) => match timeout(t, writing).await {
                        Ok(result) => result,
                        Err(_) => {
                            InputContext::run(|| {
                                head.input(Event::StreamEnd(EndError::WriteTimeout))
                            });
                            return;
                        }
                    },
                    None => writing.await,
                };
                if result.is_err() {
                    InputContext::run(|| head.input(Event::StreamEnd(EndError::ConnectionReset)));
                    return;
                }
            }
            None => {
                if inbound.write.is_ended() {
                    let _ = wr.shutdown().await;
                    return;
                }
                inbound.write.wait().await;
            }
        }
    }
}
