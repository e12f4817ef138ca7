//! TCP listeners
//!
//! A listener accepts connections on a bound address and instantiates an
//! `Inbound` per connection, each bound to a pipeline cloned from the
//! listener's layout. When the inbound count reaches `max_connections`,
//! accepting pauses; pending connections wait in the OS backlog and none is
//! reset.

use std::cell::{Cell, RefCell};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sluice_pipeline::PipelineLayout;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::inbound::Inbound;

/// Process-wide `SO_REUSEPORT` toggle, applied at bind time.
static REUSE_PORT: AtomicBool = AtomicBool::new(false);

/// Enable or disable `SO_REUSEPORT` for listeners bound after this call.
pub fn set_reuse_port(enabled: bool) {
    REUSE_PORT.store(enabled, Ordering::Relaxed);
}

thread_local! {
    static LISTENERS: RefCell<Vec<Listener>> = const { RefCell::new(Vec::new()) };
}

/// Find an existing listener bound to `ip:port` on this worker.
pub fn find(ip: IpAddr, port: u16) -> Option<Listener> {
    LISTENERS.with(|listeners| {
        listeners
            .borrow()
            .iter()
            .find(|l| l.inner.port == port && l.inner.ip == ip)
            .cloned()
    })
}

/// Accept-side options.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Maximum concurrent inbound connections (negative = unlimited).
    pub max_connections: i32,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Close the connection after this long without a read.
    pub idle_timeout: Option<Duration>,
    /// `IP_TRANSPARENT` (Linux only).
    pub transparent: bool,
    /// Shut the write side as soon as the peer half-closes.
    pub close_eof: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_connections: -1,
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            transparent: false,
            close_eof: false,
        }
    }
}

/// Listener errors. Fatal for the listener they occur on.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The address does not parse
    #[error("invalid listen address '{address}'")]
    InvalidAddress { address: String },

    /// Socket setup, bind, or listen failed
    #[error("cannot listen on {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// A bound, accepting TCP listener.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerInner>,
}

struct ListenerInner {
    ip: IpAddr,
    port: u16,
    layout: Rc<PipelineLayout>,
    options: ListenerOptions,
    active: Cell<usize>,
    peak: Cell<usize>,
    slot_freed: Rc<Notify>,
    cancel: CancellationToken,
}

impl Listener {
    /// Bind `ip:port` and start accepting into `layout`.
    ///
    /// Must be called from within the worker's `LocalSet`.
    ///
    /// # Errors
    ///
    /// Bind/listen failures are fatal for this listener and carry the
    /// offending address.
    pub fn listen(
        ip: &str,
        port: u16,
        layout: Rc<PipelineLayout>,
        options: ListenerOptions,
    ) -> Result<Self, ListenerError> {
        let addr: IpAddr = ip.parse().map_err(|_| ListenerError::InvalidAddress {
            address: ip.to_string(),
        })?;

        let listener = bind_socket(addr, port, &options).map_err(|e| ListenerError::Bind {
            address: addr.to_string(),
            port,
            source: e,
        })?;

        let inner = Rc::new(ListenerInner {
            ip: addr,
            port,
            layout,
            options,
            active: Cell::new(0),
            peak: Cell::new(0),
            slot_freed: Rc::new(Notify::new()),
            cancel: CancellationToken::new(),
        });

        tracing::info!(
            target: "listener",
            address = %addr,
            port,
            max_connections = inner.options.max_connections,
            "listening"
        );

        tokio::task::spawn_local(accept_loop(Rc::clone(&inner), listener));

        let listener = Self { inner };
        LISTENERS.with(|listeners| listeners.borrow_mut().push(listener.clone()));
        Ok(listener)
    }

    pub fn ip(&self) -> IpAddr {
        self.inner.ip
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Currently open inbound connections.
    pub fn active_connections(&self) -> usize {
        self.inner.active.get()
    }

    /// High-water mark of concurrent connections.
    pub fn peak_connections(&self) -> usize {
        self.inner.peak.get()
    }

    /// Stop accepting and unregister. Existing connections drain on their
    /// own.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        LISTENERS.with(|listeners| {
            listeners
                .borrow_mut()
                .retain(|l| !Rc::ptr_eq(&l.inner, &self.inner));
        });
        tracing::info!(
            target: "listener",
            address = %self.inner.ip,
            port = self.inner.port,
            "stopped listening"
        );
    }
}

fn bind_socket(
    addr: IpAddr,
    port: u16,
    options: &ListenerOptions,
) -> std::io::Result<TcpListener> {
    let domain = match addr {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    if REUSE_PORT.load(Ordering::Relaxed) {
        socket.set_reuse_port(true)?;
    }

    #[cfg(target_os = "linux")]
    if options.transparent {
        if let Err(e) = socket.set_ip_transparent(true) {
            tracing::warn!(target: "listener", error = %e, "failed to set IP_TRANSPARENT");
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = options;

    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(addr, port).into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

async fn accept_loop(inner: Rc<ListenerInner>, listener: TcpListener) {
    loop {
        // Connection cap: stop accepting until a slot frees. Pending
        // connections queue in the OS backlog.
        let max = inner.options.max_connections;
        while max >= 0 && inner.active.get() >= max as usize {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = inner.slot_freed.notified() => {}
            }
        }

        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let active = inner.active.get() + 1;
                    inner.active.set(active);
                    inner.peak.set(inner.peak.get().max(active));

                    let slot = {
                        let inner = Rc::clone(&inner);
                        move || {
                            inner.active.set(inner.active.get() - 1);
                            inner.slot_freed.notify_one();
                        }
                    };
                    Inbound::spawn(stream, peer, &inner.layout, &inner.options, slot);
                }
                Err(e) => {
                    // Transient accept errors: log and continue
                    tracing::warn!(target: "listener", error = %e, "accept error");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod listener_test;
