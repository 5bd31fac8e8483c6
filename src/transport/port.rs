//! Socket owner: peer table, read loop and resend tick.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use super::TransportResult;
use super::config::PortConfig;
use super::conn::Conn;
use super::handler::HandlerList;
use super::socket::{PacketConn, UdpPacketConn};
use crate::core::{StreamId, TransportError};
use crate::message::{Message, Registry};

/// State every connection of a port refers to.
pub(crate) struct PortShared {
    pub socket: Arc<dyn PacketConn>,
    pub registry: Arc<Registry>,
    pub config: PortConfig,
    pub handlers: HandlerList,
    pub closed: CancellationToken,
}

type AcceptFilter = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

struct PortInner {
    shared: Arc<PortShared>,
    conns: Mutex<HashMap<SocketAddr, Conn>>,
    accept: RwLock<Option<AcceptFilter>>,
    started: AtomicBool,
}

/// A datagram socket with one [`Conn`] per remote address.
///
/// Call [`start`](Self::start) to spawn the read loop and the resend tick,
/// and [`close`](Self::close) to stop them; the tasks keep the port alive
/// until it is closed.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ludonet::message::Registry;
/// use ludonet::transport::{Port, PortConfig};
///
/// # async fn run() -> Result<(), ludonet::TransportError> {
/// let port = Port::bind("0.0.0.0:7777".parse().unwrap(), Arc::new(Registry::new()), PortConfig::default()).await?;
/// port.on_message(|conn, stream, msg| {
///     tracing::info!(peer = %conn.addr(), stream, ?msg, "message");
///     true
/// });
/// port.start()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

impl Port {
    /// Wrap `socket`. Nothing runs until [`start`](Self::start).
    pub fn new(socket: Arc<dyn PacketConn>, registry: Arc<Registry>, config: PortConfig) -> Self {
        Self {
            inner: Arc::new(PortInner {
                shared: Arc::new(PortShared {
                    socket,
                    registry,
                    config,
                    handlers: HandlerList::default(),
                    closed: CancellationToken::new(),
                }),
                conns: Mutex::new(HashMap::new()),
                accept: RwLock::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Bind a UDP socket at `addr`.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<Registry>,
        config: PortConfig,
    ) -> TransportResult<Self> {
        let socket = UdpPacketConn::bind(addr).await?;
        Ok(Self::new(Arc::new(socket), registry, config))
    }

    /// Spawn the read loop and the resend tick on the current runtime.
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tokio::spawn(self.clone().read_loop());
        tokio::spawn(self.clone().resend_loop());
        info!(local = ?self.local_addr().ok(), "port started");
        Ok(())
    }

    /// Stop both tasks, close the socket and drop every pending reliable
    /// packet without running its callbacks. Idempotent.
    pub fn close(&self) -> TransportResult<()> {
        if self.inner.shared.closed.is_cancelled() {
            return Ok(());
        }
        self.shutdown()?;
        Ok(())
    }

    fn shutdown(&self) -> std::io::Result<()> {
        let shared = &self.inner.shared;
        shared.closed.cancel();
        let res = shared.socket.close();
        let dropped: usize = self.conns().iter().map(Conn::discard_queue).sum();
        info!(dropped, "port closed");
        res
    }

    /// Whether the port has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.is_cancelled()
    }

    /// Local socket address.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.shared.socket.local_addr()?)
    }

    /// Configuration the port was created with.
    pub fn config(&self) -> &PortConfig {
        &self.inner.shared.config
    }

    /// Registry used to decode inbound payloads.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.shared.registry
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Connection to `addr`, created if absent.
    ///
    /// Local creation bypasses the accept filter.
    pub fn conn(&self, addr: SocketAddr) -> Conn {
        self.inner
            .conns
            .lock()
            .entry(addr)
            .or_insert_with(|| {
                debug!(peer = %addr, "connection created");
                Conn::new(addr, self.inner.shared.clone())
            })
            .clone()
    }

    /// Existing connection to `addr`.
    pub fn get_conn(&self, addr: SocketAddr) -> Option<Conn> {
        self.inner.conns.lock().get(&addr).cloned()
    }

    /// Forget the connection to `addr`.
    ///
    /// Its pending reliable packets are dropped without callbacks; the next
    /// datagram from `addr` starts a fresh connection.
    pub fn remove_conn(&self, addr: SocketAddr) -> Option<Conn> {
        let conn = self.inner.conns.lock().remove(&addr)?;
        let dropped = conn.discard_queue();
        debug!(peer = %addr, dropped, "connection removed");
        Some(conn)
    }

    /// Snapshot of all connections.
    pub fn conns(&self) -> Vec<Conn> {
        self.inner.conns.lock().values().cloned().collect()
    }

    /// Decide whether a datagram from an unknown address may create a
    /// connection. Rejected datagrams are dropped.
    pub fn set_accept_filter<F>(&self, filter: F)
    where
        F: Fn(SocketAddr) -> bool + Send + Sync + 'static,
    {
        *self.inner.accept.write() = Some(Arc::new(filter));
    }

    /// Register a handler of last resort for every connection.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Conn, StreamId, &dyn Message) -> bool + Send + Sync + 'static,
    {
        self.inner.shared.handlers.push(Arc::new(handler));
    }

    fn accept_conn(&self, addr: SocketAddr) -> Option<Conn> {
        if let Some(conn) = self.get_conn(addr) {
            return Some(conn);
        }
        // The filter may call back into the port; no lock is held here.
        let filter = self.inner.accept.read().clone();
        if filter.is_some_and(|accept| !accept(addr)) {
            return None;
        }
        let conn = self
            .inner
            .conns
            .lock()
            .entry(addr)
            .or_insert_with(|| {
                debug!(peer = %addr, "connection accepted");
                Conn::new(addr, self.inner.shared.clone())
            })
            .clone();
        Some(conn)
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    #[instrument(name = "port_read", skip_all)]
    async fn read_loop(self) {
        let shared = self.inner.shared.clone();
        let mut buf = vec![0u8; shared.config.recv_buffer_size];
        loop {
            let res = tokio::select! {
                biased;
                _ = shared.closed.cancelled() => break,
                res = shared.socket.recv_from(&mut buf) => res,
            };
            match res {
                Ok((n, from)) => match self.accept_conn(from) {
                    Some(conn) => conn.handle_packet(&mut buf[..n]),
                    None => trace!(peer = %from, "datagram from rejected address dropped"),
                },
                Err(e) => {
                    if !shared.closed.is_cancelled() {
                        error!(error = %e, "socket read failed, closing port");
                        let _ = self.shutdown();
                    }
                    break;
                }
            }
        }
        debug!("read loop stopped");
    }

    #[instrument(name = "port_resend", skip_all)]
    async fn resend_loop(self) {
        let shared = self.inner.shared.clone();
        let mut ticker = tokio::time::interval(shared.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shared.closed.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for conn in self.conns() {
                conn.send_queue();
            }
        }
        debug!("resend loop stopped");
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("local", &self.inner.shared.socket.local_addr().ok())
            .field("conns", &self.inner.conns.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
