//! In-memory paired datagram pipe.
//!
//! Two [`PipeConn`] ends deliver datagrams to each other over unbounded
//! channels. Each end can simulate an unreliable link on its outbound
//! direction: a drop predicate, a random loss rate and fixed latency.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::socket::{PacketConn, closed_error};

type Datagram = (Vec<u8>, SocketAddr);

/// Predicate deciding whether an outbound datagram is dropped.
pub type DropFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Outbound link behaviour of one pipe end.
#[derive(Clone, Default)]
pub struct LinkConditions {
    /// Probability in `[0, 1]` of dropping each datagram.
    pub loss_rate: f64,
    /// Delivery delay.
    pub latency: Duration,
    /// Deterministic drop predicate, checked before the loss rate.
    pub drop_filter: Option<DropFilter>,
}

impl fmt::Debug for LinkConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConditions")
            .field("loss_rate", &self.loss_rate)
            .field("latency", &self.latency)
            .field("drop_filter", &self.drop_filter.is_some())
            .finish()
    }
}

/// One end of an in-memory datagram pipe.
pub struct PipeConn {
    local: SocketAddr,
    remote: SocketAddr,
    outbox: mpsc::UnboundedSender<Datagram>,
    inbox: AsyncMutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: CancellationToken,
    peer_closed: CancellationToken,
    conditions: Mutex<LinkConditions>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl PipeConn {
    /// Create a connected pair on two loopback addresses.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_addrs(
            SocketAddr::from(([127, 0, 0, 1], 10001)),
            SocketAddr::from(([127, 0, 0, 1], 10002)),
        )
    }

    /// Create a connected pair with explicit addresses.
    pub fn pair_with_addrs(a: SocketAddr, b: SocketAddr) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_closed = CancellationToken::new();
        let b_closed = CancellationToken::new();

        let end_a = Self {
            local: a,
            remote: b,
            outbox: a_tx,
            inbox: AsyncMutex::new(a_rx),
            closed: a_closed.clone(),
            peer_closed: b_closed.clone(),
            conditions: Mutex::new(LinkConditions::default()),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        let end_b = Self {
            local: b,
            remote: a,
            outbox: b_tx,
            inbox: AsyncMutex::new(b_rx),
            closed: b_closed,
            peer_closed: a_closed,
            conditions: Mutex::new(LinkConditions::default()),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (Arc::new(end_a), Arc::new(end_b))
    }

    /// Address of the other end.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Replace the outbound link conditions.
    pub fn set_conditions(&self, conditions: LinkConditions) {
        *self.conditions.lock() = conditions;
    }

    /// Drop outbound datagrams matching `filter`.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.conditions.lock().drop_filter = Some(Arc::new(filter));
    }

    /// Datagrams handed to the link (including dropped ones).
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Datagrams the simulated link dropped.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn should_drop(&self, data: &[u8], conditions: &LinkConditions) -> bool {
        if conditions.drop_filter.as_ref().is_some_and(|f| f(data)) {
            return true;
        }
        conditions.loss_rate > 0.0
            && rand::thread_rng().gen_bool(conditions.loss_rate.clamp(0.0, 1.0))
    }
}

impl fmt::Debug for PipeConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeConn")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl PacketConn for PipeConn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        if self.peer_closed.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer end closed",
            ));
        }
        if addr != self.remote {
            trace!(peer = %addr, "no pipe end at address, datagram dropped");
            return Ok(data.len());
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        let conditions = self.conditions.lock().clone();
        if self.should_drop(data, &conditions) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(len = data.len(), "pipe dropped datagram");
            return Ok(data.len());
        }

        let datagram = (data.to_vec(), self.local);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !conditions.latency.is_zero() => {
                let outbox = self.outbox.clone();
                let latency = conditions.latency;
                handle.spawn(async move {
                    tokio::time::sleep(latency).await;
                    let _ = outbox.send(datagram);
                });
            }
            _ => {
                self.outbox
                    .send(datagram)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))?;
            }
        }
        Ok(data.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        let (data, from) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            item = inbox.recv() => item.ok_or_else(closed_error)?,
        };
        // Oversized datagrams are truncated, as with a real socket.
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, from))
    }

    fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
