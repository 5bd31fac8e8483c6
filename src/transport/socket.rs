//! Datagram socket abstraction.
//!
//! A [`Port`](super::Port) runs against any [`PacketConn`]: the tokio UDP
//! wrapper below in production, or the in-memory [`PipeConn`](super::PipeConn)
//! in tests.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Minimal connectionless datagram capability.
#[async_trait]
pub trait PacketConn: Send + Sync + fmt::Debug {
    /// Local bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Send one datagram without blocking.
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Wait for the next datagram.
    ///
    /// Returns an error once the socket is closed.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Close the socket, waking any pending `recv_from`.
    fn close(&self) -> io::Result<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

/// Tokio UDP socket as a [`PacketConn`].
///
/// `close` releases the socket itself, so the local address can be bound
/// again even while handles to the closed port are still alive.
#[derive(Debug)]
pub struct UdpPacketConn {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local: SocketAddr,
    closed: CancellationToken,
}

impl UdpPacketConn {
    /// Bind a new UDP socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        let local = socket.local_addr()?;
        Ok(Self {
            socket: RwLock::new(Some(Arc::new(socket))),
            local,
            closed: CancellationToken::new(),
        })
    }

    /// Enable sending to broadcast addresses.
    pub fn set_broadcast(&self, on: bool) -> io::Result<()> {
        self.socket()?.set_broadcast(on)
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket.read().clone().ok_or_else(closed_error)
    }
}

#[async_trait]
impl PacketConn for UdpPacketConn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or_else(closed_error)?;
        match socket.try_send_to(data, addr) {
            Ok(n) => Ok(n),
            // Full send buffer: behave like the network dropped it.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(peer = %addr, len = data.len(), "send buffer full, datagram dropped");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let socket = self.socket()?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            res = socket.recv_from(buf) => res,
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        // A reader woken by the token drops its clone right after.
        self.socket.write().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
