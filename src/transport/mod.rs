//! Reliable/unreliable datagram transport.
//!
//! This module implements the runtime half of the protocol on top of the
//! framing in [`crate::core`]. It provides:
//!
//! - **Sockets**: the [`PacketConn`] capability, with [`UdpPacketConn`] for
//!   production and [`PipeConn`] for in-memory tests with simulated loss
//! - **Ports**: [`Port`] owns one socket, the peer table and the background
//!   read and resend tasks
//! - **Connections**: [`Conn`] runs the ARQ engine (sequence numbers,
//!   cumulative acks, delayed acks, retransmission, expiry)
//! - **Streams**: [`Stream`] scopes sends and handlers to one stream id
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Application (handshake, game sync)   │
//! ├─────────────────────────────────────────┤
//! │   Stream / Conn      handlers, ARQ      │  ← This module
//! │   Port               peer table, tasks  │
//! ├─────────────────────────────────────────┤
//! │   PacketConn         UDP or pipe        │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod conn;
mod context;
mod handler;
mod pipe;
mod port;
mod queue;
mod socket;
mod stream;

pub use config::*;
pub use conn::{Conn, ConnStats};
pub use context::*;
pub use handler::Handler;
pub use pipe::*;
pub use port::Port;
pub use queue::PacketId;
pub use socket::{PacketConn, UdpPacketConn};
pub use stream::Stream;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, crate::core::TransportError>;
