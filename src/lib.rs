//! # ludonet
//!
//! Reliable/unreliable datagram transport for a legacy real-time multiplayer
//! game protocol.
//!
//! The protocol layers a hand-rolled ARQ directly over UDP:
//!
//! - **Framing**: a two-byte header carrying a reliable flag, a stream id and
//!   either a sequence number or a cumulative acknowledgement
//! - **Obfuscation**: optional whole-datagram XOR with a one-byte session key
//! - **Reliability**: per-connection ordered delivery with delayed, coalesced
//!   acknowledgements and bounded retransmission
//! - **Multiplexing**: up to 128 streams per connection, each with its own
//!   handlers
//!
//! ## Feature Flags
//!
//! - `transport` (default): async runtime pieces (ports, connections, sockets)
//!
//! ## Modules
//!
//! - [`core`]: framing, constants and error types (always included)
//! - [`message`]: message codec contract and opcode registry (always included)
//! - [`transport`]: ports, connections and streams (requires `transport`)
//!
//! ## Example Usage
//!
//! ```rust
//! use ludonet::core::{Header, decode_packet, encode_packet};
//!
//! let mut datagram = encode_packet(Header::reliable(3, 41), b"payload", 0x5A);
//! let (header, payload) = decode_packet(&mut datagram, 0x5A).unwrap();
//! assert!(header.reliable);
//! assert_eq!((header.stream, header.seq), (3, 41));
//! assert_eq!(payload, b"payload");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Message codec (always included)
pub mod message;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::message::{Message, Registry, WireReader, WireWriter, encode_messages};

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        Conn, ConnStats, OpContext, PacketConn, PacketId, PipeConn, Port, PortConfig,
        PortConfigBuilder, ReliableOptions, Stream, TransportResult, UdpPacketConn,
    };
}

// Re-export commonly used items at crate root
pub use self::core::{CodecError, Direction, Header, RegistryError, StreamId, TransportError};
pub use self::message::{Message, Registry};

#[cfg(feature = "transport")]
pub use self::transport::{Conn, OpContext, Port, PortConfig, ReliableOptions, Stream};
