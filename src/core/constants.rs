//! Protocol constants.
//!
//! Values in the wire sections are fixed by the legacy protocol and MUST NOT be
//! changed. Timing defaults can be overridden through `PortConfig`.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Size of the packet header (stream/flags byte + sequence byte).
pub const HEADER_SIZE: usize = 2;

/// High bit of the first header byte: datagram is a reliable send.
pub const RELIABLE_FLAG: u8 = 0x80;

/// Low seven bits of the first header byte carry the stream id.
pub const STREAM_MASK: u8 = 0x7F;

/// Largest datagram the transport will read or produce.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Largest payload that fits behind the header in one datagram.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

// =============================================================================
// STREAMS
// =============================================================================

/// Number of addressable streams per connection.
pub const MAX_STREAMS: usize = 128;

/// Global/server traffic.
pub const STREAM_GLOBAL: u8 = 0;

/// Pre-handshake connect channel.
pub const STREAM_CONNECT: u8 = 127;

// =============================================================================
// RELIABILITY
// =============================================================================

/// Maximum number of unacknowledged reliable packets per connection.
///
/// Also the window of the modular sequence comparison: a sequence at most
/// `SEQ_WINDOW - 1` steps behind another is considered "before" it.
pub const SEQ_WINDOW: u8 = 64;

/// Default scheduling tick for the resend loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30);

/// Default spacing between retransmissions of one reliable packet.
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of transmissions before a reliable packet times out.
pub const DEFAULT_RESEND_RETRIES: u32 = 5;

/// Default delay before a coalesced acknowledgement is sent.
pub const DEFAULT_DELAYED_ACK: Duration = Duration::from_millis(20);

/// Default number of accepted reliable packets that forces an immediate ack.
pub const DEFAULT_ACK_COALESCE_LIMIT: u32 = 8;

/// Default receive buffer size for the read loop.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = MAX_DATAGRAM_SIZE;
