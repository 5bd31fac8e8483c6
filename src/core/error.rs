//! Error types for the transport.
//!
//! Errors are split along the recovery boundary:
//!
//! - [`CodecError`]: malformed or short buffers, recovered by dropping the datagram
//! - [`RegistryError`]: opcode lookup failures, recovered by dropping the datagram
//! - [`TransportError`]: delivery failures and socket-level errors surfaced to callers

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input data is shorter than required.
    #[error("data too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Output buffer is too small to hold encoded data.
    #[error("buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Bytes needed for encoding.
        required: usize,
        /// Bytes available in buffer.
        available: usize,
    },

    /// Leading opcode byte does not belong to the decoding type.
    #[error("opcode mismatch: expected {expected:#04x}, got {actual:#04x}")]
    OpcodeMismatch {
        /// Opcode of the decoding type.
        expected: u8,
        /// Opcode found in the buffer.
        actual: u8,
    },

    /// Field content is invalid.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Registry tier an opcode was registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Same payload shape in both directions.
    Any,
    /// Sent by the server, decoded by clients.
    FromServer,
    /// Sent by clients, decoded by the server.
    FromClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::FromServer => f.write_str("server"),
            Self::FromClient => f.write_str("client"),
        }
    }
}

/// Errors raised by the message registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No message type is registered for this opcode.
    #[error("unknown opcode {opcode:#04x} (from_server={from_server})")]
    UnknownOpcode {
        /// The unrecognised opcode.
        opcode: u8,
        /// Direction flag used for the lookup.
        from_server: bool,
    },

    /// An opcode was registered twice in the same tier.
    #[error("duplicate registration of opcode {opcode:#04x} in {tier} tier")]
    Duplicate {
        /// The opcode registered twice.
        opcode: u8,
        /// Tier of the conflicting registration.
        tier: Direction,
    },

    /// Decoding a registered message failed.
    #[error("decode of opcode {opcode:#04x} failed: {source}")]
    Decode {
        /// Opcode being decoded.
        opcode: u8,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },
}

/// Errors surfaced by connections, streams and ports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port (or its socket) has been closed.
    #[error("transport closed")]
    Closed,

    /// Reliable send was not acknowledged before its deadline.
    #[error("reliable send timed out")]
    Timeout,

    /// Caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Too many reliable packets are awaiting acknowledgement.
    #[error("reliable queue full ({limit} unacknowledged packets)")]
    QueueFull {
        /// The in-flight limit.
        limit: usize,
    },

    /// Encoded payload does not fit in one datagram.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Stream id outside `0..=127`.
    #[error("invalid stream id {0}")]
    InvalidStream(u8),

    /// Message codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
