//! Message codec contract and opcode registry.
//!
//! Higher layers (handshake, game-state sync) define concrete message types by
//! implementing [`Message`] and registering them in a [`Registry`]. The
//! transport never inspects message fields; it only concatenates encodings on
//! send and asks the registry to split them on receive.
//!
//! # Example
//!
//! ```rust
//! use ludonet::message::{Message, Registry, WireReader, WireWriter, encode_messages};
//! use ludonet::{CodecError, Direction};
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Chat {
//!     player: u8,
//!     text: String,
//! }
//!
//! impl Message for Chat {
//!     fn opcode(&self) -> u8 {
//!         0x10
//!     }
//!
//!     fn encoded_size(&self) -> usize {
//!         1 + 1 + 2 + self.text.len()
//!     }
//!
//!     fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
//!         let mut w = WireWriter::new(buf);
//!         w.put_u8(self.opcode())?;
//!         w.put_u8(self.player)?;
//!         w.put_blob(self.text.as_bytes())?;
//!         Ok(w.written())
//!     }
//!
//!     fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
//!         let mut r = WireReader::new(buf);
//!         r.expect_opcode(self.opcode())?;
//!         self.player = r.get_u8()?;
//!         self.text = String::from_utf8_lossy(r.get_blob()?).into_owned();
//!         Ok(r.consumed())
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register::<Chat>(Direction::Any);
//!
//! let msg = Chat { player: 3, text: "gg".into() };
//! let payload = encode_messages(&[&msg]).unwrap();
//! let decoded = registry.decode_all(&payload, false).unwrap();
//! assert_eq!(decoded[0].downcast_ref::<Chat>(), Some(&msg));
//! ```

mod registry;
mod wire;

pub use registry::*;
pub use wire::*;

use std::any::Any;
use std::fmt;

use crate::core::CodecError;

/// Object-safe access to [`Any`] for every message type.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value with a fixed opcode and a binary encoding.
///
/// The encoding starts with the opcode byte; `encoded_size` includes it. Each
/// `decode` call fills a fresh value produced by the registry's constructor.
pub trait Message: AsAny + Send + Sync + fmt::Debug {
    /// Leading opcode byte.
    fn opcode(&self) -> u8;

    /// Exact number of bytes `encode` writes.
    fn encoded_size(&self) -> usize;

    /// Encode into `buf`, returning bytes written.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;

    /// Decode from the start of `buf`, returning bytes consumed.
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError>;

    /// Encode into a freshly allocated buffer.
    fn encode_to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.encoded_size()];
        let n = self.encode(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl dyn Message {
    /// Whether the concrete type is `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow as the concrete type `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Concatenate the encodings of `msgs` into one payload.
pub fn encode_messages(msgs: &[&dyn Message]) -> Result<Vec<u8>, CodecError> {
    let total: usize = msgs.iter().map(|m| m.encoded_size()).sum();
    let mut buf = vec![0u8; total];
    let mut offset = 0;
    for msg in msgs {
        offset += msg.encode(&mut buf[offset..])?;
    }
    buf.truncate(offset);
    Ok(buf)
}
