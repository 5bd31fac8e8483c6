//! Packet framing.
//!
//! Wire format of every datagram:
//!
//! ```text
//! +0  (reliable << 7) | stream_id
//! +1  sequence (reliable) or cumulative ack (unreliable)
//! +2  concatenated encoded messages
//! ```
//!
//! The whole buffer is optionally XORed with the connection's key byte. XOR is
//! self-inverse, so [`xor_in_place`] both obfuscates and restores.

use super::constants::{HEADER_SIZE, RELIABLE_FLAG, SEQ_WINDOW, STREAM_MASK};
use super::error::CodecError;

/// Stream identifier in `0..=127`.
pub type StreamId = u8;

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Reliable send (true) or unreliable/ack carrier (false).
    pub reliable: bool,
    /// Stream the payload belongs to.
    pub stream: StreamId,
    /// Sequence number for reliable sends, cumulative ack otherwise.
    pub seq: u8,
}

impl Header {
    /// Header of a reliable send.
    pub fn reliable(stream: StreamId, seq: u8) -> Self {
        Self {
            reliable: true,
            stream: stream & STREAM_MASK,
            seq,
        }
    }

    /// Header of an unreliable send carrying `ack`.
    pub fn unreliable(stream: StreamId, ack: u8) -> Self {
        Self {
            reliable: false,
            stream: stream & STREAM_MASK,
            seq: ack,
        }
    }

    /// Encode into two bytes.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let flag = if self.reliable { RELIABLE_FLAG } else { 0 };
        [flag | (self.stream & STREAM_MASK), self.seq]
    }

    /// Decode from the first two bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            reliable: data[0] & RELIABLE_FLAG != 0,
            stream: data[0] & STREAM_MASK,
            seq: data[1],
        })
    }
}

/// Build a complete datagram: header, payload, then obfuscation.
pub fn encode_packet(header: Header, payload: &[u8], xor_key: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    xor_in_place(&mut buf, xor_key);
    buf
}

/// Undo obfuscation in place and split header from payload.
pub fn decode_packet(data: &mut [u8], xor_key: u8) -> Result<(Header, &[u8]), CodecError> {
    xor_in_place(data, xor_key);
    let header = Header::from_bytes(data)?;
    Ok((header, &data[HEADER_SIZE..]))
}

/// XOR every byte with `key`. A zero key leaves the buffer untouched.
#[inline]
pub fn xor_in_place(data: &mut [u8], key: u8) {
    if key == 0 {
        return;
    }
    for b in data.iter_mut() {
        *b ^= key;
    }
}

/// Modular "at or before" comparison for 8-bit sequence numbers.
///
/// `v` is before `cur` when it lies at most `SEQ_WINDOW - 1` steps behind
/// `cur`, which also covers the 255 -> 0 rollover. Anything further away is
/// treated as ahead of `cur`.
#[inline]
pub fn seq_before(v: u8, cur: u8) -> bool {
    cur.wrapping_sub(v) < SEQ_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(Header::reliable(5, 9).to_bytes(), [0x85, 9]);
        assert_eq!(Header::unreliable(127, 0).to_bytes(), [0x7F, 0]);

        let h = Header::from_bytes(&[0x85, 9, 0xAA]).unwrap();
        assert!(h.reliable);
        assert_eq!(h.stream, 5);
        assert_eq!(h.seq, 9);
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            Header::from_bytes(&[0x80]),
            Err(CodecError::TooShort { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_packet_obfuscation() {
        let packet = encode_packet(Header::reliable(3, 7), b"hello", 0x5A);
        assert_ne!(&packet[2..], b"hello");

        let mut data = packet.clone();
        let (header, payload) = decode_packet(&mut data, 0x5A).unwrap();
        assert_eq!(header, Header::reliable(3, 7));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_zero_key_is_plaintext() {
        let packet = encode_packet(Header::unreliable(1, 4), &[1, 2, 3], 0);
        assert_eq!(packet, vec![0x01, 4, 1, 2, 3]);
    }

    #[test]
    fn test_seq_before_examples() {
        assert!(seq_before(250, 5));
        assert!(!seq_before(10, 5));
        assert!(seq_before(5, 5));
        assert!(seq_before(255, 0));
        assert!(!seq_before(0, 255));
        assert!(seq_before(0, SEQ_WINDOW - 1));
        assert!(!seq_before(0, SEQ_WINDOW));
    }

    proptest! {
        #[test]
        fn prop_behind_within_window_is_before(cur: u8, back in 0u8..SEQ_WINDOW) {
            prop_assert!(seq_before(cur.wrapping_sub(back), cur));
        }

        #[test]
        fn prop_ahead_is_not_before(cur: u8, ahead in 1u8..=(255 - SEQ_WINDOW + 1)) {
            prop_assert!(!seq_before(cur.wrapping_add(ahead), cur));
        }

        #[test]
        fn prop_xor_self_inverse(data: Vec<u8>, key: u8) {
            let mut buf = data.clone();
            xor_in_place(&mut buf, key);
            xor_in_place(&mut buf, key);
            prop_assert_eq!(buf, data);
        }
    }
}
