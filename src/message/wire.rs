//! Bounds-checked field codecs for message implementations.
//!
//! All integers are little-endian. Every accessor checks the remaining length
//! first and returns a [`CodecError`] instead of panicking on short input.

use bytes::{Buf, BufMut};

use crate::core::CodecError;

/// Cursor writing fields into a fixed output buffer.
#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    capacity: usize,
}

impl<'a> WireWriter<'a> {
    /// Start writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len();
        Self { buf, capacity }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.capacity - self.buf.len()
    }

    fn reserve(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::BufferTooSmall {
                required: self.written() + n,
                available: self.capacity,
            });
        }
        Ok(())
    }

    /// Write one byte.
    pub fn put_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.reserve(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    /// Write a little-endian `u16`.
    pub fn put_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.reserve(2)?;
        self.buf.put_u16_le(v);
        Ok(())
    }

    /// Write a little-endian `u32`.
    pub fn put_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.reserve(4)?;
        self.buf.put_u32_le(v);
        Ok(())
    }

    /// Write a little-endian `i32`.
    pub fn put_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.reserve(4)?;
        self.buf.put_i32_le(v);
        Ok(())
    }

    /// Write raw bytes.
    pub fn put_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.reserve(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    /// Write `s` into exactly `width` bytes, truncating or zero-padding.
    pub fn put_fixed_str(&mut self, s: &str, width: usize) -> Result<(), CodecError> {
        self.reserve(width)?;
        let bytes = s.as_bytes();
        let n = bytes.len().min(width);
        self.buf.put_slice(&bytes[..n]);
        self.buf.put_bytes(0, width - n);
        Ok(())
    }

    /// Write a `u16` length followed by `data`.
    pub fn put_blob(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(data.len())
            .map_err(|_| CodecError::InvalidFormat(format!("blob of {} bytes", data.len())))?;
        self.reserve(2 + data.len())?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(data);
        Ok(())
    }
}

/// Cursor reading fields from an input buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.len - self.buf.len()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::TooShort {
                expected: self.consumed() + n,
                actual: self.len,
            });
        }
        Ok(())
    }

    /// Read the opcode byte and check it.
    pub fn expect_opcode(&mut self, opcode: u8) -> Result<(), CodecError> {
        let actual = self.get_u8()?;
        if actual != opcode {
            return Err(CodecError::OpcodeMismatch {
                expected: opcode,
                actual,
            });
        }
        Ok(())
    }

    /// Read one byte.
    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian `u16`.
    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a little-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a little-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Borrow the next `n` bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a `width`-byte zero-padded string, cut at the first NUL.
    pub fn get_fixed_str(&mut self, width: usize) -> Result<String, CodecError> {
        let raw = self.get_bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Read a `u16` length followed by that many bytes.
    pub fn get_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.get_u16()? as usize;
        self.get_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_reader_fields() {
        let mut buf = [0u8; 32];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(0xAB).unwrap();
        w.put_u16(0x1234).unwrap();
        w.put_i32(-5).unwrap();
        w.put_fixed_str("hi", 4).unwrap();
        w.put_blob(&[9, 8, 7]).unwrap();
        let n = w.written();
        assert_eq!(n, 1 + 2 + 4 + 4 + 2 + 3);
        assert_eq!(&buf[1..3], &[0x34, 0x12]);

        let mut r = WireReader::new(&buf[..n]);
        assert_eq!(r.get_u8().unwrap(), 0xAB);
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_i32().unwrap(), -5);
        assert_eq!(r.get_fixed_str(4).unwrap(), "hi");
        assert_eq!(r.get_blob().unwrap(), &[9, 8, 7]);
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.consumed(), n);
    }

    #[test]
    fn test_writer_overflow() {
        let mut buf = [0u8; 3];
        let mut w = WireWriter::new(&mut buf);
        w.put_u16(1).unwrap();
        let err = w.put_u32(1).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferTooSmall {
                required: 6,
                available: 3
            }
        );
        // Failed write leaves the cursor untouched.
        assert_eq!(w.written(), 2);
    }

    #[test]
    fn test_reader_short() {
        let mut r = WireReader::new(&[1, 2, 3]);
        r.get_u8().unwrap();
        assert_eq!(
            r.get_u32().unwrap_err(),
            CodecError::TooShort {
                expected: 5,
                actual: 3
            }
        );
    }

    #[test]
    fn test_truncated_blob() {
        let mut r = WireReader::new(&[5, 0, 1, 2]);
        assert!(matches!(r.get_blob(), Err(CodecError::TooShort { .. })));
    }

    #[test]
    fn test_fixed_str_truncates() {
        let mut buf = [0u8; 3];
        let mut w = WireWriter::new(&mut buf);
        w.put_fixed_str("abcdef", 3).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_opcode_mismatch() {
        let mut r = WireReader::new(&[0x02]);
        assert_eq!(
            r.expect_opcode(0x01).unwrap_err(),
            CodecError::OpcodeMismatch {
                expected: 0x01,
                actual: 0x02
            }
        );
    }
}
