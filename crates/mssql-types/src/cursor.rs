//! Checked byte cursor over wire data.
//!
//! Every read of TDS wire data goes through [`WireCursor`]. Reads either
//! consume exactly the requested number of bytes or fail with
//! [`TypeError::BufferTooSmall`] without moving the position.

use bytes::Bytes;

use crate::error::TypeError;

/// Forward-only cursor over an immutable byte buffer.
#[derive(Debug, Clone, Default)]
pub struct WireCursor {
    data: Bytes,
    position: usize,
}

impl WireCursor {
    /// Create a cursor positioned at the start of `data`.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset from the start of the buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next byte without consuming it.
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    fn ensure(&self, needed: usize) -> Result<(), TypeError> {
        if self.remaining() < needed {
            return Err(TypeError::BufferTooSmall {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Consume exactly `len` bytes, returned as a zero-copy slice.
    pub fn take(&mut self, len: usize) -> Result<Bytes, TypeError> {
        self.ensure(len)?;
        let slice = self.data.slice(self.position..self.position + len);
        self.position += len;
        Ok(slice)
    }

    /// Consume exactly `len` bytes and discard them.
    pub fn skip(&mut self, len: usize) -> Result<(), TypeError> {
        self.ensure(len)?;
        self.position += len;
        Ok(())
    }

    /// Consume everything that is left.
    pub fn take_rest(&mut self) -> Bytes {
        let rest = self.data.slice(self.position..);
        self.position = self.data.len();
        rest
    }

    /// Fail unless the cursor has been fully consumed.
    pub fn finish(&self) -> Result<(), TypeError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(TypeError::TrailingBytes { remaining }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TypeError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, TypeError> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> Result<u16, TypeError> {
        self.array().map(u16::from_le_bytes)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16_be(&mut self) -> Result<u16, TypeError> {
        self.array().map(u16::from_be_bytes)
    }

    /// Read a little-endian `i16`.
    pub fn read_i16_le(&mut self) -> Result<i16, TypeError> {
        self.array().map(i16::from_le_bytes)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32, TypeError> {
        self.array().map(u32::from_le_bytes)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> Result<u32, TypeError> {
        self.array().map(u32::from_be_bytes)
    }

    /// Read a little-endian `i32`.
    pub fn read_i32_le(&mut self) -> Result<i32, TypeError> {
        self.array().map(i32::from_le_bytes)
    }

    /// Read a little-endian `u64`.
    pub fn read_u64_le(&mut self) -> Result<u64, TypeError> {
        self.array().map(u64::from_le_bytes)
    }

    /// Read a little-endian `i64`.
    pub fn read_i64_le(&mut self) -> Result<i64, TypeError> {
        self.array().map(i64::from_le_bytes)
    }

    /// Read a little-endian `f32`.
    pub fn read_f32_le(&mut self) -> Result<f32, TypeError> {
        self.array().map(f32::from_le_bytes)
    }

    /// Read a little-endian `f64`.
    pub fn read_f64_le(&mut self) -> Result<f64, TypeError> {
        self.array().map(f64::from_le_bytes)
    }

    /// Read `char_count` UTF-16LE code units as a string.
    pub fn read_utf16(&mut self, char_count: usize) -> Result<String, TypeError> {
        let raw = self.take(char_count * 2)?;
        crate::decode::decode_utf16_string(&raw)
    }

    /// Read a string with a one-byte character count prefix.
    pub fn read_b_varchar(&mut self) -> Result<String, TypeError> {
        let len = self.read_u8()? as usize;
        self.read_utf16(len)
    }

    /// Read a string with a two-byte character count prefix.
    pub fn read_us_varchar(&mut self) -> Result<String, TypeError> {
        let len = self.read_u16_le()? as usize;
        self.read_utf16(len)
    }
}

impl From<Bytes> for WireCursor {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for WireCursor {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}
