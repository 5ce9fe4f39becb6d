//! # Row Byte Cursors
//!
//! Little-endian write and read cursors used by row serialization. A
//! `RowOutput` is reused across rows (`reset` keeps the allocation); a
//! `RowInput` borrows the bytes of one row straight out of the data file
//! mapping.

use eyre::{ensure, Result};

#[derive(Debug, Default)]
pub struct RowOutput {
    buf: Vec<u8>,
}

impl RowOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Zero-fills up to `len` bytes total.
    pub fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }
}

#[derive(Debug)]
pub struct RowInput<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RowInput<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            len <= self.remaining(),
            "row truncated: need {} bytes at offset {}, {} left",
            len,
            self.pos,
            self.remaining()
        );
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_array().map(i64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_then_input_reads_same_fields() {
        let mut out = RowOutput::new();
        out.write_u32(24);
        out.write_u16(1);
        out.write_i64(-7);
        out.write_bytes(b"ab");
        out.pad_to(24);

        assert_eq!(out.len(), 24);

        let mut input = RowInput::new(out.as_bytes());
        assert_eq!(input.read_u32().unwrap(), 24);
        assert_eq!(input.read_u16().unwrap(), 1);
        assert_eq!(input.read_i64().unwrap(), -7);
        assert_eq!(input.read_bytes(2).unwrap(), b"ab");
        assert_eq!(input.remaining(), 8);
    }

    #[test]
    fn input_rejects_overrun() {
        let mut input = RowInput::new(&[1, 2, 3]);
        assert!(input.read_u32().is_err());
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn reset_keeps_allocation() {
        let mut out = RowOutput::with_capacity(64);
        out.write_bytes(&[0xAA; 32]);
        out.reset();
        assert!(out.is_empty());
        out.pad_to(4);
        assert_eq!(out.as_bytes(), &[0, 0, 0, 0]);
    }
}
