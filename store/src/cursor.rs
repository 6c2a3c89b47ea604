//! Byte and bit level cursors over in-memory buffers.
//!
//! `ByteCursor` is `Copy`, forking one is free and the fork moves
//! independently, which is what speculative parsing and jumping to an older
//! cross-reference section rely on.
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite};
use std::io::{self, Cursor, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("unexpected end of data at {pos}, wanted {wanted} bytes")]
    UnexpectedEof { pos: usize, wanted: usize },
}

pub type CursorResult<T> = Result<T, CursorError>;

#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// New cursor over the same buffer positioned at `pos`.
    pub fn at(&self, pos: usize) -> Self {
        Self {
            buf: self.buf,
            pos: pos.min(self.buf.len()),
        }
    }

    pub fn fork(&self) -> Self {
        *self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> CursorResult<()> {
        if pos > self.buf.len() {
            return Err(CursorError::UnexpectedEof {
                pos: self.buf.len(),
                wanted: pos - self.buf.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// Bytes from current position to the end.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Return true if bytes at current position start with `tag`, position not changed.
    pub fn peek_tag(&self, tag: &[u8]) -> bool {
        self.remaining().starts_with(tag)
    }

    pub fn read_bytes(&mut self, n: usize) -> CursorResult<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < n {
            return Err(CursorError::UnexpectedEof {
                pos: self.pos,
                wanted: n,
            });
        }
        self.pos += n;
        Ok(&rest[..n])
    }

    pub fn read_u8(&mut self) -> CursorResult<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> CursorResult<u16> {
        self.read_uint(2).map(|v| v as u16)
    }

    pub fn read_u32(&mut self) -> CursorResult<u32> {
        self.read_uint(4)
    }

    /// Read big-endian unsigned integer of `width` bytes, `width` in 0..=4.
    /// Zero width reads nothing and returns 0.
    pub fn read_uint(&mut self, width: usize) -> CursorResult<u32> {
        debug_assert!(width <= 4);
        Ok(self
            .read_bytes(width)?
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }

    /// Bit reader starts at current position.
    pub fn bits(&self) -> BitCursor<'a> {
        BitCursor {
            reader: BitReader::new(Cursor::new(self.remaining())),
            start: self.pos,
        }
    }
}

/// MSB-first bit reader, reads whole bytes from underlying buffer.
pub struct BitCursor<'a> {
    reader: BitReader<Cursor<&'a [u8]>, BigEndian>,
    // offset of the first byte in the owning buffer, for error reports
    start: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(Cursor::new(buf)),
            start: 0,
        }
    }

    fn eof(&self, wanted: u32) -> CursorError {
        CursorError::UnexpectedEof {
            pos: self.start,
            wanted: wanted.div_ceil(8) as usize,
        }
    }

    pub fn read_bit(&mut self) -> CursorResult<bool> {
        self.reader.read_bit().map_err(|_| self.eof(1))
    }

    /// Read `bits` (at most 32) bits as unsigned integer.
    pub fn read_bits(&mut self, bits: u32) -> CursorResult<u32> {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return Ok(0);
        }
        self.reader.read::<u32>(bits).map_err(|_| self.eof(bits))
    }

    /// Skip remaining bits of current byte.
    pub fn byte_align(&mut self) {
        self.reader.byte_align();
    }
}

/// Append only byte buffer, knows how many bytes written so far.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with existing content, new bytes appended after it.
    pub fn with_prefix(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Write `v` as big-endian integer of `width` bytes, high bytes dropped.
    pub fn write_uint(&mut self, width: usize, v: u32) {
        debug_assert!(width <= 4);
        let bytes = v.to_be_bytes();
        self.buf.extend_from_slice(&bytes[4 - width..]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Bit writer appends to this buffer, flushed when finished or dropped.
    pub fn bits(&mut self) -> BitWriter<'_> {
        BitWriter {
            inner: Some(bitstream_io::BitWriter::new(&mut self.buf)),
        }
    }
}

impl Write for ByteWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// MSB-first bit writer. A partial trailing byte is zero padded and flushed
/// once, by `finish()` or on drop.
pub struct BitWriter<'w> {
    inner: Option<bitstream_io::BitWriter<&'w mut Vec<u8>, BigEndian>>,
}

impl<'w> BitWriter<'w> {
    pub fn write_bit(&mut self, bit: bool) {
        if let Some(w) = self.inner.as_mut() {
            // writes into Vec never fail
            let _ = w.write_bit(bit);
        }
    }

    /// Write low `bits` bits of `v`, at most 32.
    pub fn write_bits(&mut self, bits: u32, v: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }
        let v = if bits == 32 { v } else { v & ((1 << bits) - 1) };
        if let Some(w) = self.inner.as_mut() {
            let _ = w.write(bits, v);
        }
    }

    pub fn finish(mut self) {
        self.flush_once();
    }

    fn flush_once(&mut self) {
        if let Some(mut w) = self.inner.take() {
            let _ = w.byte_align();
        }
    }
}

impl<'w> Drop for BitWriter<'w> {
    fn drop(&mut self) {
        self.flush_once();
    }
}
