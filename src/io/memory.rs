//! In-memory reader/writer over `bytes` buffers.

use crate::error::{Error, Result};
use crate::io::{DataReader, DataWriter};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Zero-copy reader over an immutable [`Bytes`] buffer.
///
/// Cloning the backing `Bytes` is a reference-count bump, so any number of
/// readers can run over one registered buffer concurrently. Views returned
/// by [`DataReader::slice`] share the same allocation.
pub struct BufferReader {
    buf: Bytes,
}

impl BufferReader {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(Error::corruption(format!(
                "read of {} bytes past end of buffer ({} remaining)",
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

impl DataReader for BufferReader {
    fn read_i32(&mut self) -> Result<i32> {
        self.require(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.require(buf.len())?;
        self.buf.copy_to_slice(buf);
        Ok(())
    }

    fn is_direct(&self) -> bool {
        true
    }

    fn slice(&mut self, len: usize) -> Result<Bytes> {
        self.require(len)?;
        let view = self.buf.slice(..len);
        self.buf.advance(len);
        Ok(view)
    }
}

/// Growable in-memory writer accumulating into a [`BytesMut`].
pub struct BufferWriter {
    buf: BytesMut,
}

impl BufferWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Creates an empty writer with `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity) }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discards the accumulated bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// The accumulated bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freezes the accumulated bytes into an immutable buffer.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for BufferWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataWriter for BufferWriter {
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buf.put_i32_le(value);
        Ok(())
    }

    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.put_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
