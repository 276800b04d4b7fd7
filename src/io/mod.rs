//! Reader/writer primitives.
//!
//! Every stream in the engine is built on one uniform pair of contracts:
//! [`DataReader`] and [`DataWriter`] move fixed-width little-endian 32-bit
//! integers and raw byte ranges. Two families implement them: in-memory
//! buffers ([`BufferReader`]/[`BufferWriter`]) and buffered file channels
//! ([`FileReader`]/[`FileWriter`]).
//!
//! A reader backed by a contiguous in-memory buffer reports
//! [`DataReader::is_direct`] and serves [`DataReader::slice`] views that
//! share the backing allocation instead of copying. Cursor factories use
//! this capability check to pick a zero-copy implementation when one is
//! available.

mod file;
mod memory;

pub use file::{FileReader, FileWriter};
pub use memory::{BufferReader, BufferWriter};

use crate::error::{Error, Result};
use bytes::Bytes;

/// A boxed reader, as providers hand them out.
pub type DynReader = Box<dyn DataReader + Send>;

/// A boxed writer.
pub type DynWriter = Box<dyn DataWriter + Send>;

/// The minimal read contract the engine's streams are decoded from.
pub trait DataReader {
    /// Reads one little-endian i32.
    fn read_i32(&mut self) -> Result<i32>;

    /// Fills `buf` completely from the stream.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Returns `true` if this reader exposes its backing buffer through
    /// [`DataReader::slice`].
    fn is_direct(&self) -> bool {
        false
    }

    /// Returns the next `len` bytes as a view sharing the backing buffer,
    /// advancing past them.
    ///
    /// Only available when [`DataReader::is_direct`] returns `true`.
    fn slice(&mut self, len: usize) -> Result<Bytes> {
        let _ = len;
        Err(Error::invalid_state("reader does not expose its backing buffer"))
    }
}

/// The minimal write contract the engine's streams are encoded through.
pub trait DataWriter {
    /// Writes one little-endian i32.
    fn write_i32(&mut self, value: i32) -> Result<()>;

    /// Writes all of `buf` to the stream.
    fn write_fully(&mut self, buf: &[u8]) -> Result<()>;

    /// Pushes buffered bytes down to the underlying channel.
    fn flush(&mut self) -> Result<()>;
}

/// A reusable factory for opening readers against some backing, in-memory
/// or on disk.
pub trait BufferProvider: Send + Sync {
    /// Opens a fresh reader over the full content.
    fn open(&self) -> Result<DynReader>;
}

impl<R: DataReader + ?Sized> DataReader for Box<R> {
    fn read_i32(&mut self) -> Result<i32> {
        (**self).read_i32()
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_fully(buf)
    }

    fn is_direct(&self) -> bool {
        (**self).is_direct()
    }

    fn slice(&mut self, len: usize) -> Result<Bytes> {
        (**self).slice(len)
    }
}

impl<W: DataWriter + ?Sized> DataWriter for Box<W> {
    fn write_i32(&mut self, value: i32) -> Result<()> {
        (**self).write_i32(value)
    }

    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_fully(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<P: BufferProvider + ?Sized> BufferProvider for Box<P> {
    fn open(&self) -> Result<DynReader> {
        (**self).open()
    }
}
