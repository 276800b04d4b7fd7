//! Grouped key-value stream cursors and sink.
//!
//! Values sharing a key travel as one group: the key is written once with
//! the first value, and every further value in the group carries only its
//! own length prefix. `-1` closes the group; a `-1` where a key length was
//! expected closes the stream.

use crate::error::{Error, Result};
use crate::io::{DataReader, DataWriter};
use crate::stream::{KeyValueCursor, KeyValueSink, END_OF_STREAM};
use bytes::Bytes;

enum CursorState {
    ExpectKey,
    InGroup,
    Done,
}

/// Buffered key-value cursor copying pairs into reused buffers.
pub struct BasicKeyValueCursor<R> {
    reader: R,
    key: Vec<u8>,
    value: Vec<u8>,
    state: CursorState,
}

impl<R: DataReader> BasicKeyValueCursor<R> {
    /// Creates a cursor positioned before the first group.
    pub fn new(reader: R) -> Self {
        Self { reader, key: Vec::new(), value: Vec::new(), state: CursorState::ExpectKey }
    }

    fn read_value(&mut self, len: i32) -> Result<()> {
        if len < 0 {
            return Err(Error::corruption(format!("invalid value length {}", len)));
        }
        self.value.resize(len as usize, 0);
        self.reader.read_fully(&mut self.value)
    }

    /// Reads a group head starting at a key length, or detects end of
    /// stream.
    fn read_head(&mut self) -> Result<bool> {
        let key_len = self.reader.read_i32()?;
        if key_len == END_OF_STREAM {
            self.state = CursorState::Done;
            self.key.clear();
            self.value.clear();
            return Ok(false);
        }
        if key_len < 0 {
            return Err(Error::corruption(format!("invalid key length {}", key_len)));
        }
        self.key.resize(key_len as usize, 0);
        self.reader.read_fully(&mut self.key)?;
        let value_len = self.reader.read_i32()?;
        self.read_value(value_len)?;
        self.state = CursorState::InGroup;
        Ok(true)
    }
}

impl<R: DataReader> KeyValueCursor for BasicKeyValueCursor<R> {
    fn advance(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Done => Ok(false),
            CursorState::ExpectKey => self.read_head(),
            CursorState::InGroup => {
                let len = self.reader.read_i32()?;
                if len == END_OF_STREAM {
                    // Group closed; the next integer is a key length or EOF.
                    return self.read_head();
                }
                self.read_value(len)?;
                Ok(true)
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Zero-copy key-value cursor serving views into the reader's backing
/// buffer.
pub struct DirectKeyValueCursor<R> {
    reader: R,
    key: Bytes,
    value: Bytes,
    state: CursorState,
}

impl<R: DataReader> DirectKeyValueCursor<R> {
    /// Creates a cursor positioned before the first group.
    ///
    /// The reader must expose its backing buffer (`is_direct()`).
    pub fn new(reader: R) -> Self {
        debug_assert!(reader.is_direct());
        Self { reader, key: Bytes::new(), value: Bytes::new(), state: CursorState::ExpectKey }
    }

    fn read_value(&mut self, len: i32) -> Result<()> {
        if len < 0 {
            return Err(Error::corruption(format!("invalid value length {}", len)));
        }
        self.value = self.reader.slice(len as usize)?;
        Ok(())
    }

    fn read_head(&mut self) -> Result<bool> {
        let key_len = self.reader.read_i32()?;
        if key_len == END_OF_STREAM {
            self.state = CursorState::Done;
            self.key = Bytes::new();
            self.value = Bytes::new();
            return Ok(false);
        }
        if key_len < 0 {
            return Err(Error::corruption(format!("invalid key length {}", key_len)));
        }
        self.key = self.reader.slice(key_len as usize)?;
        let value_len = self.reader.read_i32()?;
        self.read_value(value_len)?;
        self.state = CursorState::InGroup;
        Ok(true)
    }
}

impl<R: DataReader> KeyValueCursor for DirectKeyValueCursor<R> {
    fn advance(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Done => Ok(false),
            CursorState::ExpectKey => self.read_head(),
            CursorState::InGroup => {
                let len = self.reader.read_i32()?;
                if len == END_OF_STREAM {
                    return self.read_head();
                }
                self.read_value(len)?;
                Ok(true)
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Key-value sink writing the grouped wire format.
pub struct BasicKeyValueSink<W> {
    writer: W,
    group_open: bool,
    finished: bool,
}

impl<W: DataWriter> BasicKeyValueSink<W> {
    /// Creates a sink over `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, group_open: false, finished: false }
    }

    /// Recovers the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn check_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_state("key-value sink already finished"));
        }
        Ok(())
    }
}

impl<W: DataWriter> KeyValueSink for BasicKeyValueSink<W> {
    fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        if key.len() > i32::MAX as usize || value.len() > i32::MAX as usize {
            return Err(Error::invalid_argument("key or value exceeds i32::MAX bytes"));
        }
        if self.group_open {
            self.writer.write_i32(END_OF_STREAM)?;
        }
        self.writer.write_i32(key.len() as i32)?;
        self.writer.write_fully(key)?;
        self.writer.write_i32(value.len() as i32)?;
        self.writer.write_fully(value)?;
        self.group_open = true;
        Ok(())
    }

    fn accept_value(&mut self, value: &[u8]) -> Result<bool> {
        self.check_open()?;
        if !self.group_open {
            return Ok(false);
        }
        if value.len() > i32::MAX as usize {
            return Err(Error::invalid_argument("value exceeds i32::MAX bytes"));
        }
        self.writer.write_i32(value.len() as i32)?;
        self.writer.write_fully(value)?;
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        self.check_open()?;
        if self.group_open {
            self.writer.write_i32(END_OF_STREAM)?;
            self.group_open = false;
        }
        self.writer.write_i32(END_OF_STREAM)?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }
}

/// Totals recomputed while copying one stream into another.
///
/// The counts size a follow-up sink request: keys are counted once per
/// emitted group, exactly as the destination wrote them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Pairs copied.
    pub records: u64,
    /// Key bytes written (once per group).
    pub key_bytes: u64,
    /// Value bytes written.
    pub value_bytes: u64,
}

/// Streams `cursor` into `sink`, coalescing consecutive equal keys into one
/// group, and returns the copied totals.
///
/// Used when merge output must be restreamed: the merger interleaves its
/// sources, so consecutive pairs sharing a key must be re-grouped on the
/// way out.
pub fn copy<C, S>(cursor: &mut C, sink: &mut S) -> Result<CopyStats>
where
    C: KeyValueCursor + ?Sized,
    S: KeyValueSink + ?Sized,
{
    let mut stats = CopyStats::default();
    let mut last_key = Vec::new();
    let mut in_group = false;

    while cursor.advance()? {
        let key = cursor.key();
        let value = cursor.value();
        stats.records += 1;
        stats.value_bytes += value.len() as u64;

        if in_group && key == last_key.as_slice() && sink.accept_value(value)? {
            continue;
        }
        sink.accept(key, value)?;
        stats.key_bytes += key.len() as u64;
        last_key.clear();
        last_key.extend_from_slice(key);
        in_group = true;
    }
    Ok(stats)
}
