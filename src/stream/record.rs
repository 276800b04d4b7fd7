//! Record stream cursors and sink.

use crate::error::{Error, Result};
use crate::io::{DataReader, DataWriter};
use crate::stream::{RecordCursor, RecordSink, END_OF_STREAM};
use bytes::Bytes;

/// Buffered record cursor copying each record into a reused buffer.
pub struct BasicRecordCursor<R> {
    reader: R,
    record: Vec<u8>,
    done: bool,
}

impl<R: DataReader> BasicRecordCursor<R> {
    /// Creates a cursor positioned before the first record.
    pub fn new(reader: R) -> Self {
        Self { reader, record: Vec::new(), done: false }
    }
}

impl<R: DataReader> RecordCursor for BasicRecordCursor<R> {
    fn advance(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let len = self.reader.read_i32()?;
        if len == END_OF_STREAM {
            self.done = true;
            self.record.clear();
            return Ok(false);
        }
        if len < 0 {
            return Err(Error::corruption(format!("invalid record length {}", len)));
        }
        self.record.resize(len as usize, 0);
        self.reader.read_fully(&mut self.record)?;
        Ok(true)
    }

    fn record(&self) -> &[u8] {
        &self.record
    }
}

/// Zero-copy record cursor serving views into the reader's backing buffer.
pub struct DirectRecordCursor<R> {
    reader: R,
    record: Bytes,
    done: bool,
}

impl<R: DataReader> DirectRecordCursor<R> {
    /// Creates a cursor positioned before the first record.
    ///
    /// The reader must expose its backing buffer (`is_direct()`).
    pub fn new(reader: R) -> Self {
        debug_assert!(reader.is_direct());
        Self { reader, record: Bytes::new(), done: false }
    }
}

impl<R: DataReader> RecordCursor for DirectRecordCursor<R> {
    fn advance(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let len = self.reader.read_i32()?;
        if len == END_OF_STREAM {
            self.done = true;
            self.record = Bytes::new();
            return Ok(false);
        }
        if len < 0 {
            return Err(Error::corruption(format!("invalid record length {}", len)));
        }
        self.record = self.reader.slice(len as usize)?;
        Ok(true)
    }

    fn record(&self) -> &[u8] {
        &self.record
    }
}

/// Record sink writing the length-prefixed wire format.
pub struct BasicRecordSink<W> {
    writer: W,
    records: u64,
    finished: bool,
}

impl<W: DataWriter> BasicRecordSink<W> {
    /// Creates a sink over `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0, finished: false }
    }

    /// Records accepted so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Recovers the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: DataWriter> RecordSink for BasicRecordSink<W> {
    fn accept(&mut self, record: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_state("record sink already finished"));
        }
        if record.len() > i32::MAX as usize {
            return Err(Error::invalid_argument("record exceeds i32::MAX bytes"));
        }
        self.writer.write_i32(record.len() as i32)?;
        self.writer.write_fully(record)?;
        self.records += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_state("record sink already finished"));
        }
        self.writer.write_i32(END_OF_STREAM)?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }
}
