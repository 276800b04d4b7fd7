//! Pool-backed run collection.
//!
//! A run stream hands out sinks that accumulate one run in memory and, on
//! finish, register the finished buffer with a [`BufferPool`]. Runs spill
//! to disk under pool pressure and read back transparently either way, so
//! a sorting writer can produce any number of runs within a bounded
//! memory budget and merge them afterwards.

use crate::codec::DataComparator;
use crate::error::{Error, Result};
use crate::io::{BufferProvider, BufferReader, BufferWriter};
use crate::pool::{BufferPool, PoolHandle, Ticket};
use crate::stream::{
    key_value_cursor, record_cursor, BasicKeyValueCursor, BasicKeyValueSink, BasicRecordSink,
    KeyValueCursor, KeyValueMerger, KeyValueSink, KeyValueStream, RecordCursor, RecordSink,
    RecordStream,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Wire bytes of an empty key-value stream.
const EMPTY_STREAM: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];

/// Collects grouped key-value runs into a buffer pool.
///
/// Clones share the same run list, so a sorting writer can own one clone
/// while the caller keeps another to collect the finished runs from.
#[derive(Clone)]
pub struct RunStream {
    pool: BufferPool,
    priority: i32,
    runs: Arc<Mutex<Vec<PoolHandle>>>,
}

impl RunStream {
    /// Creates a run stream registering runs at priority zero.
    pub fn new(pool: BufferPool) -> Self {
        Self::with_priority(pool, 0)
    }

    /// Creates a run stream with an explicit eviction priority for its
    /// runs.
    pub fn with_priority(pool: BufferPool, priority: i32) -> Self {
        Self { pool, priority, runs: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Runs finished so far.
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// Whether any run has been finished.
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }

    /// Takes the finished runs, leaving the stream empty.
    pub fn take_runs(&self) -> RunSet {
        RunSet { runs: std::mem::take(&mut *self.runs.lock()) }
    }
}

impl KeyValueStream for RunStream {
    type Sink = RunSink;

    fn open_sink(&mut self, records: u64, key_bytes: u64, value_bytes: u64) -> Result<RunSink> {
        // Worst case on the wire: every record opens its own group, costing
        // two length prefixes and a group end per record plus the final
        // terminator.
        let hint = key_bytes + value_bytes + 12 * records + 4;
        let ticket = self.pool.reserve(hint)?;
        Ok(RunSink {
            inner: Some(BasicKeyValueSink::new(BufferWriter::with_capacity(hint as usize))),
            ticket: Some(ticket),
            pool: self.pool.clone(),
            priority: self.priority,
            runs: Arc::clone(&self.runs),
        })
    }
}

/// Sink accumulating one key-value run for pool registration.
///
/// Dropping an unfinished sink discards the run and refunds its claim.
pub struct RunSink {
    inner: Option<BasicKeyValueSink<BufferWriter>>,
    ticket: Option<Ticket>,
    pool: BufferPool,
    priority: i32,
    runs: Arc<Mutex<Vec<PoolHandle>>>,
}

impl RunSink {
    fn sink_mut(&mut self) -> Result<&mut BasicKeyValueSink<BufferWriter>> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::invalid_state("run sink already finished"))
    }
}

impl KeyValueSink for RunSink {
    fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.sink_mut()?.accept(key, value)
    }

    fn accept_value(&mut self, value: &[u8]) -> Result<bool> {
        self.sink_mut()?.accept_value(value)
    }

    fn finish(&mut self) -> Result<()> {
        let mut inner = match self.inner.take() {
            Some(inner) => inner,
            None => return Err(Error::invalid_state("run sink already finished")),
        };
        inner.finish()?;
        let buffer = inner.into_inner().freeze();

        let mut ticket = match self.ticket.take() {
            Some(ticket) => ticket,
            None => return Err(Error::invalid_state("run sink lost its ticket")),
        };
        let needed = buffer.len() as u64;
        if needed > ticket.size() {
            // The caller's size hint undershot; replace the claim.
            drop(ticket);
            ticket = self.pool.reserve(needed)?;
        }
        let handle = self.pool.register_prioritized(ticket, buffer, self.priority)?;
        self.runs.lock().push(handle);
        Ok(())
    }
}

/// A batch of finished key-value runs ready to merge.
pub struct RunSet {
    runs: Vec<PoolHandle>,
}

impl RunSet {
    /// Number of runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether the set holds no runs.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs still resident in memory.
    pub fn resident(&self) -> usize {
        self.runs.iter().filter(|handle| handle.is_resident()).count()
    }

    /// Opens one cursor per run, in finish order.
    pub fn open_cursors(&self) -> Result<Vec<Box<dyn KeyValueCursor + Send>>> {
        self.runs
            .iter()
            .map(|handle| Ok(key_value_cursor(handle.open()?)))
            .collect()
    }

    /// Merges all runs into one sorted cursor.
    ///
    /// An empty set merges to an empty cursor. The set must outlive the
    /// returned cursor.
    pub fn merge(
        &self,
        comparator: Option<Arc<dyn DataComparator>>,
    ) -> Result<Box<dyn KeyValueCursor + Send>> {
        if self.runs.is_empty() {
            let empty = BufferReader::new(Bytes::from_static(EMPTY_STREAM));
            return Ok(Box::new(BasicKeyValueCursor::new(empty)));
        }
        Ok(Box::new(KeyValueMerger::new(self.open_cursors()?, comparator)?))
    }
}

/// Collects plain record runs into a buffer pool.
#[derive(Clone)]
pub struct RecordRunStream {
    pool: BufferPool,
    priority: i32,
    runs: Arc<Mutex<Vec<PoolHandle>>>,
}

impl RecordRunStream {
    /// Creates a record run stream registering runs at priority zero.
    pub fn new(pool: BufferPool) -> Self {
        Self::with_priority(pool, 0)
    }

    /// Creates a record run stream with an explicit eviction priority.
    pub fn with_priority(pool: BufferPool, priority: i32) -> Self {
        Self { pool, priority, runs: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Runs finished so far.
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// Whether any run has been finished.
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }

    /// Takes the finished runs, leaving the stream empty.
    pub fn take_runs(&self) -> RecordRunSet {
        RecordRunSet { runs: std::mem::take(&mut *self.runs.lock()) }
    }
}

impl RecordStream for RecordRunStream {
    type Sink = RecordRunSink;

    fn open_sink(&mut self, records: u64, bytes: u64) -> Result<RecordRunSink> {
        // One length prefix per record plus the terminator.
        let hint = bytes + 4 * records + 4;
        let ticket = self.pool.reserve(hint)?;
        Ok(RecordRunSink {
            inner: Some(BasicRecordSink::new(BufferWriter::with_capacity(hint as usize))),
            ticket: Some(ticket),
            pool: self.pool.clone(),
            priority: self.priority,
            runs: Arc::clone(&self.runs),
        })
    }
}

/// Sink accumulating one record run for pool registration.
pub struct RecordRunSink {
    inner: Option<BasicRecordSink<BufferWriter>>,
    ticket: Option<Ticket>,
    pool: BufferPool,
    priority: i32,
    runs: Arc<Mutex<Vec<PoolHandle>>>,
}

impl RecordRunSink {
    fn sink_mut(&mut self) -> Result<&mut BasicRecordSink<BufferWriter>> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::invalid_state("run sink already finished"))
    }
}

impl RecordSink for RecordRunSink {
    fn accept(&mut self, record: &[u8]) -> Result<()> {
        self.sink_mut()?.accept(record)
    }

    fn finish(&mut self) -> Result<()> {
        let mut inner = match self.inner.take() {
            Some(inner) => inner,
            None => return Err(Error::invalid_state("run sink already finished")),
        };
        inner.finish()?;
        let buffer = inner.into_inner().freeze();

        let mut ticket = match self.ticket.take() {
            Some(ticket) => ticket,
            None => return Err(Error::invalid_state("run sink lost its ticket")),
        };
        let needed = buffer.len() as u64;
        if needed > ticket.size() {
            drop(ticket);
            ticket = self.pool.reserve(needed)?;
        }
        let handle = self.pool.register_prioritized(ticket, buffer, self.priority)?;
        self.runs.lock().push(handle);
        Ok(())
    }
}

/// A batch of finished record runs.
pub struct RecordRunSet {
    runs: Vec<PoolHandle>,
}

impl RecordRunSet {
    /// Number of runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether the set holds no runs.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs still resident in memory.
    pub fn resident(&self) -> usize {
        self.runs.iter().filter(|handle| handle.is_resident()).count()
    }

    /// Converts the set into a pull source for
    /// [`StreamObjectReader`](crate::sorter::StreamObjectReader).
    ///
    /// Each run's pool entry stays open exactly as long as its cursor.
    pub fn into_source(self) -> impl FnMut() -> Result<Option<Box<dyn RecordCursor + Send>>> {
        let mut runs: VecDeque<PoolHandle> = self.runs.into();
        move || match runs.pop_front() {
            Some(handle) => {
                let cursor = record_cursor(handle.open()?);
                Ok(Some(Box::new(RunCursor { cursor, _handle: handle })
                    as Box<dyn RecordCursor + Send>))
            }
            None => Ok(None),
        }
    }
}

/// Record cursor keeping its run's pool entry open until dropped.
struct RunCursor {
    cursor: Box<dyn RecordCursor + Send>,
    _handle: PoolHandle,
}

impl RecordCursor for RunCursor {
    fn advance(&mut self) -> Result<bool> {
        self.cursor.advance()
    }

    fn record(&self) -> &[u8] {
        self.cursor.record()
    }
}
