//! Accumulate-sort-flush writers.

use crate::codec::{DataComparator, KeyValueSerializer, Serializer};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::io::BufferWriter;
use crate::sorter::ObjectWriter;
use crate::stream::{KeyValueSink, KeyValueStream, RecordSink, RecordStream};
use std::cmp::Ordering;
use std::sync::Arc;

/// Byte ranges of one accumulated record inside the buffer.
struct EntryRange {
    key_start: usize,
    value_start: usize,
    end: usize,
}

/// Sorting writer producing grouped key-value runs.
///
/// Objects are serialized into one growable buffer as they arrive. When
/// the accumulated record count or byte size crosses its threshold, the
/// writer flushes: it sorts the recorded byte ranges by key bytes (and by
/// the value comparator within equal keys, when one is supplied), opens a
/// fresh sink sized from the flush totals, and streams the ranges out with
/// consecutive equal keys coalesced into one group. Records are serialized
/// exactly once; sorting moves only the ranges.
pub struct StreamGroupWriter<T, S> {
    stream: S,
    serializer: Arc<dyn KeyValueSerializer<T>>,
    comparator: Option<Arc<dyn DataComparator>>,
    buffer: BufferWriter,
    entries: Vec<EntryRange>,
    record_limit: usize,
    flush_threshold: usize,
    closed: bool,
}

impl<T, S: KeyValueStream> StreamGroupWriter<T, S> {
    /// Creates a writer flushing runs into `stream`.
    pub fn new(stream: S, serializer: Arc<dyn KeyValueSerializer<T>>, options: &Options) -> Self {
        Self {
            stream,
            serializer,
            comparator: None,
            buffer: BufferWriter::with_capacity(options.sort_buffer_size),
            entries: Vec::new(),
            record_limit: options.sort_record_limit,
            flush_threshold: options.flush_threshold(),
            closed: false,
        }
    }

    /// Creates a writer that additionally orders values within equal keys
    /// by `comparator`.
    pub fn with_comparator(
        stream: S,
        serializer: Arc<dyn KeyValueSerializer<T>>,
        comparator: Arc<dyn DataComparator>,
        options: &Options,
    ) -> Self {
        let mut writer = Self::new(stream, serializer, options);
        writer.comparator = Some(comparator);
        writer
    }

    /// The stream runs are flushed into.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Records buffered and not yet flushed.
    pub fn buffered(&self) -> usize {
        self.entries.len()
    }

    /// Sorts the accumulated records and streams them out as one run.
    ///
    /// Does nothing when the buffer is empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let data = self.buffer.as_slice();
        let comparator = &self.comparator;
        self.entries.sort_by(|a, b| {
            let keys = data[a.key_start..a.value_start].cmp(&data[b.key_start..b.value_start]);
            match (keys, comparator) {
                (Ordering::Equal, Some(cmp)) => {
                    cmp.compare(&data[a.value_start..a.end], &data[b.value_start..b.end])
                }
                _ => keys,
            }
        });

        let records = self.entries.len() as u64;
        let mut key_bytes = 0u64;
        let mut value_bytes = 0u64;
        for entry in &self.entries {
            key_bytes += (entry.value_start - entry.key_start) as u64;
            value_bytes += (entry.end - entry.value_start) as u64;
        }

        let mut sink = self.stream.open_sink(records, key_bytes, value_bytes)?;
        let mut last_key: &[u8] = &[];
        let mut in_group = false;
        for entry in &self.entries {
            let key = &data[entry.key_start..entry.value_start];
            let value = &data[entry.value_start..entry.end];
            if in_group && key == last_key && sink.accept_value(value)? {
                continue;
            }
            sink.accept(key, value)?;
            last_key = key;
            in_group = true;
        }
        sink.finish()?;

        self.entries.clear();
        self.buffer.clear();
        Ok(())
    }
}

impl<T, S: KeyValueStream> ObjectWriter<T> for StreamGroupWriter<T, S> {
    fn put(&mut self, item: &T) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("group writer is closed"));
        }
        let key_start = self.buffer.len();
        self.serializer.serialize_key(item, &mut self.buffer)?;
        let value_start = self.buffer.len();
        self.serializer.serialize_value(item, &mut self.buffer)?;
        let end = self.buffer.len();
        self.entries.push(EntryRange { key_start, value_start, end });

        if self.entries.len() >= self.record_limit || self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        self.buffer = BufferWriter::new();
        Ok(())
    }
}

impl<T, S> Drop for StreamGroupWriter<T, S> {
    fn drop(&mut self) {
        if !self.closed && !self.entries.is_empty() {
            log::warn!(
                "Group writer dropped with {} unflushed records",
                self.entries.len()
            );
        }
    }
}

/// Buffering writer producing plain record runs in input order.
///
/// The record-stream sibling of [`StreamGroupWriter`]: same accumulation
/// buffer and the same count and size thresholds, but records carry no key
/// and are flushed in the order they arrived.
pub struct StreamObjectWriter<T, S> {
    stream: S,
    serializer: Arc<dyn Serializer<T>>,
    buffer: BufferWriter,
    offsets: Vec<usize>,
    record_limit: usize,
    flush_threshold: usize,
    closed: bool,
}

impl<T, S: RecordStream> StreamObjectWriter<T, S> {
    /// Creates a writer flushing runs into `stream`.
    pub fn new(stream: S, serializer: Arc<dyn Serializer<T>>, options: &Options) -> Self {
        Self {
            stream,
            serializer,
            buffer: BufferWriter::with_capacity(options.sort_buffer_size),
            offsets: Vec::new(),
            record_limit: options.sort_record_limit,
            flush_threshold: options.flush_threshold(),
            closed: false,
        }
    }

    /// The stream runs are flushed into.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Records buffered and not yet flushed.
    pub fn buffered(&self) -> usize {
        self.offsets.len()
    }

    /// Streams the accumulated records out as one run, in input order.
    pub fn flush(&mut self) -> Result<()> {
        if self.offsets.is_empty() {
            return Ok(());
        }

        let data = self.buffer.as_slice();
        let mut sink = self
            .stream
            .open_sink(self.offsets.len() as u64, data.len() as u64)?;
        for (i, start) in self.offsets.iter().enumerate() {
            let end = self.offsets.get(i + 1).copied().unwrap_or(data.len());
            sink.accept(&data[*start..end])?;
        }
        sink.finish()?;

        self.offsets.clear();
        self.buffer.clear();
        Ok(())
    }
}

impl<T, S: RecordStream> ObjectWriter<T> for StreamObjectWriter<T, S> {
    fn put(&mut self, item: &T) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("object writer is closed"));
        }
        let start = self.buffer.len();
        self.serializer.serialize(item, &mut self.buffer)?;
        self.offsets.push(start);

        if self.offsets.len() >= self.record_limit || self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        self.buffer = BufferWriter::new();
        Ok(())
    }
}

impl<T, S> Drop for StreamObjectWriter<T, S> {
    fn drop(&mut self) {
        if !self.closed && !self.offsets.is_empty() {
            log::warn!(
                "Object writer dropped with {} unflushed records",
                self.offsets.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytewiseComparator;
    use crate::io::{BufferReader, DataWriter};
    use crate::stream::{
        BasicKeyValueCursor, BasicKeyValueSink, BasicRecordSink, KeyValueCursor, RecordCursor,
    };
    use bytes::Bytes;
    use parking_lot::Mutex;

    type Item = (String, u32);

    struct PairCodec;

    impl KeyValueSerializer<Item> for PairCodec {
        fn serialize_key(&self, item: &Item, writer: &mut dyn DataWriter) -> Result<()> {
            writer.write_fully(item.0.as_bytes())
        }

        fn serialize_value(&self, item: &Item, writer: &mut dyn DataWriter) -> Result<()> {
            writer.write_fully(&item.1.to_le_bytes())
        }
    }

    #[derive(Clone, Default)]
    struct MemoryRuns {
        runs: Arc<Mutex<Vec<Bytes>>>,
    }

    impl MemoryRuns {
        fn decode(&self) -> Vec<Vec<(Vec<u8>, Vec<u8>)>> {
            self.runs
                .lock()
                .iter()
                .map(|run| {
                    let mut cursor = BasicKeyValueCursor::new(BufferReader::new(run.clone()));
                    let mut pairs = Vec::new();
                    while cursor.advance().unwrap() {
                        pairs.push((cursor.key().to_vec(), cursor.value().to_vec()));
                    }
                    pairs
                })
                .collect()
        }
    }

    struct MemorySink {
        inner: Option<BasicKeyValueSink<BufferWriter>>,
        runs: Arc<Mutex<Vec<Bytes>>>,
    }

    impl KeyValueSink for MemorySink {
        fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
            self.inner.as_mut().unwrap().accept(key, value)
        }

        fn accept_value(&mut self, value: &[u8]) -> Result<bool> {
            self.inner.as_mut().unwrap().accept_value(value)
        }

        fn finish(&mut self) -> Result<()> {
            let mut inner = self.inner.take().unwrap();
            inner.finish()?;
            self.runs.lock().push(inner.into_inner().freeze());
            Ok(())
        }
    }

    impl KeyValueStream for MemoryRuns {
        type Sink = MemorySink;

        fn open_sink(
            &mut self,
            _records: u64,
            _key_bytes: u64,
            _value_bytes: u64,
        ) -> Result<MemorySink> {
            Ok(MemorySink {
                inner: Some(BasicKeyValueSink::new(BufferWriter::new())),
                runs: Arc::clone(&self.runs),
            })
        }
    }

    fn options(record_limit: usize, buffer_size: usize) -> Options {
        Options::new()
            .sort_record_limit(record_limit)
            .sort_buffer_size(buffer_size)
    }

    fn put_all(writer: &mut StreamGroupWriter<Item, MemoryRuns>, items: &[(&str, u32)]) {
        for (key, n) in items {
            writer.put(&(key.to_string(), *n)).unwrap();
        }
    }

    #[test]
    fn test_flush_sorts_and_coalesces() {
        let runs = MemoryRuns::default();
        let mut writer =
            StreamGroupWriter::new(runs.clone(), Arc::new(PairCodec), &options(1000, 1 << 20));

        put_all(&mut writer, &[("b", 2), ("a", 1), ("a", 3), ("c", 4)]);
        writer.close().unwrap();

        let decoded = runs.decode();
        assert_eq!(decoded.len(), 1);
        assert_eq!(
            decoded[0],
            vec![
                (b"a".to_vec(), 1u32.to_le_bytes().to_vec()),
                (b"a".to_vec(), 3u32.to_le_bytes().to_vec()),
                (b"b".to_vec(), 2u32.to_le_bytes().to_vec()),
                (b"c".to_vec(), 4u32.to_le_bytes().to_vec()),
            ]
        );

        // Equal keys were coalesced into one group on the wire.
        let raw = runs.runs.lock()[0].clone();
        assert_eq!(raw.iter().filter(|&&b| b == b'a').count(), 1);
    }

    #[test]
    fn test_record_limit_triggers_flush() {
        let runs = MemoryRuns::default();
        let mut writer =
            StreamGroupWriter::new(runs.clone(), Arc::new(PairCodec), &options(2, 1 << 20));

        put_all(&mut writer, &[("e", 1), ("d", 2), ("c", 3), ("b", 4), ("a", 5)]);
        assert_eq!(writer.buffered(), 1);
        writer.close().unwrap();

        let decoded = runs.decode();
        assert_eq!(decoded.len(), 3);
        // Each run is sorted on its own.
        assert_eq!(decoded[0][0].0, b"d".to_vec());
        assert_eq!(decoded[1][0].0, b"b".to_vec());
        assert_eq!(decoded[2][0].0, b"a".to_vec());
    }

    #[test]
    fn test_size_threshold_triggers_flush() {
        let runs = MemoryRuns::default();
        // 100 byte buffer with the default margin flushes at 75.
        let mut writer =
            StreamGroupWriter::new(runs.clone(), Arc::new(PairCodec), &options(1000, 100));

        let big = "k".repeat(60);
        writer.put(&(big, 1)).unwrap();
        assert_eq!(writer.buffered(), 1);
        writer.put(&("k".repeat(20), 2)).unwrap();
        // 64 + 24 bytes crossed the 75 byte threshold.
        assert_eq!(writer.buffered(), 0);
        assert_eq!(runs.decode().len(), 1);
        writer.close().unwrap();
        assert_eq!(runs.decode().len(), 1);
    }

    #[test]
    fn test_value_comparator_orders_within_key() {
        let runs = MemoryRuns::default();
        let mut writer = StreamGroupWriter::with_comparator(
            runs.clone(),
            Arc::new(PairCodec),
            Arc::new(BytewiseComparator),
            &options(1000, 1 << 20),
        );

        // Little-endian encodings of 2 and 1 still sort bytewise here.
        put_all(&mut writer, &[("k", 2), ("k", 1)]);
        writer.close().unwrap();

        let decoded = runs.decode();
        assert_eq!(decoded[0][0].1, 1u32.to_le_bytes().to_vec());
        assert_eq!(decoded[0][1].1, 2u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_close_without_records_emits_nothing() {
        let runs = MemoryRuns::default();
        let mut writer =
            StreamGroupWriter::new(runs.clone(), Arc::new(PairCodec), &options(10, 100));
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(runs.decode().is_empty());
    }

    #[test]
    fn test_put_after_close_fails() {
        let runs = MemoryRuns::default();
        let mut writer =
            StreamGroupWriter::new(runs.clone(), Arc::new(PairCodec), &options(10, 100));
        writer.close().unwrap();
        assert!(writer.put(&("x".to_string(), 1)).is_err());
    }

    #[derive(Clone, Default)]
    struct MemoryRecordRuns {
        runs: Arc<Mutex<Vec<Bytes>>>,
    }

    struct MemoryRecordSink {
        inner: Option<BasicRecordSink<BufferWriter>>,
        runs: Arc<Mutex<Vec<Bytes>>>,
    }

    impl RecordSink for MemoryRecordSink {
        fn accept(&mut self, record: &[u8]) -> Result<()> {
            self.inner.as_mut().unwrap().accept(record)
        }

        fn finish(&mut self) -> Result<()> {
            let mut inner = self.inner.take().unwrap();
            inner.finish()?;
            self.runs.lock().push(inner.into_inner().freeze());
            Ok(())
        }
    }

    impl RecordStream for MemoryRecordRuns {
        type Sink = MemoryRecordSink;

        fn open_sink(&mut self, _records: u64, _bytes: u64) -> Result<MemoryRecordSink> {
            Ok(MemoryRecordSink {
                inner: Some(BasicRecordSink::new(BufferWriter::new())),
                runs: Arc::clone(&self.runs),
            })
        }
    }

    struct StringCodec;

    impl Serializer<String> for StringCodec {
        fn serialize(&self, item: &String, writer: &mut dyn DataWriter) -> Result<()> {
            writer.write_fully(item.as_bytes())
        }
    }

    #[test]
    fn test_object_writer_keeps_input_order() {
        let runs = MemoryRecordRuns::default();
        let mut writer =
            StreamObjectWriter::new(runs.clone(), Arc::new(StringCodec), &options(1000, 1 << 20));

        for item in ["c", "a", "b"] {
            writer.put(&item.to_string()).unwrap();
        }
        writer.close().unwrap();

        let raw = runs.runs.lock()[0].clone();
        let mut cursor = crate::stream::record_cursor(BufferReader::new(raw));
        let mut records = Vec::new();
        while cursor.advance().unwrap() {
            records.push(cursor.record().to_vec());
        }
        assert_eq!(records, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_object_writer_record_limit() {
        let runs = MemoryRecordRuns::default();
        let mut writer =
            StreamObjectWriter::new(runs.clone(), Arc::new(StringCodec), &options(2, 1 << 20));

        for item in ["1", "2", "3", "4", "5"] {
            writer.put(&item.to_string()).unwrap();
        }
        assert_eq!(writer.buffered(), 1);
        writer.close().unwrap();
        assert_eq!(runs.runs.lock().len(), 3);
    }
}
