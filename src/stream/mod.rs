//! Binary record and key-value stream formats.
//!
//! Two stream shapes share one wire discipline of little-endian i32 length
//! prefixes with `-1` as the end sentinel:
//!
//! - **Record stream**: repeated `{ i32 length; bytes }`, terminated by
//!   `-1`.
//! - **Key-value stream**: a sequence of groups. A group opens with
//!   `{ i32 keyLen; key; i32 valLen; value }`; each following non-negative
//!   integer prefixes another value appended to the open group, and `-1`
//!   closes it. After a group closes the next integer is either a new key
//!   length or the `-1` end-of-stream marker, so a stream with groups ends
//!   `-1 -1` and an empty stream is a single `-1`.
//!
//! Cursors come in a buffered variant that copies records out of the reader
//! and a zero-copy variant serving views into a reader-exposed buffer. The
//! [`record_cursor`]/[`key_value_cursor`] factories check the reader's
//! capability once at construction and pick the implementation.

mod key_value;
mod merge;
mod partition;
mod record;

pub use key_value::{
    copy, BasicKeyValueCursor, BasicKeyValueSink, CopyStats, DirectKeyValueCursor,
};
pub use merge::KeyValueMerger;
pub use partition::KeyValuePartitioner;
pub use record::{BasicRecordCursor, BasicRecordSink, DirectRecordCursor};

use crate::error::Result;
use crate::io::DataReader;

/// Stream terminator and group-end marker.
pub const END_OF_STREAM: i32 = -1;

/// Forward-only iteration over a record stream.
///
/// The slice returned by [`RecordCursor::record`] is valid only until the
/// next call to [`RecordCursor::advance`]; callers retaining a record across
/// an advance must copy it.
pub trait RecordCursor {
    /// Moves to the next record, returning `false` at end of stream.
    fn advance(&mut self) -> Result<bool>;

    /// The current record.
    fn record(&self) -> &[u8];
}

/// Append-side of a record stream.
pub trait RecordSink {
    /// Appends one record.
    fn accept(&mut self, record: &[u8]) -> Result<()>;

    /// Terminates the stream.
    fn finish(&mut self) -> Result<()>;
}

/// Forward-only iteration over a grouped key-value stream.
///
/// [`KeyValueCursor::key`] and [`KeyValueCursor::value`] are valid only
/// until the next call to [`KeyValueCursor::advance`]. For continuation
/// pairs the cursor keeps serving the open group's key.
pub trait KeyValueCursor {
    /// Moves to the next pair, returning `false` at end of stream.
    fn advance(&mut self) -> Result<bool>;

    /// The current pair's key.
    fn key(&self) -> &[u8];

    /// The current pair's value.
    fn value(&self) -> &[u8];
}

/// Append-side of a grouped key-value stream.
pub trait KeyValueSink {
    /// Starts a new group with `key`, closing any open group first.
    fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Appends `value` to the open group.
    ///
    /// Returns `false` without writing when no group is open, letting a
    /// caller coalesce consecutive equal keys by trying the cheap
    /// single-value path first.
    fn accept_value(&mut self, value: &[u8]) -> Result<bool>;

    /// Closes the open group and terminates the stream.
    fn finish(&mut self) -> Result<()>;
}

/// Factory producing record sinks sized from upcoming totals.
pub trait RecordStream {
    /// The sink type this stream produces.
    type Sink: RecordSink;

    /// Opens a sink expecting about `records` records over `bytes` payload
    /// bytes.
    fn open_sink(&mut self, records: u64, bytes: u64) -> Result<Self::Sink>;
}

/// Factory producing key-value sinks sized from upcoming totals.
pub trait KeyValueStream {
    /// The sink type this stream produces.
    type Sink: KeyValueSink;

    /// Opens a sink expecting about `records` pairs over `key_bytes` key and
    /// `value_bytes` value payload bytes.
    fn open_sink(&mut self, records: u64, key_bytes: u64, value_bytes: u64) -> Result<Self::Sink>;
}

/// Opens a record cursor over `reader`, zero-copy when the reader exposes
/// its backing buffer.
pub fn record_cursor<R>(reader: R) -> Box<dyn RecordCursor + Send>
where
    R: DataReader + Send + 'static,
{
    if reader.is_direct() {
        Box::new(DirectRecordCursor::new(reader))
    } else {
        Box::new(BasicRecordCursor::new(reader))
    }
}

/// Opens a key-value cursor over `reader`, zero-copy when the reader
/// exposes its backing buffer.
pub fn key_value_cursor<R>(reader: R) -> Box<dyn KeyValueCursor + Send>
where
    R: DataReader + Send + 'static,
{
    if reader.is_direct() {
        Box::new(DirectKeyValueCursor::new(reader))
    } else {
        Box::new(BasicKeyValueCursor::new(reader))
    }
}

impl<C: RecordCursor + ?Sized> RecordCursor for Box<C> {
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn record(&self) -> &[u8] {
        (**self).record()
    }
}

impl<C: KeyValueCursor + ?Sized> KeyValueCursor for Box<C> {
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn accept(&mut self, record: &[u8]) -> Result<()> {
        (**self).accept(record)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<S: KeyValueSink + ?Sized> KeyValueSink for Box<S> {
    fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).accept(key, value)
    }

    fn accept_value(&mut self, value: &[u8]) -> Result<bool> {
        (**self).accept_value(value)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferReader, BufferWriter, DataWriter};
    use bytes::Bytes;
    use std::fs::File;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_factory_picks_direct_for_memory() {
        let mut writer = BufferWriter::new();
        writer.write_i32(3).unwrap();
        writer.write_fully(b"abc").unwrap();
        writer.write_i32(END_OF_STREAM).unwrap();

        let mut cursor = record_cursor(BufferReader::new(writer.freeze()));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.record(), b"abc");
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_factory_picks_buffered_for_files() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&3i32.to_le_bytes()).unwrap();
            file.write_all(b"abc").unwrap();
            file.write_all(&END_OF_STREAM.to_le_bytes()).unwrap();
        }

        let file = File::open(&path).unwrap();
        let mut cursor = record_cursor(crate::io::FileReader::new(Box::new(file)));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.record(), b"abc");
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_both_variants_decode_identically() {
        let mut writer = BufferWriter::new();
        writer.write_i32(2).unwrap();
        writer.write_fully(b"hi").unwrap();
        writer.write_i32(0).unwrap();
        writer.write_i32(END_OF_STREAM).unwrap();
        let bytes = writer.freeze();

        let mut direct = DirectRecordCursor::new(BufferReader::new(bytes.clone()));
        let mut basic = BasicRecordCursor::new(NonDirect(BufferReader::new(bytes)));

        for cursor in [&mut direct as &mut dyn RecordCursor, &mut basic] {
            assert!(cursor.advance().unwrap());
            assert_eq!(cursor.record(), b"hi");
            assert!(cursor.advance().unwrap());
            assert_eq!(cursor.record(), b"");
            assert!(!cursor.advance().unwrap());
        }
    }

    struct NonDirect(BufferReader);

    impl crate::io::DataReader for NonDirect {
        fn read_i32(&mut self) -> Result<i32> {
            self.0.read_i32()
        }

        fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
            self.0.read_fully(buf)
        }
    }

    #[test]
    fn test_empty_record_stream() {
        let mut cursor = record_cursor(BufferReader::new(Bytes::from_static(&[
            0xFF, 0xFF, 0xFF, 0xFF,
        ])));
        assert!(!cursor.advance().unwrap());
        // Past the end the cursor keeps reporting exhaustion.
        assert!(!cursor.advance().unwrap());
    }
}
