//! Key-hash fan-out across multiple key-value sinks.

use crate::error::{Error, Result};
use crate::stream::KeyValueSink;

/// Routes each group to one of several sinks by key hash.
///
/// Every value of a group follows its key to the same sink, so each
/// partition is itself a well-formed grouped stream. With a single sink
/// the partitioner degenerates to a passthrough and skips hashing.
pub struct KeyValuePartitioner<S> {
    sinks: Vec<S>,
    current: Option<usize>,
}

impl<S: KeyValueSink> KeyValuePartitioner<S> {
    /// Creates a partitioner over `sinks`.
    pub fn new(sinks: Vec<S>) -> Result<Self> {
        if sinks.is_empty() {
            return Err(Error::invalid_argument("partitioner requires at least one sink"));
        }
        Ok(Self { sinks, current: None })
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Always false; construction rejects empty sink sets.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Recovers the partition sinks in index order.
    pub fn into_inner(self) -> Vec<S> {
        self.sinks
    }

    fn route(&self, key: &[u8]) -> usize {
        if self.sinks.len() == 1 {
            return 0;
        }
        // Mask to the non-negative range before the modulus.
        (crc32fast::hash(key) & 0x7fff_ffff) as usize % self.sinks.len()
    }
}

impl<S: KeyValueSink> KeyValueSink for KeyValuePartitioner<S> {
    fn accept(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let index = self.route(key);
        self.current = Some(index);
        self.sinks[index].accept(key, value)
    }

    fn accept_value(&mut self, value: &[u8]) -> Result<bool> {
        match self.current {
            Some(index) => self.sinks[index].accept_value(value),
            None => Ok(false),
        }
    }

    fn finish(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferReader, BufferWriter};
    use crate::stream::{BasicKeyValueCursor, BasicKeyValueSink, KeyValueCursor};

    fn sinks(n: usize) -> Vec<BasicKeyValueSink<BufferWriter>> {
        (0..n).map(|_| BasicKeyValueSink::new(BufferWriter::new())).collect()
    }

    fn read_back(sink: BasicKeyValueSink<BufferWriter>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut cursor = BasicKeyValueCursor::new(BufferReader::new(sink.into_inner().freeze()));
        let mut pairs = Vec::new();
        while cursor.advance().unwrap() {
            pairs.push((cursor.key().to_vec(), cursor.value().to_vec()));
        }
        pairs
    }

    #[test]
    fn test_single_sink_passthrough() {
        let mut partitioner = KeyValuePartitioner::new(sinks(1)).unwrap();
        partitioner.accept(b"a", &[1]).unwrap();
        assert!(partitioner.accept_value(&[2]).unwrap());
        partitioner.accept(b"b", &[3]).unwrap();
        partitioner.finish().unwrap();

        let mut parts = partitioner.into_inner();
        let pairs = read_back(parts.remove(0));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let keys: Vec<Vec<u8>> = (0..64).map(|i| format!("key-{}", i).into_bytes()).collect();

        let mut first = KeyValuePartitioner::new(sinks(4)).unwrap();
        let mut second = KeyValuePartitioner::new(sinks(4)).unwrap();
        for key in &keys {
            first.accept(key, b"v").unwrap();
            second.accept(key, b"v").unwrap();
        }
        first.finish().unwrap();
        second.finish().unwrap();

        let first_parts: Vec<_> = first.into_inner().into_iter().map(read_back).collect();
        let second_parts: Vec<_> = second.into_inner().into_iter().map(read_back).collect();
        assert_eq!(first_parts, second_parts);

        let total: usize = first_parts.iter().map(Vec::len).sum();
        assert_eq!(total, keys.len());
    }

    #[test]
    fn test_expected_partition_index() {
        let mut partitioner = KeyValuePartitioner::new(sinks(3)).unwrap();
        partitioner.accept(b"alpha", &[1]).unwrap();
        partitioner.finish().unwrap();

        let expected = (crc32fast::hash(b"alpha") & 0x7fff_ffff) as usize % 3;
        let parts: Vec<_> = partitioner.into_inner().into_iter().map(read_back).collect();
        for (index, pairs) in parts.iter().enumerate() {
            if index == expected {
                assert_eq!(pairs.as_slice(), &[(b"alpha".to_vec(), vec![1])]);
            } else {
                assert!(pairs.is_empty());
            }
        }
    }

    #[test]
    fn test_continuation_follows_group_key() {
        let mut partitioner = KeyValuePartitioner::new(sinks(4)).unwrap();
        partitioner.accept(b"grouped", &[1]).unwrap();
        assert!(partitioner.accept_value(&[2]).unwrap());
        assert!(partitioner.accept_value(&[3]).unwrap());
        partitioner.finish().unwrap();

        let parts: Vec<_> = partitioner.into_inner().into_iter().map(read_back).collect();
        let non_empty: Vec<_> = parts.iter().filter(|p| !p.is_empty()).collect();
        assert_eq!(non_empty.len(), 1);
        assert_eq!(non_empty[0].len(), 3);
        assert!(non_empty[0].iter().all(|(k, _)| k == b"grouped"));
    }

    #[test]
    fn test_value_without_group_is_rejected() {
        let mut partitioner = KeyValuePartitioner::new(sinks(2)).unwrap();
        assert!(!partitioner.accept_value(&[1]).unwrap());
    }

    #[test]
    fn test_empty_sink_set_rejected() {
        let empty: Vec<BasicKeyValueSink<BufferWriter>> = Vec::new();
        assert!(KeyValuePartitioner::new(empty).is_err());
    }
}
