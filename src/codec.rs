//! Serialization seams between domain objects and engine byte streams.
//!
//! The engine never interprets the bytes it stores. Collaborators supply a
//! serializer/deserializer pair (or the key-value variants) to map their
//! objects into byte ranges, and a [`DataComparator`] when values sharing a
//! key need a deterministic order.

use crate::error::Result;
use crate::io::DataWriter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Turns one domain object into a byte range.
pub trait Serializer<T>: Send + Sync {
    /// Writes the serialized form of `item` to `writer`.
    fn serialize(&self, item: &T, writer: &mut dyn DataWriter) -> Result<()>;
}

/// Reconstructs one domain object from a byte range.
pub trait Deserializer<T>: Send + Sync {
    /// Decodes one object from `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Splits one domain object into separate key and value byte ranges.
pub trait KeyValueSerializer<T>: Send + Sync {
    /// Writes the serialized key of `item` to `writer`.
    fn serialize_key(&self, item: &T, writer: &mut dyn DataWriter) -> Result<()>;

    /// Writes the serialized value of `item` to `writer`.
    fn serialize_value(&self, item: &T, writer: &mut dyn DataWriter) -> Result<()>;
}

/// Reconstructs one domain object from its key and value byte ranges.
pub trait KeyValueDeserializer<T>: Send + Sync {
    /// Decodes one object from a `(key, value)` pair.
    fn deserialize_pair(&self, key: &[u8], value: &[u8]) -> Result<T>;
}

/// Compares two serialized byte ranges.
///
/// Used only to order values sharing a key; keys always sort by raw byte
/// order.
pub trait DataComparator: Send + Sync {
    /// Compares serialized ranges `a` and `b`.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain byte-order comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl DataComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Serializer/deserializer backed by bincode for any serde type.
///
/// # Example
///
/// ```rust
/// use spillway::codec::{BincodeCodec, Deserializer, Serializer};
/// use spillway::io::BufferWriter;
///
/// let codec = BincodeCodec::<u64>::new();
/// let mut writer = BufferWriter::new();
/// codec.serialize(&42u64, &mut writer).unwrap();
/// let bytes = writer.freeze();
/// assert_eq!(codec.deserialize(&bytes).unwrap(), 42u64);
/// ```
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Serializer<T> for BincodeCodec<T> {
    fn serialize(&self, item: &T, writer: &mut dyn DataWriter) -> Result<()> {
        let encoded = bincode::serialize(item)?;
        writer.write_fully(&encoded)
    }
}

impl<T: DeserializeOwned> Deserializer<T> for BincodeCodec<T> {
    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}
