//! Bounded-memory sorting writers and object-level stream adapters.
//!
//! [`StreamGroupWriter`] is the boundary between arbitrary domain objects
//! and the engine's sorted, grouped binary format: it accumulates
//! serialized records in memory, sorts and streams them out as a run when
//! a count or size threshold trips, and leaves merging the runs to
//! [`KeyValueMerger`]. [`StreamObjectWriter`] is its unsorted plain-record
//! sibling, and [`StreamObjectReader`] drives the opposite direction.
//! [`RunStream`] parks finished runs in a [`BufferPool`] so sorting spills
//! under memory pressure instead of growing without bound.
//!
//! [`KeyValueMerger`]: crate::stream::KeyValueMerger
//! [`BufferPool`]: crate::pool::BufferPool

mod reader;
mod run;
mod writer;

pub use reader::StreamObjectReader;
pub use run::{RecordRunSet, RecordRunSink, RecordRunStream, RunSet, RunSink, RunStream};
pub use writer::{StreamGroupWriter, StreamObjectWriter};

use crate::error::Result;

/// Object-level write contract the execution runtime drives.
pub trait ObjectWriter<T> {
    /// Accepts one object.
    fn put(&mut self, item: &T) -> Result<()>;

    /// Flushes buffered state and seals the writer.
    fn close(&mut self) -> Result<()>;
}

/// Object-level read contract the execution runtime drives.
pub trait ObjectReader<T> {
    /// Produces the next object, or `None` at end of input.
    fn next(&mut self) -> Result<Option<T>>;
}
