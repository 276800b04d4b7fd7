//! # Spillway - A Bounded-Memory External Sort and Merge Engine
//!
//! Spillway is an external sorting engine in the style of the shuffle and
//! spill machinery found in distributed dataflow runtimes. Serialized
//! records accumulate in memory under a byte budget; full buffers are
//! sorted and handed to a buffer pool that transparently spills the
//! coldest buffers to disk, and the resulting runs are merged back into a
//! single ordered stream of key groups.
//!
//! ## Architecture
//!
//! The engine consists of several key components:
//!
//! - **BufferPool**: Byte-budgeted cache that spills overflow to disk
//! - **BufferStore**: Process-private scratch tree holding spilled buffers
//! - **Streams**: Length-prefixed record and key-value group wire formats
//! - **KeyValueMerger**: K-way heap merge preserving source order on ties
//! - **KeyValuePartitioner**: Deterministic key-hash fan-out across sinks
//! - **Sorter**: Accumulate-sort-flush writers and run-set readers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use spillway::codec::BincodeCodec;
//! use spillway::sorter::{ObjectReader, ObjectWriter, StreamObjectReader};
//! use spillway::{Engine, Options};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), spillway::Error> {
//! // Open an engine with a bounded in-memory budget
//! let options = Options::default().pool_capacity(64 * 1024 * 1024);
//! let engine = Engine::open(options)?;
//!
//! // Write records; full buffers spill to disk automatically
//! let codec: Arc<BincodeCodec<u64>> = Arc::new(BincodeCodec::new());
//! let mut writer = engine.object_writer::<u64>(codec.clone());
//! for record in [3u64, 1, 2] {
//!     writer.put(&record)?;
//! }
//! writer.close()?;
//!
//! // Read every run back, resident or spilled
//! let runs = writer.stream().take_runs();
//! let mut reader = StreamObjectReader::<u64, _>::new(runs.into_source(), codec);
//! while let Some(record) = reader.next()? {
//!     println!("{record}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod pool;
pub mod shared;
pub mod sorter;
pub mod store;
pub mod stream;

// Re-exports
pub use config::{EvictionOrder, Options};
pub use error::{Error, Result};

use codec::{DataComparator, KeyValueSerializer, Serializer};
use pool::BufferPool;
use sorter::{RecordRunStream, RunStream, StreamGroupWriter, StreamObjectWriter};
use std::sync::Arc;
use store::{BlobStore, BufferStore, ChannelDecorator};

/// The main engine handle.
///
/// Bundles a validated [`Options`] with the [`BufferPool`] and
/// [`BufferStore`] every sorter component shares, and hands out writers
/// and run streams wired to them.
///
/// # Thread Safety
///
/// `Engine` is cheap to clone and safe to share across threads; clones
/// refer to the same pool and store. It spawns no threads of its own, and
/// spilling happens on whichever caller thread overflows the pool.
#[derive(Clone)]
pub struct Engine {
    /// Configuration options
    options: Options,

    /// Shared byte-budgeted buffer cache
    pool: BufferPool,

    /// Scratch tree backing spilled buffers
    store: BufferStore,
}

impl Engine {
    /// Opens an engine with the given options.
    ///
    /// Creates a process-private scratch directory under
    /// `options.spill_dir` and a buffer pool bounded by
    /// `options.pool_capacity`. The scratch tree is removed when the last
    /// clone of the engine (and every buffer spilled into it) is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the options fail validation or the scratch
    /// directory cannot be created.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use spillway::{Engine, Options};
    ///
    /// # fn main() -> Result<(), spillway::Error> {
    /// let options = Options::default().spill_dir("./scratch");
    /// let engine = Engine::open(options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(options: Options) -> Result<Self> {
        Self::with_decorator(options, None)
    }

    /// Opens an engine whose spill channels are wrapped by `decorator`,
    /// for compression or encryption of on-disk runs.
    pub fn with_decorator(
        options: Options,
        decorator: Option<Box<dyn ChannelDecorator>>,
    ) -> Result<Self> {
        options.validate()?;

        let store =
            BufferStore::with_decorator(&options.spill_dir, options.store_division, decorator)?;
        let pool =
            BufferPool::with_order(store.clone(), options.pool_capacity, options.eviction_order);

        log::info!(
            "Engine opened: pool capacity {} bytes, spill root {:?}",
            options.pool_capacity,
            store.path()
        );

        Ok(Self { options, pool, store })
    }

    /// The options this engine was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The shared buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The shared buffer store.
    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    /// A handle for writing large payloads straight to the store,
    /// bypassing the pool.
    pub fn blob_store(&self) -> BlobStore {
        self.store.blob_store()
    }

    /// A new pool-backed stream of grouped key-value runs.
    pub fn run_stream(&self) -> RunStream {
        RunStream::new(self.pool.clone())
    }

    /// A new pool-backed key-value run stream whose buffers spill at
    /// `priority` (lower spills first).
    pub fn run_stream_with_priority(&self, priority: i32) -> RunStream {
        RunStream::with_priority(self.pool.clone(), priority)
    }

    /// A new pool-backed stream of plain record runs.
    pub fn record_run_stream(&self) -> RecordRunStream {
        RecordRunStream::new(self.pool.clone())
    }

    /// A new pool-backed record run stream whose buffers spill at
    /// `priority` (lower spills first).
    pub fn record_run_stream_with_priority(&self, priority: i32) -> RecordRunStream {
        RecordRunStream::with_priority(self.pool.clone(), priority)
    }

    /// A sorting writer producing grouped key-value runs in this engine's
    /// pool, keyed and valued by `serializer`.
    pub fn group_writer<T>(
        &self,
        serializer: Arc<dyn KeyValueSerializer<T>>,
    ) -> StreamGroupWriter<T, RunStream> {
        StreamGroupWriter::new(self.run_stream(), serializer, &self.options)
    }

    /// A sorting writer that additionally orders values within equal keys
    /// by `comparator`.
    pub fn group_writer_with_comparator<T>(
        &self,
        serializer: Arc<dyn KeyValueSerializer<T>>,
        comparator: Arc<dyn DataComparator>,
    ) -> StreamGroupWriter<T, RunStream> {
        StreamGroupWriter::with_comparator(self.run_stream(), serializer, comparator, &self.options)
    }

    /// A buffering writer producing plain record runs in this engine's
    /// pool, serialized by `serializer`.
    pub fn object_writer<T>(
        &self,
        serializer: Arc<dyn Serializer<T>>,
    ) -> StreamObjectWriter<T, RecordRunStream> {
        StreamObjectWriter::new(self.record_run_stream(), serializer, &self.options)
    }
}
