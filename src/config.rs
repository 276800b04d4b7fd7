//! Configuration options for the spillway engine.

use std::path::PathBuf;

/// Configuration options for opening an engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Soft limit on bytes the buffer pool may keep resident.
    /// Reservations past the limit trigger spilling, never refusal.
    /// Default: 256MB
    pub pool_capacity: u64,

    /// Base directory under which the store creates its private scratch tree.
    /// Default: the system temporary directory
    pub spill_dir: PathBuf,

    /// Number of spill files per store subdirectory.
    /// Files are bucketed into numbered subdirectories to bound fan-out.
    /// Default: 1000
    pub store_division: u64,

    /// Accumulation buffer size for the sort-and-spill writers (in bytes).
    /// Default: 4MB
    pub sort_buffer_size: usize,

    /// Maximum record count accumulated before a writer flushes.
    /// Default: 100,000
    pub sort_record_limit: usize,

    /// Fraction of the accumulation buffer left as headroom; a writer
    /// flushes once it has filled `sort_buffer_size * (1 - flush_margin)`.
    /// Default: 0.25
    pub flush_margin: f64,

    /// Tie-break among equal-priority entries when picking an eviction
    /// victim.
    /// Default: EvictionOrder::LargerFirst
    pub eviction_order: EvictionOrder,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_capacity: 256 * 1024 * 1024, // 256MB
            spill_dir: std::env::temp_dir(),
            store_division: 1000,
            sort_buffer_size: 4 * 1024 * 1024, // 4MB
            sort_record_limit: 100_000,
            flush_margin: 0.25,
            eviction_order: EvictionOrder::LargerFirst,
        }
    }
}

/// Eviction tie-break among equal-priority pool entries.
///
/// Evicting larger buffers first frees the most capacity per spill; evicting
/// smaller buffers first keeps large hot buffers resident longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOrder {
    /// Among equal priorities, spill the largest buffer first.
    LargerFirst,

    /// Among equal priorities, spill the smallest buffer first.
    SmallerFirst,
}

impl Default for EvictionOrder {
    fn default() -> Self {
        EvictionOrder::LargerFirst
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool soft byte limit.
    pub fn pool_capacity(mut self, bytes: u64) -> Self {
        self.pool_capacity = bytes;
        self
    }

    /// Sets the base directory for spill files.
    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    /// Sets the number of spill files per store subdirectory.
    pub fn store_division(mut self, division: u64) -> Self {
        self.store_division = division;
        self
    }

    /// Sets the accumulation buffer size for sort-and-spill writers.
    pub fn sort_buffer_size(mut self, size: usize) -> Self {
        self.sort_buffer_size = size;
        self
    }

    /// Sets the record-count flush threshold for sort-and-spill writers.
    pub fn sort_record_limit(mut self, limit: usize) -> Self {
        self.sort_record_limit = limit;
        self
    }

    /// Sets the flush headroom fraction.
    pub fn flush_margin(mut self, margin: f64) -> Self {
        self.flush_margin = margin;
        self
    }

    /// Sets the eviction tie-break order.
    pub fn eviction_order(mut self, order: EvictionOrder) -> Self {
        self.eviction_order = order;
        self
    }

    /// Byte count at which a sort-and-spill writer flushes its buffer.
    pub fn flush_threshold(&self) -> usize {
        (self.sort_buffer_size as f64 * (1.0 - self.flush_margin)) as usize
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.store_division == 0 {
            return Err(crate::Error::invalid_argument("store_division must be > 0"));
        }
        if self.sort_buffer_size == 0 {
            return Err(crate::Error::invalid_argument("sort_buffer_size must be > 0"));
        }
        if self.sort_record_limit == 0 {
            return Err(crate::Error::invalid_argument("sort_record_limit must be > 0"));
        }
        if self.flush_margin < 0.0 || self.flush_margin >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "flush_margin must be in [0, 1)",
            ));
        }
        Ok(())
    }
}
