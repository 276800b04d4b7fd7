//! Soft-limited buffer pool with spill-on-pressure eviction.
//!
//! The pool accounts every in-memory buffer against a byte capacity.
//! Capacity is claimed up front through a [`Ticket`] and attached to a
//! buffer on registration. When a reservation pushes the total over the
//! limit, the pool evicts registered buffers to its [`BufferStore`] in
//! eviction order until it is back under the limit or nothing evictable
//! remains. The limit is soft: a reservation never fails for lack of
//! space, only on spill I/O errors.
//!
//! Eviction order is priority first (lower evicts first), then size
//! within equal priority, then insertion order. An entry with open
//! readers is not spilled in place; it is marked and spilled by the last
//! reader to close.

use crate::config::EvictionOrder;
use crate::error::{Error, Result};
use crate::io::{BufferProvider, BufferReader, DataReader, DynReader};
use crate::store::{BufferStore, StoredBuffer};
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Position of an entry in the eviction queue.
///
/// Field order gives the derived `Ord` the eviction ranking: priority,
/// then size rank, then insertion sequence. The size rank is inverted for
/// larger-first pools so the queue always pops its front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EvictionKey {
    priority: i32,
    size_rank: u64,
    sequence: u64,
}

enum EntryState {
    Resident { buffer: Bytes, readers: u32 },
    PendingEvict { buffer: Bytes, readers: u32 },
    Stored(StoredBuffer),
    Closed,
}

struct PoolEntry {
    key: EvictionKey,
    size: u64,
    state: Mutex<EntryState>,
}

struct PoolInner {
    store: BufferStore,
    capacity: u64,
    order: EvictionOrder,
    used: AtomicU64,
    sequence: AtomicU64,
    queue: SkipMap<EvictionKey, Arc<PoolEntry>>,
}

impl PoolInner {
    fn release(&self, amount: u64) {
        self.used.fetch_sub(amount, Ordering::Relaxed);
    }

    fn size_rank(&self, size: u64) -> u64 {
        match self.order {
            EvictionOrder::LargerFirst => u64::MAX - size,
            EvictionOrder::SmallerFirst => size,
        }
    }

    /// Evicts entries from the front of the queue until usage is back
    /// under capacity or the queue is empty.
    fn escape(&self) -> Result<()> {
        while self.used.load(Ordering::Relaxed) > self.capacity {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            let entry = Arc::clone(item.value());
            if let Err(e) = self.evict(&entry) {
                // The entry is still resident; put it back in line.
                self.queue.insert(entry.key, entry);
                return Err(e);
            }
        }
        Ok(())
    }

    fn evict(&self, entry: &Arc<PoolEntry>) -> Result<()> {
        let mut state = entry.state.lock();
        let spilled = match &mut *state {
            EntryState::Resident { buffer, readers } => {
                if *readers > 0 {
                    // Spill happens when the last reader closes.
                    let buffer = buffer.clone();
                    let readers = *readers;
                    *state = EntryState::PendingEvict { buffer, readers };
                    false
                } else {
                    let stored = self.store.store(&buffer[..])?;
                    *state = EntryState::Stored(stored);
                    true
                }
            }
            EntryState::PendingEvict { .. } | EntryState::Stored(_) | EntryState::Closed => false,
        };
        drop(state);
        if spilled {
            self.release(entry.size);
            log::debug!("Evicted {} byte buffer to the spill store", entry.size);
        }
        Ok(())
    }
}

/// Byte-capacity pool that spills registered buffers to disk under
/// pressure.
///
/// Cloning is cheap; clones share capacity, accounting, and the eviction
/// queue.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool spilling into `store`, evicting larger buffers
    /// first.
    pub fn new(store: BufferStore, capacity: u64) -> Self {
        Self::with_order(store, capacity, EvictionOrder::default())
    }

    /// Creates a pool with an explicit eviction order.
    pub fn with_order(store: BufferStore, capacity: u64, order: EvictionOrder) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                capacity,
                order,
                used: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                queue: SkipMap::new(),
            }),
        }
    }

    /// Bytes currently reserved, equal to the sum of live ticket and
    /// resident entry sizes.
    pub fn size(&self) -> u64 {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Configured soft capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// Registered entries still waiting in the eviction queue.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Claims `size` bytes of capacity, evicting registered buffers if
    /// the claim pushes the pool over its limit.
    ///
    /// Fails only when spilling a victim fails; the claim is refunded in
    /// that case.
    pub fn reserve(&self, size: u64) -> Result<Ticket> {
        self.inner.used.fetch_add(size, Ordering::Relaxed);
        if let Err(e) = self.inner.escape() {
            self.inner.release(size);
            return Err(e);
        }
        Ok(Ticket { pool: Arc::clone(&self.inner), size })
    }

    /// Registers `buffer` under a previously reserved ticket at priority
    /// zero.
    pub fn register(&self, ticket: Ticket, buffer: Bytes) -> Result<PoolHandle> {
        self.register_prioritized(ticket, buffer, 0)
    }

    /// Registers `buffer` with an eviction priority; lower priorities are
    /// evicted first.
    ///
    /// The ticket is shrunk to the buffer's size, refunding any excess
    /// claim, and its remainder transfers to the entry. The buffer stays
    /// readable through the returned handle whether resident or spilled.
    pub fn register_prioritized(
        &self,
        mut ticket: Ticket,
        buffer: Bytes,
        priority: i32,
    ) -> Result<PoolHandle> {
        let size = buffer.len() as u64;
        if ticket.size() < size {
            return Err(Error::invalid_argument(
                "ticket is smaller than the buffer it backs",
            ));
        }
        ticket.shrink(size)?;
        ticket.into_claim();

        let key = EvictionKey {
            priority,
            size_rank: self.inner.size_rank(size),
            sequence: self.inner.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let entry = Arc::new(PoolEntry {
            key,
            size,
            state: Mutex::new(EntryState::Resident { buffer, readers: 0 }),
        });
        self.inner.queue.insert(key, Arc::clone(&entry));
        Ok(PoolHandle { pool: Arc::clone(&self.inner), entry })
    }
}

/// An accounted claim on pool capacity.
///
/// A ticket may only shrink. Dropping it releases whatever claim it still
/// holds.
pub struct Ticket {
    pool: Arc<PoolInner>,
    size: u64,
}

impl Ticket {
    /// Bytes this ticket currently claims.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reduces the claim to `new_size`, refunding the difference.
    pub fn shrink(&mut self, new_size: u64) -> Result<()> {
        if new_size > self.size {
            return Err(Error::invalid_argument("ticket claims may only shrink"));
        }
        let refund = self.size - new_size;
        self.size = new_size;
        if refund > 0 {
            self.pool.release(refund);
        }
        Ok(())
    }

    /// Moves the claim into a new ticket, leaving this one empty.
    ///
    /// Nothing is released; the claim changes hands without touching the
    /// pool accounting.
    pub fn take(&mut self) -> Ticket {
        Ticket {
            pool: Arc::clone(&self.pool),
            size: std::mem::replace(&mut self.size, 0),
        }
    }

    /// Takes the claim out of the ticket without releasing it.
    fn into_claim(mut self) -> u64 {
        std::mem::replace(&mut self.size, 0)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.size > 0 {
            self.pool.release(self.size);
        }
    }
}

/// Handle to one registered buffer.
///
/// Opens readers against the buffer wherever it currently lives. Dropping
/// the handle closes the entry and releases its claim.
pub struct PoolHandle {
    pool: Arc<PoolInner>,
    entry: Arc<PoolEntry>,
}

impl PoolHandle {
    /// Size of the registered buffer in bytes.
    pub fn size(&self) -> u64 {
        self.entry.size
    }

    /// Whether the buffer is still held in memory.
    pub fn is_resident(&self) -> bool {
        matches!(
            *self.entry.state.lock(),
            EntryState::Resident { .. } | EntryState::PendingEvict { .. }
        )
    }
}

impl BufferProvider for PoolHandle {
    fn open(&self) -> Result<DynReader> {
        let mut state = self.entry.state.lock();
        match &mut *state {
            EntryState::Resident { buffer, readers }
            | EntryState::PendingEvict { buffer, readers } => {
                *readers += 1;
                Ok(Box::new(PooledReader {
                    reader: BufferReader::new(buffer.clone()),
                    _guard: ReaderGuard {
                        pool: Arc::clone(&self.pool),
                        entry: Arc::clone(&self.entry),
                    },
                }))
            }
            EntryState::Stored(stored) => stored.open(),
            EntryState::Closed => Err(Error::invalid_state("pool entry is closed")),
        }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.pool.queue.remove(&self.entry.key);
        let was_accounted = {
            let mut state = self.entry.state.lock();
            let accounted = matches!(
                *state,
                EntryState::Resident { .. } | EntryState::PendingEvict { .. }
            );
            *state = EntryState::Closed;
            accounted
        };
        if was_accounted {
            self.pool.release(self.entry.size);
        }
    }
}

/// Keeps the entry's reader count while a resident read is open.
struct ReaderGuard {
    pool: Arc<PoolInner>,
    entry: Arc<PoolEntry>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut release = false;
        let mut requeue = false;
        {
            let mut state = self.entry.state.lock();
            match &mut *state {
                EntryState::Resident { readers, .. } => {
                    *readers -= 1;
                }
                EntryState::PendingEvict { buffer, readers } => {
                    *readers -= 1;
                    if *readers == 0 {
                        match self.pool.store.store(&buffer[..]) {
                            Ok(stored) => {
                                *state = EntryState::Stored(stored);
                                release = true;
                            }
                            Err(e) => {
                                log::warn!(
                                    "Deferred spill failed, keeping buffer resident: {}",
                                    e
                                );
                                let buffer = buffer.clone();
                                *state = EntryState::Resident { buffer, readers: 0 };
                                requeue = true;
                            }
                        }
                    }
                }
                EntryState::Stored(_) | EntryState::Closed => {}
            }
        }
        if release {
            self.pool.release(self.entry.size);
        }
        if requeue {
            self.pool.queue.insert(self.entry.key, Arc::clone(&self.entry));
        }
    }
}

/// Reader over a resident buffer, holding its reader guard.
struct PooledReader {
    reader: BufferReader,
    _guard: ReaderGuard,
}

impl DataReader for PooledReader {
    fn read_i32(&mut self) -> Result<i32> {
        self.reader.read_i32()
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_fully(buf)
    }

    fn is_direct(&self) -> bool {
        self.reader.is_direct()
    }

    fn slice(&mut self, len: usize) -> Result<Bytes> {
        self.reader.slice(len)
    }
}
