//! K-way merge over sorted key-value cursors.
//!
//! Each source contributes at most one entry to a binary heap; popping the
//! smallest entry and refilling from its source yields a single cursor in
//! global key order. Ties on key fall back to an optional value comparator
//! and then to source index, so the merge is stable with respect to source
//! order.

use crate::codec::DataComparator;
use crate::error::{Error, Result};
use crate::stream::KeyValueCursor;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

struct MergeEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
    comparator: Option<Arc<dyn DataComparator>>,
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the smallest entry first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| match &self.comparator {
                Some(cmp) => cmp.compare(&other.value, &self.value),
                None => Ordering::Equal,
            })
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

/// Merges multiple sorted key-value cursors into one.
///
/// Sources must each be sorted by key bytes (and by the value comparator
/// within equal keys, when one is supplied); the merged cursor is then
/// sorted the same way. A source that fails mid-stream fails the merge.
pub struct KeyValueMerger {
    cursors: Vec<Option<Box<dyn KeyValueCursor + Send>>>,
    heap: BinaryHeap<MergeEntry>,
    current: Option<MergeEntry>,
    comparator: Option<Arc<dyn DataComparator>>,
}

impl KeyValueMerger {
    /// Creates a merger over `cursors`, priming one entry per source.
    pub fn new(
        cursors: Vec<Box<dyn KeyValueCursor + Send>>,
        comparator: Option<Arc<dyn DataComparator>>,
    ) -> Result<Self> {
        if cursors.is_empty() {
            return Err(Error::invalid_argument("merge requires at least one source"));
        }
        let mut merger = Self {
            heap: BinaryHeap::with_capacity(cursors.len()),
            cursors: cursors.into_iter().map(Some).collect(),
            current: None,
            comparator,
        };
        for source in 0..merger.cursors.len() {
            merger.pull(source)?;
        }
        Ok(merger)
    }

    /// Refills the heap from `source`, dropping the cursor on exhaustion.
    fn pull(&mut self, source: usize) -> Result<()> {
        let Some(cursor) = self.cursors[source].as_mut() else {
            return Ok(());
        };
        if cursor.advance()? {
            let entry = MergeEntry {
                key: cursor.key().to_vec(),
                value: cursor.value().to_vec(),
                source,
                comparator: self.comparator.clone(),
            };
            self.heap.push(entry);
        } else {
            self.cursors[source] = None;
        }
        Ok(())
    }
}

impl KeyValueCursor for KeyValueMerger {
    fn advance(&mut self) -> Result<bool> {
        match self.heap.pop() {
            Some(entry) => {
                let source = entry.source;
                self.current = Some(entry);
                self.pull(source)?;
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |entry| entry.key.as_slice())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |entry| entry.value.as_slice())
    }
}
