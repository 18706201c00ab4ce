//! # Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine: an ordered
//! map from `u64` keys to byte-string values, backed by a lock-free
//! skiplist.
//!
//! ## Design Invariants
//!
//! - Each key appears at most once; an insert overwrites in place, so the
//!   value held for a key is always the most recent write.
//! - Iteration order is ascending key order at every level of the API
//!   (`scan`, `iter`).
//! - The byte accounting tracks `Σ (12 + value_len)` over all entries —
//!   the exact footprint the entries will occupy in the sparse index and
//!   data blob of the SST they flush into (12 bytes = one key + offset
//!   index cell).
//!
//! ## Flush Semantics
//!
//! The memtable itself never touches disk. The engine drains it through
//! [`Memtable::iter`] into an SST builder and then calls
//! [`Memtable::clear`]; see the engine's flush path.
//!
//! ## Concurrency
//!
//! Single mutator, multiple readers. The skiplist tolerates concurrent
//! readers without locking; the byte counter uses relaxed atomics since
//! only one thread mutates.

#[cfg(test)]
mod tests;

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::sstable::INDEX_ENTRY_BYTES;

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Ordered in-memory buffer for recent writes.
///
/// Keys are `u64`, values are arbitrary byte strings (including the
/// tombstone sentinel — the memtable does not interpret values).
pub struct Memtable {
    /// Skiplist holding the live entries in key order.
    map: SkipMap<u64, Vec<u8>>,

    /// Running `Σ (12 + value_len)`, maintained incrementally.
    bytes: AtomicUsize,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// Creates an empty memtable.
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            bytes: AtomicUsize::new(0),
        }
    }

    /// Inserts or overwrites a key.
    pub fn insert(&self, key: u64, value: Vec<u8>) {
        let new_len = value.len();
        let old_len = self.map.get(&key).map(|e| e.value().len());
        self.map.insert(key, value);

        match old_len {
            // Overwrite: only the value delta changes the footprint.
            Some(old) => {
                if new_len >= old {
                    self.bytes.fetch_add(new_len - old, Ordering::Relaxed);
                } else {
                    self.bytes.fetch_sub(old - new_len, Ordering::Relaxed);
                }
            }
            None => {
                self.bytes
                    .fetch_add(INDEX_ENTRY_BYTES + new_len, Ordering::Relaxed);
            }
        }
    }

    /// Point lookup. Returns a clone of the stored value.
    pub fn get(&self, key: u64) -> Option<Vec<u8>> {
        self.map.get(&key).map(|e| e.value().clone())
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove(&self, key: u64) -> Option<Vec<u8>> {
        let removed = self.map.remove(&key).map(|e| e.value().clone());
        if let Some(ref v) = removed {
            self.bytes
                .fetch_sub(INDEX_ENTRY_BYTES + v.len(), Ordering::Relaxed);
        }
        removed
    }

    /// Inclusive range scan, yielding `(key, value)` pairs in ascending
    /// key order.
    pub fn scan(&self, range: RangeInclusive<u64>) -> Vec<(u64, Vec<u8>)> {
        self.map
            .range(range)
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// All entries in ascending key order. Used by the flush path.
    pub fn iter(&self) -> impl Iterator<Item = (u64, Vec<u8>)> + '_ {
        self.map.iter().map(|e| (*e.key(), e.value().clone()))
    }

    /// Empties the table and resets the byte accounting.
    pub fn clear(&self) {
        while self.map.pop_front().is_some() {}
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// Current `Σ (12 + value_len)` footprint.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Footprint after a hypothetical insert of `value_len` bytes under
    /// `key`. Drives the engine's flush predicate without mutating.
    pub fn projected_bytes(&self, key: u64, value_len: usize) -> usize {
        match self.map.get(&key).map(|e| e.value().len()) {
            Some(old) => self.bytes() - old + value_len,
            None => self.bytes() + INDEX_ENTRY_BYTES + value_len,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
