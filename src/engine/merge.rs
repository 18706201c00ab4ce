//! Scan merge — a heap-based k-way merge over the memtable and every
//! overlapping table.
//!
//! Each contributing source gets one bounded cursor; the memtable source
//! carries timestamp `u64::MAX` so its entries outrank any table. A
//! min-heap keyed by `(key ↑, timestamp ↓)` pops the globally next
//! record; the first record popped for a key is its winner and later
//! copies of the same key are dropped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::sstable::{Table, TableError};

// ------------------------------------------------------------------------------------------------
// ScanSource — one bounded cursor
// ------------------------------------------------------------------------------------------------

enum SourceKind {
    /// Materialized memtable entries for the scanned range.
    Memtable(Vec<(u64, Vec<u8>)>),

    /// An on-disk table, addressed through its sparse index.
    Table(Arc<Table>),
}

/// A cursor over one ordered record source, restricted to `[pos, end)`.
pub struct ScanSource {
    kind: SourceKind,
    pos: usize,
    end: usize,
    time: u64,
}

impl ScanSource {
    /// Wraps the memtable's materialized range. The memtable is always
    /// the newest source, hence the infinite timestamp.
    pub fn from_memtable(entries: Vec<(u64, Vec<u8>)>) -> Self {
        let end = entries.len();
        Self {
            kind: SourceKind::Memtable(entries),
            pos: 0,
            end,
            time: u64::MAX,
        }
    }

    /// Wraps a table cursor over index positions `[start, end)`.
    pub fn from_table(table: Arc<Table>, start: usize, end: usize) -> Self {
        let time = table.time();
        Self {
            kind: SourceKind::Table(table),
            pos: start,
            end,
            time,
        }
    }

    fn exhausted(&self) -> bool {
        self.pos >= self.end
    }

    fn current_key(&self) -> u64 {
        match &self.kind {
            SourceKind::Memtable(entries) => entries[self.pos].0,
            SourceKind::Table(table) => table.key_at(self.pos),
        }
    }

    fn current_value(&self) -> Result<Vec<u8>, TableError> {
        match &self.kind {
            SourceKind::Memtable(entries) => Ok(entries[self.pos].1.clone()),
            SourceKind::Table(table) => Ok(table.value_at(self.pos)?.to_vec()),
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

// ------------------------------------------------------------------------------------------------
// Heap entry — (key ↑, timestamp ↓) priority
// ------------------------------------------------------------------------------------------------

struct HeapEntry {
    key: u64,
    time: u64,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.time == other.time && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// Ascending key; within a key, descending timestamp, so the newest
    /// copy pops first. Wrapped in [`Reverse`] to make the heap a
    /// min-heap over this order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.time.cmp(&self.time))
            .then_with(|| self.source.cmp(&other.source))
    }
}

// ------------------------------------------------------------------------------------------------
// ScanMerge
// ------------------------------------------------------------------------------------------------

/// Iterator producing `(key, value)` winners in ascending key order.
///
/// The caller filters tombstones; the merge only decides which copy of
/// each key is newest.
pub struct ScanMerge {
    sources: Vec<ScanSource>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    last_key: Option<u64>,
}

impl ScanMerge {
    /// Builds the merge, priming the heap with each source's first record.
    pub fn new(sources: Vec<ScanSource>) -> Result<Self, TableError> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (idx, source) in sources.iter().enumerate() {
            if !source.exhausted() {
                heap.push(Reverse(HeapEntry {
                    key: source.current_key(),
                    time: source.time,
                    source: idx,
                }));
            }
        }
        Ok(Self {
            sources,
            heap,
            last_key: None,
        })
    }

    /// Re-pushes `source` if it still has records.
    fn refill(&mut self, idx: usize) {
        let source = &self.sources[idx];
        if !source.exhausted() {
            self.heap.push(Reverse(HeapEntry {
                key: source.current_key(),
                time: source.time,
                source: idx,
            }));
        }
    }
}

impl Iterator for ScanMerge {
    type Item = Result<(u64, Vec<u8>), TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            let idx = entry.source;

            if self.last_key == Some(entry.key) {
                // An older copy of an already-emitted key.
                self.sources[idx].advance();
                self.refill(idx);
                continue;
            }

            self.last_key = Some(entry.key);
            let value = self.sources[idx].current_value();
            self.sources[idx].advance();
            self.refill(idx);

            return Some(value.map(|v| (entry.key, v)));
        }
        None
    }
}
