//! Sorted String Table (SSTable) Module
//!
//! This module implements the **immutable**, **disk-backed** sorted table
//! that the LSM engine flushes memtables into and that compaction rewrites
//! between levels. Keys are `u64`, values are opaque byte strings.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER  — 32 bytes]   time · count · min_key · max_key  (4 × u64 LE)
//! [BLOOM   — 10240 bytes] raw bit array
//! [INDEX   — 12 × count]  (key: u64 LE, end_offset: u32 LE) per entry
//! [DATA    — variable]    value bytes, back to back
//! ```
//!
//! The sparse index stores **end offsets**: entry `p` records the byte
//! offset one past the end of its value within the data blob, so the value
//! for `index[p].key` starts at `index[p-1].end_offset` (or 0 for `p = 0`)
//! and ends at `index[p].end_offset`. Boundary arithmetic for the first
//! and last entries is covered by unit tests.
//!
//! # Guarantees
//!
//! - **Immutability:** once written, a table is never modified; it is
//!   removed only when compaction supersedes it.
//! - **Sorted keys:** within a table, index keys are strictly increasing;
//!   `min_key`/`max_key` in the header mirror the first/last index cells.
//! - **Fast negative lookups:** the bloom filter rejects most absent keys
//!   without touching the index.
//! - **Atomic creation:** the builder writes to a `.tmp` path and renames
//!   into place, so a crash cannot leave a half-written table behind.
//!
//! # Concurrency model
//!
//! Tables are memory-mapped read-only; any number of readers may share a
//! [`Table`] without locking.
//!
//! # Sub-modules
//!
//! - [`bloom`] — the fixed-size bloom filter.
//! - [`builder`] — [`TableBuilder`] for constructing tables from sorted
//!   entry streams.

pub mod bloom;
pub mod builder;

#[cfg(test)]
mod tests;

pub use bloom::BloomFilter;
pub use builder::TableBuilder;

use std::{fs::File, io, path::Path, path::PathBuf};

use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the fixed table header in bytes.
pub const HEADER_BYTES: usize = 32;

/// Size of the bloom filter region in bytes.
pub const BLOOM_BYTES: usize = 10240;

/// Size of one sparse-index cell in bytes (`u64` key + `u32` end offset).
pub const INDEX_ENTRY_BYTES: usize = 12;

/// Target maximum size of a finished table file, including header and
/// bloom filter. Memtable flushes and compaction repacking both cut a new
/// table rather than exceed this.
pub const FLUSH_LIMIT: usize = 2 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Structural damage: truncated file, index/header mismatch,
    /// non-monotonic keys. Fatal at startup.
    #[error("Corrupt table: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// The 32-byte fixed header at the start of every table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    /// Creation timestamp — the store-wide monotonic counter value
    /// assigned when this table was sealed. Breaks ties between copies
    /// of a key.
    pub time: u64,

    /// Number of entries (and sparse-index cells).
    pub count: u64,

    /// Smallest key in the table.
    pub min_key: u64,

    /// Largest key in the table.
    pub max_key: u64,
}

impl Encode for TableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.time.encode_to(buf)?;
        self.count.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (time, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                time,
                count,
                min_key,
                max_key,
            },
            off,
        ))
    }
}

/// One sparse-index cell: a key and the end offset of its value within
/// the data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The entry's key.
    pub key: u64,

    /// Byte offset one past the end of the value in the data blob.
    pub end_offset: u32,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.end_offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (end_offset, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { key, end_offset }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Table — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted table.
///
/// Holds the decoded header, bloom filter, and sparse index; values are
/// fetched lazily as slices of the mapping.
pub struct Table {
    /// Path this table was opened from (used by compaction to unlink it).
    path: PathBuf,

    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Decoded fixed header.
    header: TableHeader,

    /// Decoded bloom filter.
    bloom: BloomFilter,

    /// Decoded sparse index, sorted by strictly increasing key.
    index: Vec<IndexEntry>,
}

impl Table {
    /// Opens a table file, verifies its structure, and loads the header,
    /// bloom filter, and sparse index.
    ///
    /// # Errors
    ///
    /// [`TableError::Corruption`] if the file is shorter than its header
    /// claims, index keys are not strictly increasing, end offsets are
    /// not monotonic, or the header's key range disagrees with the index.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`, which is sound here because the
    /// file is never written after the atomic rename that created it and
    /// the mapping is read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_BYTES + BLOOM_BYTES {
            return Err(TableError::Corruption(format!(
                "file {} is {} bytes, smaller than header + bloom",
                path.display(),
                mmap.len()
            )));
        }

        let (header, _) = encoding::decode_from_slice::<TableHeader>(&mmap[..HEADER_BYTES])?;

        let count = header.count as usize;
        let data_start = HEADER_BYTES + BLOOM_BYTES + count * INDEX_ENTRY_BYTES;
        if mmap.len() < data_start {
            return Err(TableError::Corruption(format!(
                "file {} truncated: {} entries need {} bytes of metadata, file has {}",
                path.display(),
                count,
                data_start,
                mmap.len()
            )));
        }

        let bloom = BloomFilter::from_bytes(&mmap[HEADER_BYTES..HEADER_BYTES + BLOOM_BYTES])
            .ok_or_else(|| TableError::Corruption("bloom region has wrong length".into()))?;

        let mut index = Vec::with_capacity(count);
        let mut cursor = HEADER_BYTES + BLOOM_BYTES;
        for _ in 0..count {
            let (entry, n) =
                encoding::decode_from_slice::<IndexEntry>(&mmap[cursor..cursor + INDEX_ENTRY_BYTES])?;
            debug_assert_eq!(n, INDEX_ENTRY_BYTES);
            cursor += INDEX_ENTRY_BYTES;
            index.push(entry);
        }

        Self::verify(&path, &mmap, &header, &index, data_start)?;

        Ok(Self {
            path,
            mmap,
            header,
            bloom,
            index,
        })
    }

    /// Structural checks run once at open.
    fn verify(
        path: &Path,
        mmap: &Mmap,
        header: &TableHeader,
        index: &[IndexEntry],
        data_start: usize,
    ) -> Result<(), TableError> {
        for pair in index.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(TableError::Corruption(format!(
                    "index keys not strictly increasing in {}",
                    path.display()
                )));
            }
            if pair[0].end_offset > pair[1].end_offset {
                return Err(TableError::Corruption(format!(
                    "index end offsets decrease in {}",
                    path.display()
                )));
            }
        }

        if let (Some(first), Some(last)) = (index.first(), index.last()) {
            if first.key != header.min_key || last.key != header.max_key {
                return Err(TableError::Corruption(format!(
                    "header key range [{}, {}] disagrees with index [{}, {}] in {}",
                    header.min_key,
                    header.max_key,
                    first.key,
                    last.key,
                    path.display()
                )));
            }
            let data_len = mmap.len() - data_start;
            if last.end_offset as usize != data_len {
                return Err(TableError::Corruption(format!(
                    "data blob is {} bytes but index claims {} in {}",
                    data_len,
                    last.end_offset,
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Path this table was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creation timestamp.
    pub fn time(&self) -> u64 {
        self.header.time
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.header.count as usize
    }

    /// Smallest key.
    pub fn min_key(&self) -> u64 {
        self.header.min_key
    }

    /// Largest key.
    pub fn max_key(&self) -> u64 {
        self.header.max_key
    }

    /// Whether `key` falls inside this table's `[min_key, max_key]` range.
    pub fn covers(&self, key: u64) -> bool {
        self.header.min_key <= key && key <= self.header.max_key
    }

    /// Whether `[lo, hi]` intersects this table's key range.
    pub fn overlaps(&self, lo: u64, hi: u64) -> bool {
        !(hi < self.header.min_key || self.header.max_key < lo)
    }

    /// Bloom-filter membership test. `false` means definitely absent.
    pub fn may_contain(&self, key: u64) -> bool {
        self.bloom.contains(key)
    }

    /// Binary-searches the sparse index for `key`, returning its position.
    pub fn search(&self, key: u64) -> Option<usize> {
        self.index.binary_search_by_key(&key, |e| e.key).ok()
    }

    /// First index position with `index[p].key >= key`, or `count()` if none.
    pub fn lower_bound(&self, key: u64) -> usize {
        self.index.partition_point(|e| e.key < key)
    }

    /// First index position with `index[p].key > key`, or `count()` if none.
    pub fn upper_bound(&self, key: u64) -> usize {
        self.index.partition_point(|e| e.key <= key)
    }

    /// Key of the index cell at `pos`.
    pub fn key_at(&self, pos: usize) -> u64 {
        self.index[pos].key
    }

    /// `(start, len)` of the value for the entry at `pos`, relative to the
    /// start of the data blob.
    ///
    /// The index stores end offsets, so the start is the previous entry's
    /// end offset — or 0 for the first entry.
    pub fn value_bounds(&self, pos: usize) -> (usize, usize) {
        let end = self.index[pos].end_offset as usize;
        let start = if pos == 0 {
            0
        } else {
            self.index[pos - 1].end_offset as usize
        };
        (start, end - start)
    }

    /// Borrowed value bytes for the entry at `pos`.
    pub fn value_at(&self, pos: usize) -> Result<&[u8], TableError> {
        let (start, len) = self.value_bounds(pos);
        let data_start = HEADER_BYTES + BLOOM_BYTES + self.count() * INDEX_ENTRY_BYTES;
        let lo = data_start + start;
        let hi = lo + len;
        if hi > self.mmap.len() {
            return Err(TableError::Corruption(format!(
                "value extent [{lo}, {hi}) exceeds file length {} in {}",
                self.mmap.len(),
                self.path.display()
            )));
        }
        Ok(&self.mmap[lo..hi])
    }

    /// Point lookup within this table alone.
    ///
    /// Applies the bloom filter before the index search; the caller is
    /// responsible for range pruning across tables and for interpreting
    /// the tombstone sentinel.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, TableError> {
        if !self.covers(key) || !self.bloom.contains(key) {
            return Ok(None);
        }
        match self.search(key) {
            // Bloom false positive falls through here.
            None => Ok(None),
            Some(pos) => Ok(Some(self.value_at(pos)?.to_vec())),
        }
    }
}
