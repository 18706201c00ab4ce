//! SSTable writer — builds a complete table file from a sorted entry stream.
//!
//! [`TableBuilder`] accumulates `(key, value)` pairs **in ascending key
//! order**, maintaining the bloom filter, sparse index, and data blob as
//! it goes, then writes the finished file in one pass.
//!
//! # Input Requirements
//!
//! - Keys must arrive strictly ascending. The memtable iterates in key
//!   order and compaction merges in key order, so both producers satisfy
//!   this naturally; it is checked with a debug assertion.
//!
//! # Atomicity
//!
//! 1. Write everything to `<path>.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename `<path>.tmp` → `<path>`.
//!
//! A crash cannot produce a partially-written table at the final path.

use std::{
    fs::{OpenOptions, rename},
    io::{BufWriter, Write},
    path::Path,
};

use tracing::trace;

use super::{
    BLOOM_BYTES, BloomFilter, HEADER_BYTES, INDEX_ENTRY_BYTES, IndexEntry, TableError,
    TableHeader,
};
use crate::encoding::Encode;

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates sorted entries and writes a complete SST file.
pub struct TableBuilder {
    time: u64,
    bloom: BloomFilter,
    index: Vec<IndexEntry>,
    data: Vec<u8>,
    min_key: u64,
    max_key: u64,
}

impl TableBuilder {
    /// Creates a builder for a table with creation timestamp `time`.
    pub fn new(time: u64) -> Self {
        Self {
            time,
            bloom: BloomFilter::new(),
            index: Vec::new(),
            data: Vec::new(),
            min_key: u64::MAX,
            max_key: 0,
        }
    }

    /// Appends an entry. Keys must arrive strictly ascending.
    pub fn add(&mut self, key: u64, value: &[u8]) {
        debug_assert!(
            self.index.last().map_or(true, |e| e.key < key),
            "TableBuilder::add called with non-ascending key {key}"
        );

        self.data.extend_from_slice(value);
        self.index.push(IndexEntry {
            key,
            end_offset: self.data.len() as u32,
        });
        self.bloom.insert(key);
        self.min_key = self.min_key.min(key);
        self.max_key = self.max_key.max(key);
    }

    /// Number of entries added so far.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Whether no entries have been added.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// File size the table would have if sealed now.
    pub fn file_bytes(&self) -> usize {
        HEADER_BYTES + BLOOM_BYTES + self.index.len() * INDEX_ENTRY_BYTES + self.data.len()
    }

    /// File size after a hypothetical `add` of `value_len` more bytes.
    ///
    /// Compaction repacking cuts a new table when this would exceed the
    /// configured flush limit.
    pub fn projected_bytes(&self, value_len: usize) -> usize {
        self.file_bytes() + INDEX_ENTRY_BYTES + value_len
    }

    /// The creation timestamp this builder was given.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Serializes the table and writes it to `path` atomically.
    ///
    /// # Errors
    ///
    /// [`TableError::Corruption`] when called on an empty builder; any
    /// I/O error from writing, syncing, or renaming.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<(), TableError> {
        if self.index.is_empty() {
            return Err(TableError::Corruption(
                "refusing to write an empty table".into(),
            ));
        }

        let final_path = path.as_ref();
        let tmp_path = final_path.with_extension("tmp");

        let header = TableHeader {
            time: self.time,
            count: self.index.len() as u64,
            min_key: self.min_key,
            max_key: self.max_key,
        };

        let mut meta = Vec::with_capacity(
            HEADER_BYTES + BLOOM_BYTES + self.index.len() * INDEX_ENTRY_BYTES,
        );
        header.encode_to(&mut meta)?;
        meta.extend_from_slice(self.bloom.as_bytes());
        for entry in &self.index {
            entry.encode_to(&mut meta)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&meta)?;
        writer.write_all(&self.data)?;
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        rename(&tmp_path, final_path)?;

        trace!(
            path = %final_path.display(),
            time = self.time,
            count = self.index.len(),
            bytes = HEADER_BYTES + BLOOM_BYTES + self.index.len() * INDEX_ENTRY_BYTES + self.data.len(),
            "sealed table"
        );
        Ok(())
    }
}
