//! # Storage Engine
//!
//! The [`Store`]: a synchronous LSM-tree keyed by `u64` with an attached
//! vector index. This module owns the write path (memtable, flush), the
//! read path (level walk, k-way scan), the KNN entry points, and startup
//! / shutdown persistence.
//!
//! ## Design Overview
//!
//! Data lives in three places, queried newest-first:
//!
//! 1. **Memtable** — a skiplist buffer of recent writes.
//! 2. **Level 0** — tables flushed straight from the memtable; their key
//!    ranges may overlap, so a lookup must consider all of them.
//! 3. **Levels ≥ 1** — tables produced by compaction; within one level
//!    the key ranges are pairwise disjoint.
//!
//! A `put` embeds the value, updates the vector cache and HNSW graph,
//! and buffers the pair. When the projected table size (header + bloom +
//! index + data) would exceed the flush limit, the memtable seals into
//! `level-0/<T>.sst` with a fresh timestamp `T` and compaction runs
//! until every level is within its budget of `2^(l+1)` tables.
//!
//! Deletion writes the reserved [`DEL_MARKER`] value; readers map it to
//! "not found". The tombstone flows down through compaction and is only
//! dropped once it reaches the deepest populated level.
//!
//! ## Concurrency Model
//!
//! All engine state sits behind one `Arc<RwLock<StoreInner>>`: a single
//! mutator at a time (`put`, `del`, `reset`, `close` take the write
//! lock), while `get`, `scan`, and the KNN calls share read locks. The
//! parallel KNN map phase runs scoped threads over a borrowed view of
//! the cache under one read lock; value resolution afterwards issues
//! independent point reads.
//!
//! ## Guarantees
//!
//! - **Program-order reads:** a `get(k)` after `put(k, v)` observes `v`
//!   (or a later value) unless a `del(k)` intervened.
//! - **Level invariant:** the most recent live version of a key is found
//!   in the lowest level containing it, at the highest timestamp there.
//! - **Startup recovery:** levels are rebuilt by scanning `level-<n>`
//!   directories in ascending order; the timestamp counter resumes from
//!   the maximum persisted table time; the vector cache replays the
//!   embedding log and the graph reloads from its snapshot.

pub mod merge;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::compaction;
use crate::hnsw::{Hnsw, HnswParams, snapshot};
use crate::hnsw::snapshot::HnswError;
use crate::knn;
use crate::memtable::Memtable;
use crate::sstable::{BLOOM_BYTES, FLUSH_LIMIT, HEADER_BYTES, Table, TableBuilder, TableError};
use crate::vector::log::{self as vlog, VectorLogError};
use crate::vector::{Embedder, HashingEmbedder, VectorCache};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Reserved tombstone value. A key mapped to this byte string at its
/// highest timestamp is absent from the logical store; user code must
/// not store it as a regular value.
pub const DEL_MARKER: &[u8] = b"~DELETED~";

/// Default embedding dimension.
pub const DEFAULT_DIM: usize = 768;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the SSTable subsystem.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Error from the embedding log.
    #[error("Vector log error: {0}")]
    VectorLog(#[from] VectorLogError),

    /// Error from the HNSW snapshot.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] HnswError),

    /// An embedding whose length differs from the store dimension.
    #[error("dimension mismatch: embedder produced {actual}, store expects {expected}")]
    DimensionMismatch {
        /// The store's fixed dimension.
        expected: usize,
        /// What the embedder returned.
        actual: usize,
    },

    /// Internal invariant violation (poisoned lock, worker panic).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Store`] instance, fixed at open time.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Embedding dimension. Invariant for the lifetime of the data
    /// directory; persisted artifacts are checked against it on load.
    pub dim: usize,

    /// Table size ceiling driving memtable flushes and compaction
    /// repacking, header and bloom filter included.
    pub flush_limit: usize,

    /// HNSW graph parameters.
    pub hnsw: HnswParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            flush_limit: FLUSH_LIMIT,
            hnsw: HnswParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Metadata of one on-disk table, as reported by [`Store::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    /// Creation timestamp.
    pub time: u64,
    /// Smallest key.
    pub min_key: u64,
    /// Largest key.
    pub max_key: u64,
    /// Number of entries.
    pub entries: usize,
}

/// Snapshot of store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Entries currently buffered in the memtable.
    pub memtable_entries: usize,
    /// Live keys in the vector cache.
    pub cache_entries: usize,
    /// Nodes ever inserted into the HNSW graph.
    pub hnsw_nodes: usize,
    /// Per-level table metadata, level 0 first.
    pub levels: Vec<Vec<TableInfo>>,
}

// ------------------------------------------------------------------------------------------------
// StoreInner — state behind the lock
// ------------------------------------------------------------------------------------------------

pub(crate) struct StoreInner {
    /// Data directory root.
    pub(crate) root: PathBuf,

    /// Immutable configuration.
    pub(crate) config: StoreConfig,

    /// In-memory write buffer.
    pub(crate) memtable: Memtable,

    /// On-disk tables, `levels[l]` holding level `l`.
    pub(crate) levels: Vec<Vec<Arc<Table>>>,

    /// Last timestamp handed out; the next table gets `last_time + 1`.
    pub(crate) last_time: u64,

    /// Key → embedding for every live key.
    pub(crate) cache: VectorCache,

    /// The ANN graph.
    pub(crate) hnsw: Hnsw,
}

impl StoreInner {
    /// Directory of one level under the data root.
    pub(crate) fn level_dir(&self, level: usize) -> PathBuf {
        self.root.join(format!("level-{level}"))
    }

    /// Allocates the next table timestamp.
    pub(crate) fn alloc_time(&mut self) -> u64 {
        self.last_time += 1;
        self.last_time
    }

    /// Makes sure `levels[level]` exists.
    pub(crate) fn ensure_level(&mut self, level: usize) {
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// The embeddable key-value store with vector search.
///
/// Thread-safe — clone the handle freely; all clones share state via the
/// internal `Arc<RwLock<_>>`.
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
    embedder: Arc<dyn Embedder>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            embedder: Arc::clone(&self.embedder),
        }
    }
}

impl Store {
    /// Opens (or creates) a store rooted at `path` using the built-in
    /// [`HashingEmbedder`].
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let embedder = Arc::new(HashingEmbedder::new(config.dim));
        Self::open_with_embedder(path, config, embedder)
    }

    /// Opens (or creates) a store with a caller-provided embedder.
    ///
    /// On an existing directory this replays the persisted state: level
    /// directories are scanned ascending until the first absent one, all
    /// table headers are cached, the timestamp counter resumes from the
    /// maximum table time, the vector cache reloads from the embedding
    /// log, and the HNSW graph reloads from its snapshot.
    pub fn open_with_embedder(
        path: impl AsRef<Path>,
        config: StoreConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        // 1. Rebuild the level list from disk. A missing level directory
        //    terminates the walk.
        let mut levels: Vec<Vec<Arc<Table>>> = Vec::new();
        let mut last_time = 0u64;
        let mut level = 0usize;
        loop {
            let dir = root.join(format!("level-{level}"));
            if !dir.is_dir() {
                break;
            }
            let mut tables = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let file_path = entry?.path();
                if file_path.extension().and_then(|s| s.to_str()) == Some("sst") {
                    let table = Table::open(&file_path)?;
                    last_time = last_time.max(table.time());
                    tables.push(Arc::new(table));
                }
            }
            levels.push(tables);
            level += 1;
        }

        // 2. Reconstitute the vector cache from the embedding log.
        let cache = vlog::load(&root, config.dim)?.unwrap_or_default();

        // 3. Reload the graph snapshot, attaching vectors by key.
        let hnsw = match snapshot::load(&root, &cache, config.dim)? {
            Some(graph) => graph,
            None => Hnsw::new(config.hnsw),
        };

        info!(
            root = %root.display(),
            levels = levels.len(),
            tables = levels.iter().map(Vec::len).sum::<usize>(),
            last_time,
            cached_vectors = cache.len(),
            hnsw_nodes = hnsw.len(),
            "opened store"
        );

        let inner = StoreInner {
            root,
            config,
            memtable: Memtable::new(),
            levels,
            last_time,
            cache,
            hnsw,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            embedder,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key-value pair.
    ///
    /// The value is embedded, the vector cached and inserted into the
    /// HNSW graph, and the pair buffered in the memtable — flushing to
    /// level 0 and compacting first if the memtable is full.
    ///
    /// Values equal to [`DEL_MARKER`] are reserved for tombstones.
    pub fn put(&self, key: u64, value: Vec<u8>) -> Result<(), StoreError> {
        // Embed outside the lock; the embedder may be slow.
        let text = String::from_utf8_lossy(&value).into_owned();
        let vector = self.embedder.embed(&text);
        if vector.len() != self.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }

        let mut inner = self.write_lock()?;
        inner.cache.insert(key, vector.clone());
        inner.hnsw.insert(key, vector);
        Self::write_value(&mut inner, key, value)?;
        trace!(key, "put");
        Ok(())
    }

    /// Deletes a key.
    ///
    /// Returns `Ok(true)` iff the key was previously live. A live key
    /// gets a tombstone in the LSM, its HNSW node is marked deleted, and
    /// its cache entry is erased.
    pub fn del(&self, key: u64) -> Result<bool, StoreError> {
        let mut inner = self.write_lock()?;

        if Self::get_inner(&inner, key)?.is_none() {
            return Ok(false);
        }

        inner.hnsw.mark_deleted(key);
        inner.cache.remove(key);
        Self::write_value(&mut inner, key, DEL_MARKER.to_vec())?;
        trace!(key, "del");
        Ok(true)
    }

    /// Buffers `(key, value)` in the memtable, sealing and compacting
    /// first when the projected table size would exceed the flush limit.
    fn write_value(inner: &mut StoreInner, key: u64, value: Vec<u8>) -> Result<(), StoreError> {
        let projected =
            inner.memtable.projected_bytes(key, value.len()) + HEADER_BYTES + BLOOM_BYTES;
        if projected > inner.config.flush_limit && !inner.memtable.is_empty() {
            Self::flush_memtable(inner)?;
            compaction::run(inner)?;
        }
        inner.memtable.insert(key, value);
        Ok(())
    }

    /// Seals the memtable into `level-0/<T>.sst` with a fresh timestamp
    /// and resets it.
    fn flush_memtable(inner: &mut StoreInner) -> Result<(), StoreError> {
        if inner.memtable.is_empty() {
            return Ok(());
        }

        let time = inner.alloc_time();
        let mut builder = TableBuilder::new(time);
        for (key, value) in inner.memtable.iter() {
            builder.add(key, &value);
        }

        let dir = inner.level_dir(0);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{time}.sst"));
        let entries = builder.count();
        builder.write_to(&path)?;

        let table = Arc::new(Table::open(&path)?);
        inner.ensure_level(0);
        inner.levels[0].push(table);
        inner.memtable.clear();

        debug!(time, entries, "flushed memtable to level 0");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Point lookup.
    ///
    /// Probes the memtable, then walks the levels in ascending order. In
    /// each level only tables whose key range covers `key` are inspected
    /// (with a bloom pre-check); among those holding the key, the one
    /// with the greatest timestamp wins. Tombstones read as `None`.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.read_lock()?;
        Self::get_inner(&inner, key)
    }

    fn get_inner(inner: &StoreInner, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = inner.memtable.get(key) {
            return Ok(if value == DEL_MARKER { None } else { Some(value) });
        }

        for tables in &inner.levels {
            let mut best: Option<(u64, Vec<u8>)> = None;
            for table in tables {
                if !table.covers(key) || !table.may_contain(key) {
                    continue;
                }
                // A bloom false positive falls through the search here.
                if let Some(pos) = table.search(key) {
                    let newer = best.as_ref().map_or(true, |(t, _)| table.time() > *t);
                    if newer {
                        best = Some((table.time(), table.value_at(pos)?.to_vec()));
                    }
                }
            }
            if let Some((_, value)) = best {
                return Ok(if value == DEL_MARKER { None } else { Some(value) });
            }
        }
        Ok(None)
    }

    /// Sorted range scan over the closed interval `[k1, k2]`.
    ///
    /// Merges the memtable (timestamp ∞) with every overlapping table
    /// through a min-heap keyed by `(key ↑, timestamp ↓)`; the first
    /// record popped for a key wins and tombstoned keys are omitted.
    pub fn scan(&self, k1: u64, k2: u64) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        if k1 > k2 {
            return Ok(Vec::new());
        }
        let inner = self.read_lock()?;

        let mut sources: Vec<merge::ScanSource> = Vec::new();

        let mem = inner.memtable.scan(k1..=k2);
        if !mem.is_empty() {
            sources.push(merge::ScanSource::from_memtable(mem));
        }

        for tables in &inner.levels {
            for table in tables {
                if !table.overlaps(k1, k2) {
                    continue;
                }
                let start = table.lower_bound(k1);
                let end = table.upper_bound(k2);
                if start < end {
                    sources.push(merge::ScanSource::from_table(Arc::clone(table), start, end));
                }
            }
        }

        let mut out = Vec::new();
        for item in merge::ScanMerge::new(sources)? {
            let (key, value) = item?;
            if value != DEL_MARKER {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    // --------------------------------------------------------------------------------------------
    // KNN
    // --------------------------------------------------------------------------------------------

    /// Exact k-nearest-neighbor search: brute force over the vector
    /// cache, resolving each surviving key to its live value.
    ///
    /// Results are ordered by cosine similarity descending; an empty
    /// store yields an empty sequence.
    pub fn search_knn(&self, query: &str, k: usize) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let vector = self.embed_query(query)?;

        let ranked = {
            let inner = self.read_lock()?;
            knn::top_k_serial(inner.cache.iter().map(|(k, v)| (*k, v)), &vector, k)
        };

        self.resolve_values(ranked.into_iter().map(|s| s.key))
    }

    /// Exact k-nearest-neighbor search, map-reduce parallel.
    ///
    /// The cache is partitioned into one contiguous chunk per available
    /// core; each task reduces its chunk to a local top-k under a shared
    /// read-only view, the local sets merge into the global top-k, and
    /// the surviving keys resolve to values via independent point reads.
    pub fn search_knn_parallel(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let vector = self.embed_query(query)?;
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let ranked = {
            let inner = self.read_lock()?;
            let entries: Vec<(u64, &Vec<f32>)> =
                inner.cache.iter().map(|(k, v)| (*k, v)).collect();
            knn::top_k_parallel(&entries, &vector, k, threads).map_err(StoreError::Internal)?
        };

        self.resolve_values_parallel(ranked.into_iter().map(|s| s.key).collect())
    }

    /// Approximate k-nearest-neighbor search through the HNSW graph.
    ///
    /// Deleted nodes are skipped inside the graph; returned keys resolve
    /// to their live values.
    pub fn search_knn_hnsw(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let vector = self.embed_query(query)?;

        let ranked = {
            let inner = self.read_lock()?;
            inner.hnsw.search(&vector, k)
        };

        self.resolve_values(ranked.into_iter().map(|(key, _)| key))
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>, StoreError> {
        let vector = self.embedder.embed(query);
        if vector.len() != self.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Resolves keys to live values sequentially; keys without a live
    /// value are dropped from the result.
    fn resolve_values(
        &self,
        keys: impl Iterator<Item = u64>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Resolves keys to live values with one scoped read per key.
    fn resolve_values_parallel(
        &self,
        keys: Vec<u64>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let fetched = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = keys
                .iter()
                .map(|&key| scope.spawn(move |_| self.get(key)))
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(
                    handle
                        .join()
                        .map_err(|_| StoreError::Internal("knn fetch task panicked".into()))?,
                );
            }
            Ok::<_, StoreError>(results)
        })
        .map_err(|_| StoreError::Internal("knn fetch scope panicked".into()))??;

        let mut out = Vec::with_capacity(keys.len());
        for (key, result) in keys.into_iter().zip(fetched) {
            if let Some(value) = result? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Erases everything: memtable, every level directory, the embedding
    /// log, the HNSW snapshot, and all in-memory vector state. The
    /// timestamp counter restarts from zero.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut inner = self.write_lock()?;

        inner.memtable.clear();

        let level_count = inner.levels.len();
        for level in 0..level_count {
            let dir = inner.level_dir(level);
            if dir.is_dir() {
                fs::remove_dir_all(&dir)?;
            }
        }
        inner.levels.clear();
        inner.last_time = 0;

        inner.cache.clear();
        inner.hnsw.clear();

        let log_path = inner.root.join(vlog::EMBEDDING_LOG);
        if log_path.exists() {
            fs::remove_file(&log_path)?;
        }
        let snap_dir = inner.root.join(snapshot::HNSW_DIR);
        if snap_dir.is_dir() {
            fs::remove_dir_all(&snap_dir)?;
        }

        info!("store reset");
        Ok(())
    }

    /// Gracefully shuts the store down.
    ///
    /// Flushes a non-empty memtable to level 0, runs compaction to
    /// quiescence, persists the embedding log (appending dirty keys, or
    /// writing a fresh dump on first save), and writes a new HNSW
    /// snapshot.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.write_lock()?;

        if !inner.memtable.is_empty() {
            Self::flush_memtable(&mut inner)?;
            compaction::run(&mut inner)?;
        }

        let inner = &mut *inner; // split borrows for cache vs config
        vlog::save(&inner.root, &mut inner.cache, inner.config.dim)?;
        snapshot::save(&inner.root, &inner.hnsw, inner.config.dim)?;

        info!("store closed");
        Ok(())
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.read_lock()?;
        Ok(StoreStats {
            memtable_entries: inner.memtable.len(),
            cache_entries: inner.cache.len(),
            hnsw_nodes: inner.hnsw.len(),
            levels: inner
                .levels
                .iter()
                .map(|tables| {
                    tables
                        .iter()
                        .map(|t| TableInfo {
                            time: t.time(),
                            min_key: t.min_key(),
                            max_key: t.max_key(),
                            entries: t.count(),
                        })
                        .collect()
                })
                .collect(),
        })
    }

    /// The store's embedding dimension.
    pub fn dim(&self) -> usize {
        self.embedder.dim()
    }

    // --------------------------------------------------------------------------------------------
    // Lock helpers
    // --------------------------------------------------------------------------------------------

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }
}
