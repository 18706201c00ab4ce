//! # VantaDB
//!
//! An embeddable, persistent key-value store that couples a
//! **Log-Structured Merge Tree (LSM-tree)** keyed by `u64` to an
//! approximate-nearest-neighbor index over dense float vectors derived
//! from the stored values. Every write lands in both worlds: the pair
//! goes into the LSM, and an embedding of the value goes into an
//! in-memory vector cache and an **HNSW** graph. Reads may be point
//! lookups, sorted range scans, or k-nearest-neighbor queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Store                              │
//! │  ┌────────────┐   ┌───────────────────┐  ┌─────────────┐   │
//! │  │  Memtable  │   │   Tiered levels   │  │   Vector    │   │
//! │  │ (skiplist) │   │ level-0 … level-L │  │   cache     │   │
//! │  └─────┬──────┘   │  (SSTs on disk)   │  └──────┬──────┘   │
//! │        │  flush   └─────────┬─────────┘         │          │
//! │        └──────────►         │ compaction        │ insert   │
//! │                             ▼                   ▼          │
//! │  ┌──────────────────────────────────┐  ┌────────────────┐  │
//! │  │   k-way scan / level-walk get    │  │   HNSW graph   │  │
//! │  └──────────────────────────────────┘  └────────────────┘  │
//! │                                                            │
//! │  persistence: level-<L>/<T>.sst · embedding.bin · hnsw/    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The [`Store`] — open, put, get, del, scan, KNN, reset, close |
//! | [`memtable`] | Skiplist-backed in-memory write buffer |
//! | [`sstable`] | Immutable on-disk tables: header, bloom filter, sparse index |
//! | [`compaction`] | Tiered compaction keeping every level within its budget |
//! | [`hnsw`] | Incremental HNSW graph with tombstones and snapshots |
//! | [`vector`] | Cosine similarity, embedding interface, vector cache + log |
//! | [`knn`] | Top-k selection: serial, map-reduce parallel, HNSW-backed |
//! | [`encoding`] | Deterministic little-endian binary encoding |
//!
//! ## Key Features
//!
//! - **Write path** — a `put` embeds the value, caches the vector,
//!   inserts it into the HNSW graph, and buffers the pair in a skiplist
//!   memtable that flushes to level 0 at 2 MiB.
//! - **Read path** — `get` walks memtable → levels, pruning with
//!   per-table key ranges and bloom filters; `scan` merges all
//!   overlapping sources through a min-heap.
//! - **Vector search** — `search_knn` (exact, brute-force),
//!   `search_knn_parallel` (map-reduce over cache chunks), and
//!   `search_knn_hnsw` (greedy layered graph search).
//! - **Durability** — SSTs are immutable and replayed on startup; the
//!   vector cache persists through an append-only embedding log and the
//!   graph through a node/edge snapshot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vantadb::{Store, StoreConfig};
//!
//! let store = Store::open("/tmp/my_db", StoreConfig::default()).unwrap();
//!
//! store.put(1, b"the quick brown fox".to_vec()).unwrap();
//! assert_eq!(store.get(1).unwrap(), Some(b"the quick brown fox".to_vec()));
//!
//! let hits = store.search_knn("quick fox", 3).unwrap();
//! assert_eq!(hits[0].0, 1);
//!
//! store.del(1).unwrap();
//! assert_eq!(store.get(1).unwrap(), None);
//!
//! store.close().unwrap();
//! ```

pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod hnsw;
pub mod knn;
pub mod memtable;
pub mod sstable;
pub mod vector;

pub use engine::{DEL_MARKER, Store, StoreConfig, StoreError};
pub use hnsw::HnswParams;
pub use vector::{Embedder, HashingEmbedder};
