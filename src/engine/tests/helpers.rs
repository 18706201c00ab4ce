use crate::engine::{Store, StoreConfig};
use crate::sstable::{BLOOM_BYTES, HEADER_BYTES};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Embedding dimension used throughout the engine tests. Small enough to
/// keep the vector work negligible.
pub const TEST_DIM: usize = 8;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config whose memtable never flushes during a normal-sized test.
pub fn memtable_only_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        dim: TEST_DIM,
        flush_limit: HEADER_BYTES + BLOOM_BYTES + 1024 * 1024,
        hnsw: Default::default(),
    }
}

/// Config that flushes after roughly twenty short entries, driving the
/// flush and compaction paths hard with little data.
pub fn small_table_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        dim: TEST_DIM,
        flush_limit: HEADER_BYTES + BLOOM_BYTES + 300,
        hnsw: Default::default(),
    }
}

/// Config for text-KNN tests: a wider dimension so hashed embeddings of
/// distinct texts stay distinguishable.
pub fn knn_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        dim: 64,
        flush_limit: HEADER_BYTES + BLOOM_BYTES + 1024 * 1024,
        hnsw: Default::default(),
    }
}

/// Opens a store on `path` with the small-table config and inserts
/// `count` keys with `"v{key}"` values.
pub fn store_with_keys(path: &Path, count: u64) -> Store {
    let store = Store::open(path, small_table_config()).expect("open");
    for key in 0..count {
        store.put(key, format!("v{key}").into_bytes()).expect("put");
    }
    store
}

/// Total tables across all levels.
pub fn table_count(store: &Store) -> usize {
    store
        .stats()
        .expect("stats")
        .levels
        .iter()
        .map(Vec::len)
        .sum()
}
