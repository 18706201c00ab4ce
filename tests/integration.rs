//! End-to-end tests through the public API only.

use std::collections::HashSet;

use tempfile::TempDir;
use vantadb::{Store, StoreConfig};

/// Small tables and a compact embedding dimension so a few hundred keys
/// exercise flushing, compaction, and every search path.
fn test_config() -> StoreConfig {
    StoreConfig {
        dim: 64,
        flush_limit: 32 + 10240 + 512,
        ..StoreConfig::default()
    }
}

#[test]
fn put_get_del_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();

    store.put(1, b"alpha".to_vec()).unwrap();
    assert_eq!(store.get(1).unwrap(), Some(b"alpha".to_vec()));

    assert!(store.del(1).unwrap());
    assert_eq!(store.get(1).unwrap(), None);
    assert!(!store.del(1).unwrap());
}

#[test]
fn bulk_writes_survive_flush_compaction_and_scan() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();

    for key in 0..500u64 {
        store.put(key, format!("value-{key}").into_bytes()).unwrap();
    }

    for key in (0..500u64).step_by(17) {
        assert_eq!(
            store.get(key).unwrap(),
            Some(format!("value-{key}").into_bytes())
        );
    }

    let hits = store.scan(100, 199).unwrap();
    assert_eq!(hits.len(), 100);
    for (offset, (key, value)) in hits.iter().enumerate() {
        assert_eq!(*key, 100 + offset as u64);
        assert_eq!(*value, format!("value-{key}").into_bytes());
    }
}

#[test]
fn deletions_hold_across_the_whole_stack() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();

    for key in 0..300u64 {
        store.put(key, format!("doc {key}").into_bytes()).unwrap();
    }
    for key in (0..300u64).step_by(3) {
        assert!(store.del(key).unwrap());
    }

    for key in 0..300u64 {
        let expected = if key % 3 == 0 {
            None
        } else {
            Some(format!("doc {key}").into_bytes())
        };
        assert_eq!(store.get(key).unwrap(), expected, "key {key}");
    }

    let live = store.scan(0, 299).unwrap();
    assert_eq!(live.len(), 200);
    assert!(live.iter().all(|(k, _)| k % 3 != 0));
}

#[test]
fn knn_variants_agree_and_resolve_values() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();

    for key in 0..200u64 {
        store
            .put(key, format!("article {key} on subject {}", key % 11).into_bytes())
            .unwrap();
    }

    for query in ["article on subject 4", "article 57", "unrelated words"] {
        let serial = store.search_knn(query, 5).unwrap();
        let parallel = store.search_knn_parallel(query, 5).unwrap();

        let serial_keys: HashSet<u64> = serial.iter().map(|(k, _)| *k).collect();
        let parallel_keys: HashSet<u64> = parallel.iter().map(|(k, _)| *k).collect();
        assert_eq!(serial_keys, parallel_keys, "query {query:?}");

        for (key, value) in serial {
            assert_eq!(store.get(key).unwrap(), Some(value));
        }
    }

    let graph_hits = store.search_knn_hnsw("article 57 on subject 2", 5).unwrap();
    assert!(!graph_hits.is_empty());
    for (key, value) in graph_hits {
        assert_eq!(store.get(key).unwrap(), Some(value));
    }
}

#[test]
fn full_state_survives_shutdown_and_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let store = Store::open(tmp.path(), test_config()).unwrap();
        for key in 0..150u64 {
            store
                .put(key, format!("persistent {key}").into_bytes())
                .unwrap();
        }
        store.del(10).unwrap();
        store.del(11).unwrap();
        store.close().unwrap();
    }

    let store = Store::open(tmp.path(), test_config()).unwrap();

    assert_eq!(store.get(10).unwrap(), None);
    assert_eq!(
        store.get(42).unwrap(),
        Some(b"persistent 42".to_vec())
    );
    assert_eq!(store.scan(0, 149).unwrap().len(), 148);

    // The vector side came back too: search works without re-ingesting.
    let hits = store.search_knn("persistent 42", 1).unwrap();
    assert_eq!(hits[0].0, 42);
    let graph_hits = store.search_knn_hnsw("persistent 42", 3).unwrap();
    assert!(graph_hits.iter().all(|(k, _)| *k != 10 && *k != 11));
}

#[test]
fn restart_without_writes_preserves_exact_cache() {
    let tmp = TempDir::new().unwrap();
    let live_before: usize;
    {
        let store = Store::open(tmp.path(), test_config()).unwrap();
        for key in 0..80u64 {
            store.put(key, format!("cached {key}").into_bytes()).unwrap();
        }
        for key in 60..80u64 {
            store.del(key).unwrap();
        }
        live_before = store.stats().unwrap().cache_entries;
        store.close().unwrap();
    }

    let store = Store::open(tmp.path(), test_config()).unwrap();
    assert_eq!(store.stats().unwrap().cache_entries, live_before);

    // A second clean restart must be byte-stable as well.
    store.close().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();
    assert_eq!(store.stats().unwrap().cache_entries, live_before);
}

#[test]
fn reset_wipes_disk_and_memory() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path(), test_config()).unwrap();
    for key in 0..100u64 {
        store.put(key, format!("wiped {key}").into_bytes()).unwrap();
    }
    store.close().unwrap();

    store.reset().unwrap();
    assert_eq!(store.get(0).unwrap(), None);
    assert!(store.scan(0, u64::MAX).unwrap().is_empty());
    assert!(store.search_knn("wiped 3", 5).unwrap().is_empty());

    // And the store accepts fresh writes afterwards.
    store.put(7, b"reborn".to_vec()).unwrap();
    assert_eq!(store.get(7).unwrap(), Some(b"reborn".to_vec()));
}
