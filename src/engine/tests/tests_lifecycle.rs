//! Shutdown, restart, and reset tests.

#[cfg(test)]
mod tests {
    use crate::engine::Store;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn values_survive_close_and_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(tmp.path(), small_table_config()).unwrap();
            for key in 0..60u64 {
                store.put(key, format!("v{key}").into_bytes()).unwrap();
            }
            store.close().unwrap();
        }

        let store = Store::open(tmp.path(), small_table_config()).unwrap();
        for key in 0..60u64 {
            assert_eq!(store.get(key).unwrap(), Some(format!("v{key}").into_bytes()));
        }
    }

    #[test]
    fn cache_is_durable_across_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(tmp.path(), knn_config()).unwrap();
            for key in 0..40u64 {
                store.put(key, format!("text {key}").into_bytes()).unwrap();
            }
            store.del(7).unwrap();
            store.del(8).unwrap();
            store.close().unwrap();
        }

        let store = Store::open(tmp.path(), knn_config()).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.cache_entries, 38, "cache must hold exactly the live keys");

        // The reloaded cache serves KNN identically to a fresh write.
        let hits = store.search_knn("text 13", 1).unwrap();
        assert_eq!(hits[0].0, 13);
    }

    #[test]
    fn hnsw_survives_restart_and_skips_deleted() {
        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(tmp.path(), knn_config()).unwrap();
            for key in 0..50u64 {
                store
                    .put(key, format!("snapshot doc {key}").into_bytes())
                    .unwrap();
            }
            store.del(25).unwrap();
            store.close().unwrap();
        }

        let store = Store::open(tmp.path(), knn_config()).unwrap();
        assert_eq!(store.stats().unwrap().hnsw_nodes, 50);

        let hits = store.search_knn_hnsw("snapshot doc 25", 5).unwrap();
        assert!(hits.iter().all(|(k, _)| *k != 25));
    }

    #[test]
    fn timestamp_counter_resumes_from_disk() {
        let tmp = TempDir::new().unwrap();
        {
            let store = store_with_keys(tmp.path(), 100);
            store.close().unwrap();
        }
        let max_before: u64 = {
            let store = Store::open(tmp.path(), small_table_config()).unwrap();
            let max = store
                .stats()
                .unwrap()
                .levels
                .iter()
                .flatten()
                .map(|t| t.time)
                .max()
                .unwrap();

            // New writes must seal tables with strictly newer timestamps.
            for key in 200..300u64 {
                store.put(key, format!("v{key}").into_bytes()).unwrap();
            }
            store.close().unwrap();
            max
        };

        let store = Store::open(tmp.path(), small_table_config()).unwrap();
        let max_after = store
            .stats()
            .unwrap()
            .levels
            .iter()
            .flatten()
            .map(|t| t.time)
            .max()
            .unwrap();
        assert!(max_after > max_before);

        // Overwrites from the second session must win over the first.
        for key in 200..300u64 {
            assert_eq!(store.get(key).unwrap(), Some(format!("v{key}").into_bytes()));
        }
    }

    #[test]
    fn close_flushes_pending_memtable() {
        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(tmp.path(), memtable_only_config()).unwrap();
            store.put(1, b"buffered".to_vec()).unwrap();
            assert_eq!(table_count(&store), 0);
            store.close().unwrap();
        }

        let store = Store::open(tmp.path(), memtable_only_config()).unwrap();
        assert!(table_count(&store) > 0, "close must have sealed a table");
        assert_eq!(store.get(1).unwrap(), Some(b"buffered".to_vec()));
    }

    #[test]
    fn reset_erases_everything() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_keys(tmp.path(), 80);
        store.close().unwrap();

        store.reset().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.memtable_entries, 0);
        assert_eq!(stats.cache_entries, 0);
        assert_eq!(stats.hnsw_nodes, 0);
        assert!(stats.levels.is_empty());
        assert_eq!(store.get(5).unwrap(), None);
        assert!(store.scan(0, u64::MAX).unwrap().is_empty());

        // Nothing lingers on disk either.
        assert!(!tmp.path().join("level-0").exists());
        assert!(!tmp.path().join("embedding.bin").exists());
        assert!(!tmp.path().join("hnsw").exists());
    }

    #[test]
    fn store_is_usable_after_reset() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_keys(tmp.path(), 50);
        store.reset().unwrap();

        store.put(1, b"fresh".to_vec()).unwrap();
        assert_eq!(store.get(1).unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(store.scan(0, 10).unwrap().len(), 1);
    }
}
