//! Vector-cache liveness and dirty-set tests.

#[cfg(test)]
mod tests {
    use crate::vector::VectorCache;

    #[test]
    fn insert_get_remove() {
        let mut cache = VectorCache::new();
        cache.insert(1, vec![1.0, 2.0]);

        assert!(cache.contains(1));
        assert_eq!(cache.get(1), Some(&vec![1.0, 2.0]));

        assert_eq!(cache.remove(1), Some(vec![1.0, 2.0]));
        assert!(!cache.contains(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_overwrites() {
        let mut cache = VectorCache::new();
        cache.insert(1, vec![1.0]);
        cache.insert(1, vec![2.0]);
        assert_eq!(cache.get(1), Some(&vec![2.0]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mutations_mark_dirty() {
        let mut cache = VectorCache::new();
        assert!(!cache.has_dirty());

        cache.insert(1, vec![1.0]);
        cache.insert(2, vec![2.0]);
        cache.remove(1);

        let mut dirty: Vec<u64> = cache.dirty_keys().collect();
        dirty.sort_unstable();
        assert_eq!(dirty, vec![1, 2]);
    }

    #[test]
    fn removing_absent_key_is_not_dirty() {
        let mut cache = VectorCache::new();
        assert_eq!(cache.remove(99), None);
        assert!(!cache.has_dirty());
    }

    #[test]
    fn clear_dirty_keeps_entries() {
        let mut cache = VectorCache::new();
        cache.insert(1, vec![1.0]);
        cache.clear_dirty();

        assert!(!cache.has_dirty());
        assert!(cache.contains(1));
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = VectorCache::new();
        cache.insert(1, vec![1.0]);
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.has_dirty());
    }
}
