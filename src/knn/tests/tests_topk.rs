//! Exactness, determinism, and serial/parallel agreement tests.

#[cfg(test)]
mod tests {
    use crate::knn::{ScoredKey, TopK, top_k_parallel, top_k_serial};
    use crate::vector::cosine_similarity;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    const DIM: usize = 8;

    fn random_vectors(count: usize, seed: u64) -> Vec<(u64, Vec<f32>)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                let v: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
                (i as u64, v)
            })
            .collect()
    }

    /// Reference implementation: rank everything, take k.
    fn exact_top_k(entries: &[(u64, Vec<f32>)], query: &[f32], k: usize) -> Vec<u64> {
        let mut scored: Vec<ScoredKey> = entries
            .iter()
            .map(|(key, v)| ScoredKey {
                key: *key,
                sim: cosine_similarity(v, query),
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.into_iter().take(k).map(|s| s.key).collect()
    }

    #[test]
    fn heap_selection_equals_full_sort() {
        let entries = random_vectors(500, 3);
        let query: Vec<f32> = vec![0.3; DIM];

        let expected = exact_top_k(&entries, &query, 10);
        let got: Vec<u64> =
            top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &query, 10)
                .into_iter()
                .map(|s| s.key)
                .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn ties_break_toward_smaller_key() {
        // Three identical vectors: similarity ties across keys 5, 2, 9.
        let v = vec![1.0f32; DIM];
        let entries = vec![(5u64, v.clone()), (2, v.clone()), (9, v.clone())];

        let got: Vec<u64> = top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &v, 2)
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(got, vec![2, 5]);
    }

    #[test]
    fn k_larger_than_population() {
        let entries = random_vectors(5, 1);
        let query = vec![1.0f32; DIM];
        let got = top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &query, 50);
        assert_eq!(got.len(), 5);
    }

    #[test]
    fn k_zero_is_empty() {
        let entries = random_vectors(5, 1);
        let query = vec![1.0f32; DIM];
        assert!(top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &query, 0).is_empty());

        let refs: Vec<(u64, &Vec<f32>)> = entries.iter().map(|(k, v)| (*k, v)).collect();
        assert!(top_k_parallel(&refs, &query, 0, 4).unwrap().is_empty());
    }

    #[test]
    fn parallel_equals_serial_across_thread_counts() {
        let entries = random_vectors(2000, 7);
        let refs: Vec<(u64, &Vec<f32>)> = entries.iter().map(|(k, v)| (*k, v)).collect();

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let query: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
            let serial: Vec<u64> =
                top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &query, 5)
                    .into_iter()
                    .map(|s| s.key)
                    .collect();

            for threads in [1, 2, 4, 7] {
                let parallel: Vec<u64> = top_k_parallel(&refs, &query, 5, threads)
                    .unwrap()
                    .into_iter()
                    .map(|s| s.key)
                    .collect();
                assert_eq!(parallel, serial, "threads = {threads}");
            }
        }
    }

    #[test]
    fn parallel_with_more_threads_than_entries() {
        let entries = random_vectors(3, 5);
        let refs: Vec<(u64, &Vec<f32>)> = entries.iter().map(|(k, v)| (*k, v)).collect();
        let query = vec![0.5f32; DIM];

        let got = top_k_parallel(&refs, &query, 2, 64).unwrap();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn incompatible_vectors_always_lose() {
        let good = vec![1.0f32; DIM];
        let zero = vec![0.0f32; DIM];
        let entries = vec![(1u64, zero), (2, good.clone())];

        let got: Vec<u64> = top_k_serial(entries.iter().map(|(k, v)| (*k, v)), &good, 1)
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(got, vec![2]);
    }

    #[test]
    fn topk_push_and_merge_agree() {
        let entries = random_vectors(100, 9);
        let query = vec![0.1f32; DIM];

        let mut pushed = TopK::new(7);
        for (key, v) in &entries {
            pushed.push(ScoredKey {
                key: *key,
                sim: cosine_similarity(v, &query),
            });
        }

        let mut merged = TopK::new(7);
        for chunk in entries.chunks(13) {
            let local = top_k_serial(chunk.iter().map(|(k, v)| (*k, v)), &query, 7);
            merged.merge(local);
        }

        let a: Vec<u64> = pushed.into_descending().into_iter().map(|s| s.key).collect();
        let b: Vec<u64> = merged.into_descending().into_iter().map(|s| s.key).collect();
        assert_eq!(a, b);
    }
}
