//! Cosine similarity and embedder determinism tests.

#[cfg(test)]
mod tests {
    use crate::vector::{Embedder, HashingEmbedder, cosine_similarity};

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![0.5f32, -0.25, 0.8];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_similarity_minus_one() {
        let a = vec![1.0f32, 2.0, -3.0];
        let b = vec![-1.0f32, -2.0, 3.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn scaling_does_not_change_similarity() {
        let a = vec![1.0f32, 2.0, 3.0];
        let b: Vec<f32> = a.iter().map(|x| x * 42.0).collect();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_is_incompatible() {
        let zero = vec![0.0f32; 4];
        let v = vec![1.0f32, 0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&zero, &v), f32::NEG_INFINITY);
        assert_eq!(cosine_similarity(&v, &zero), f32::NEG_INFINITY);
    }

    #[test]
    fn length_mismatch_is_incompatible() {
        let a = vec![1.0f32, 2.0];
        let b = vec![1.0f32, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), f32::NEG_INFINITY);
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("the quick brown fox");
        let b = embedder.embed("the quick brown fox");
        assert_eq!(a, b);
    }

    #[test]
    fn embedder_output_is_unit_length() {
        let embedder = HashingEmbedder::new(64);
        for text in ["hello", "a longer piece of text with many words", "x"] {
            let v = embedder.embed(text);
            assert_eq!(v.len(), 64);
            let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((n - 1.0).abs() < 1e-5, "norm {n} for {text:?}");
        }
    }

    #[test]
    fn shared_tokens_correlate_more_than_disjoint_ones() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder.embed("storage engine compaction merge");
        let near = embedder.embed("storage engine compaction levels");
        let far = embedder.embed("completely unrelated gibberish zzz");

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn empty_text_still_embeds_nonzero() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("");
        assert!(v.iter().any(|x| *x != 0.0));
    }
}
