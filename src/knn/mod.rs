//! # KNN Module
//!
//! Exact top-k selection over the vector cache, in a serial and a
//! map-reduce parallel flavor. The HNSW-accelerated variant lives in the
//! graph itself; this module covers the brute-force paths and the
//! ranking primitives they share.
//!
//! ## Ranking
//!
//! Candidates are ordered by cosine similarity descending; ties break
//! deterministically toward the **smaller key**, so the same query over
//! the same data always yields the same k keys regardless of cache
//! iteration order or thread count.
//!
//! ## Parallel shape
//!
//! Map: the cache entries are split into `P` contiguous chunks
//! (`P` = available hardware parallelism) and each worker reduces its
//! chunk to a local top-k with a size-k min-heap. Workers share the
//! entries slice read-only; no I/O happens in the map phase.
//!
//! Reduce: the local top-k sets merge through one more size-k heap.
//!
//! Value resolution (point reads against the LSM) is the engine's job
//! and happens after the reduce.

#[cfg(test)]
mod tests;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::vector::cosine_similarity;

// ------------------------------------------------------------------------------------------------
// ScoredKey — ranking element
// ------------------------------------------------------------------------------------------------

/// A key with its similarity to the current query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredKey {
    /// The LSM key.
    pub key: u64,

    /// Cosine similarity to the query vector.
    pub sim: f32,
}

impl PartialEq for ScoredKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.sim.total_cmp(&other.sim).is_eq()
    }
}

impl Eq for ScoredKey {}

impl PartialOrd for ScoredKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredKey {
    /// Higher similarity ranks greater; on ties the smaller key ranks
    /// greater, making top-k selection deterministic.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sim
            .total_cmp(&other.sim)
            .then_with(|| other.key.cmp(&self.key))
    }
}

// ------------------------------------------------------------------------------------------------
// TopK — size-k min-heap accumulator
// ------------------------------------------------------------------------------------------------

/// Keeps the `k` greatest [`ScoredKey`]s pushed into it.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<ScoredKey>>,
}

impl TopK {
    /// Creates an accumulator for the best `k` candidates.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offers one candidate.
    pub fn push(&mut self, candidate: ScoredKey) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
        } else if self
            .heap
            .peek()
            .is_some_and(|Reverse(worst)| candidate > *worst)
        {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    /// Offers every candidate from `other`'s result set.
    pub fn merge(&mut self, candidates: impl IntoIterator<Item = ScoredKey>) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    /// Consumes the accumulator, returning candidates best-first.
    pub fn into_descending(self) -> Vec<ScoredKey> {
        let mut out: Vec<ScoredKey> = self.heap.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }
}

// ------------------------------------------------------------------------------------------------
// Serial brute force
// ------------------------------------------------------------------------------------------------

/// Scans every `(key, vector)` entry and returns the exact top-k,
/// best-first.
pub fn top_k_serial<'a>(
    entries: impl Iterator<Item = (u64, &'a Vec<f32>)>,
    query: &[f32],
    k: usize,
) -> Vec<ScoredKey> {
    let mut top = TopK::new(k);
    for (key, vector) in entries {
        top.push(ScoredKey {
            key,
            sim: cosine_similarity(vector, query),
        });
    }
    top.into_descending()
}

// ------------------------------------------------------------------------------------------------
// Parallel map-reduce
// ------------------------------------------------------------------------------------------------

/// Splits `entries` into `threads` contiguous chunks, reduces each to a
/// local top-k on its own scoped thread, and merges the locals into the
/// global top-k.
///
/// Returns `Err` with a description if a worker panicked.
pub fn top_k_parallel(
    entries: &[(u64, &Vec<f32>)],
    query: &[f32],
    k: usize,
    threads: usize,
) -> Result<Vec<ScoredKey>, String> {
    if entries.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let threads = threads.max(1).min(entries.len());
    let chunk_len = entries.len().div_ceil(threads);

    let locals = crossbeam::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for chunk in entries.chunks(chunk_len) {
            handles.push(scope.spawn(move |_| {
                let mut top = TopK::new(k);
                for (key, vector) in chunk {
                    top.push(ScoredKey {
                        key: *key,
                        sim: cosine_similarity(vector, query),
                    });
                }
                top.into_descending()
            }));
        }

        let mut locals = Vec::with_capacity(handles.len());
        for handle in handles {
            locals.push(
                handle
                    .join()
                    .map_err(|_| "knn map task panicked".to_string())?,
            );
        }
        Ok::<_, String>(locals)
    })
    .map_err(|_| "knn scope panicked".to_string())??;

    let mut global = TopK::new(k);
    for local in locals {
        global.merge(local);
    }
    Ok(global.into_descending())
}
