//! # HNSW Index Module
//!
//! An incremental **Hierarchical Navigable Small World** graph over the
//! store's embedding vectors, supporting insertion, tombstoned deletion,
//! and layered greedy search.
//!
//! ## Design Overview
//!
//! Nodes live in a flat arena (`Vec<Node>`) indexed by a dense id
//! assigned at first insertion; per-layer adjacency is a `Vec<Vec<u32>>`
//! of ids on each node, so the deeply cyclic graph needs no owning
//! pointers. A `key → id` map bridges from LSM keys to the arena.
//!
//! Each node draws a level from a geometric-like distribution (advance
//! one level with probability `1/M`, capped below `M_max`). Search
//! descends from the single entry point through the upper layers with a
//! greedy walk, then runs a bounded best-first expansion on layer 0.
//!
//! ## Design Invariants
//!
//! - Edges are **undirected**: whenever `a` lists `b` at layer ℓ, `b`
//!   lists `a` at layer ℓ. Pruning an over-full adjacency removes the
//!   reverse edges of the dropped neighbors, so symmetry survives.
//! - Per-layer adjacency never exceeds `M_max` entries.
//! - There is at most one entry point, and it resides on the graph's
//!   top layer.
//! - Deletion only sets the tombstone flag; edges stay in place and the
//!   node keeps routing traffic. Deleted nodes are filtered from results.
//!
//! ## Similarity
//!
//! Cosine, via [`crate::vector::cosine_similarity`]; incompatible pairs
//! (zero norm, length mismatch) compare as `-∞` and therefore lose every
//! ranking.

pub mod snapshot;


use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use rand::Rng;

use crate::vector::cosine_similarity;

// ------------------------------------------------------------------------------------------------
// Parameters
// ------------------------------------------------------------------------------------------------

/// Tuning parameters for the HNSW graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Target out-degree when connecting a freshly inserted node.
    pub m: u32,

    /// Hard cap on adjacency size per layer; also the exclusive upper
    /// bound of the level distribution.
    pub m_max: u32,

    /// Candidate-pool size during construction and search.
    pub ef_construction: u32,

    /// Level-distribution normalization parameter (persisted in the
    /// snapshot header).
    pub m_l: u32,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 8,
            m_max: 16,
            ef_construction: 25,
            m_l: 9,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Node
// ------------------------------------------------------------------------------------------------

/// One graph node: an LSM key, its embedding, and per-layer adjacency.
#[derive(Debug, Clone)]
pub struct Node {
    /// The LSM key this node indexes.
    pub key: u64,

    /// Dense arena id, assigned from 0 at first insertion.
    pub id: u32,

    /// The embedding vector.
    pub vector: Vec<f32>,

    /// Highest layer this node participates in.
    pub max_level: usize,

    /// Tombstone flag; set by delete, never cleared by it.
    pub deleted: bool,

    /// Adjacency lists, one per layer `0..=max_level`, holding node ids.
    pub neighbors: Vec<Vec<u32>>,
}

// ------------------------------------------------------------------------------------------------
// Candidate — float-ordered heap entry
// ------------------------------------------------------------------------------------------------

/// A `(similarity, id)` pair ordered by similarity (total order on f32).
#[derive(Debug, Clone, Copy)]
struct Candidate {
    sim: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.sim.total_cmp(&other.sim).is_eq() && self.id == other.id
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ties broken by id so the ordering is deterministic.
        self.sim
            .total_cmp(&other.sim)
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ------------------------------------------------------------------------------------------------
// Hnsw
// ------------------------------------------------------------------------------------------------

/// The in-memory HNSW graph.
pub struct Hnsw {
    params: HnswParams,

    /// Flat arena of nodes, indexed by dense id.
    nodes: Vec<Node>,

    /// LSM key → arena id.
    key_to_id: HashMap<u64, u32>,

    /// Arena id of the single entry point, if the graph is non-empty.
    entry_point: Option<u32>,

    /// Highest populated layer.
    max_level: usize,

    /// Tombstoned nodes, recorded as `(id, vector)` for the snapshot.
    deleted_log: Vec<(u64, Vec<f32>)>,
}

impl Hnsw {
    /// Creates an empty graph with the given parameters.
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            key_to_id: HashMap::new(),
            entry_point: None,
            max_level: 0,
            deleted_log: Vec::new(),
        }
    }

    /// The graph parameters.
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Number of nodes ever inserted (tombstoned nodes included).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Highest populated layer.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Entry-point id, if any.
    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    /// Borrowed node arena.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Arena id for a key.
    pub fn id_of(&self, key: u64) -> Option<u32> {
        self.key_to_id.get(&key).copied()
    }

    /// The tombstone record accumulated since the graph was built.
    pub fn deleted_log(&self) -> &[(u64, Vec<f32>)] {
        &self.deleted_log
    }

    /// Draws a level in `[0, M_max)`: advance one level with probability
    /// `1/M` per coin flip.
    fn rand_level(&self) -> usize {
        let mut rng = rand::rng();
        let advance = 1.0 / self.params.m as f64;
        let mut level = 0usize;
        while level + 1 < self.params.m_max as usize && rng.random::<f64>() < advance {
            level += 1;
        }
        level
    }

    // --------------------------------------------------------------------------------------------
    // Insertion
    // --------------------------------------------------------------------------------------------

    /// Inserts `(key, vector)` into the graph.
    ///
    /// Re-inserting an existing key replaces its vector in place and
    /// clears a tombstone if one was set; the node keeps its edges.
    pub fn insert(&mut self, key: u64, vector: Vec<f32>) {
        if let Some(&id) = self.key_to_id.get(&key) {
            let node = &mut self.nodes[id as usize];
            node.vector = vector;
            node.deleted = false;
            return;
        }

        let id = self.nodes.len() as u32;

        // The very first node becomes the entry point on layer 0.
        if self.nodes.is_empty() {
            self.nodes.push(Node {
                key,
                id,
                vector,
                max_level: 0,
                deleted: false,
                neighbors: vec![Vec::new()],
            });
            self.key_to_id.insert(key, id);
            self.entry_point = Some(id);
            self.max_level = 0;
            return;
        }

        let level = self.rand_level();
        self.nodes.push(Node {
            key,
            id,
            vector: vector.clone(),
            max_level: level,
            deleted: false,
            neighbors: vec![Vec::new(); level + 1],
        });
        self.key_to_id.insert(key, id);

        // Descend from the current entry point to the insertion level,
        // carrying the most similar node found on each layer.
        let mut entry = self
            .entry_point
            .unwrap_or(0);
        let top = self.max_level;
        for layer in ((level + 1)..=top).rev() {
            entry = self.greedy_pass(&vector, entry, layer);
        }

        // Gather candidates and connect, layer by layer.
        let ef = self.params.ef_construction as usize;
        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(&vector, entry, layer, ef);

            let m = self.params.m as usize;
            let chosen: Vec<u32> = candidates
                .iter()
                .filter(|c| c.id != id && self.nodes[c.id as usize].max_level >= layer)
                .take(m)
                .map(|c| c.id)
                .collect();

            for neighbor in chosen {
                self.link(id, neighbor, layer);
            }

            if let Some(best) = candidates.first() {
                entry = best.id;
            }
        }

        // A node drawn above the old top layer becomes the new entry point.
        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
    }

    /// Adds the undirected edge `a — b` on `layer`, pruning either side
    /// back to `M_max` if it overflows.
    fn link(&mut self, a: u32, b: u32, layer: usize) {
        if a == b {
            return;
        }
        if !self.nodes[a as usize].neighbors[layer].contains(&b) {
            self.nodes[a as usize].neighbors[layer].push(b);
        }
        if !self.nodes[b as usize].neighbors[layer].contains(&a) {
            self.nodes[b as usize].neighbors[layer].push(a);
        }
        self.prune(a, layer);
        self.prune(b, layer);
    }

    /// Shrinks `node`'s adjacency on `layer` to the `M_max` most similar
    /// neighbors, removing the reverse edge of every dropped neighbor so
    /// the graph stays undirected.
    fn prune(&mut self, node: u32, layer: usize) {
        let m_max = self.params.m_max as usize;
        if self.nodes[node as usize].neighbors[layer].len() <= m_max {
            return;
        }

        let base = self.nodes[node as usize].vector.clone();
        let mut ranked: Vec<Candidate> = self.nodes[node as usize].neighbors[layer]
            .iter()
            .map(|&n| Candidate {
                sim: cosine_similarity(&base, &self.nodes[n as usize].vector),
                id: n,
            })
            .collect();
        ranked.sort_by(|a, b| b.cmp(a));

        let kept: Vec<u32> = ranked.iter().take(m_max).map(|c| c.id).collect();
        for dropped in ranked.iter().skip(m_max) {
            self.nodes[dropped.id as usize].neighbors[layer].retain(|&n| n != node);
        }
        self.nodes[node as usize].neighbors[layer] = kept;
    }

    // --------------------------------------------------------------------------------------------
    // Search primitives
    // --------------------------------------------------------------------------------------------

    /// Exhaustive greedy walk on one layer: expand every reachable
    /// neighbor, return the most similar node found (or the entry itself).
    fn greedy_pass(&self, query: &[f32], entry: u32, layer: usize) -> u32 {
        let mut best = entry;
        let mut best_sim = cosine_similarity(query, &self.nodes[entry as usize].vector);

        let mut visited: HashSet<u32> = HashSet::from([entry]);
        let mut frontier: VecDeque<u32> = VecDeque::from([entry]);

        while let Some(current) = frontier.pop_front() {
            let node = &self.nodes[current as usize];
            if node.max_level < layer {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if visited.insert(neighbor) {
                    frontier.push_back(neighbor);
                    let sim = cosine_similarity(query, &self.nodes[neighbor as usize].vector);
                    if sim > best_sim {
                        best_sim = sim;
                        best = neighbor;
                    }
                }
            }
        }
        best
    }

    /// Bounded best-first expansion on one layer.
    ///
    /// Keeps at most `ef` result candidates; expansion stops when the
    /// most similar unexpanded candidate is worse than the worst kept
    /// result. Returns candidates sorted by similarity descending.
    fn search_layer(&self, query: &[f32], entry: u32, layer: usize, ef: usize) -> Vec<Candidate> {
        let entry_sim = cosine_similarity(query, &self.nodes[entry as usize].vector);

        let mut visited: HashSet<u32> = HashSet::from([entry]);
        // Max-heap of unexpanded candidates.
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::from([Candidate {
            sim: entry_sim,
            id: entry,
        }]);
        // Min-heap (via Reverse) of the best `ef` results so far.
        let mut results: BinaryHeap<Reverse<Candidate>> =
            BinaryHeap::from([Reverse(Candidate {
                sim: entry_sim,
                id: entry,
            })]);

        while let Some(current) = frontier.pop() {
            if results.len() >= ef {
                if let Some(Reverse(worst)) = results.peek() {
                    if current.sim < worst.sim {
                        break;
                    }
                }
            }

            let node = &self.nodes[current.id as usize];
            if node.max_level < layer {
                continue;
            }

            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let sim = cosine_similarity(query, &self.nodes[neighbor as usize].vector);
                let candidate = Candidate { sim, id: neighbor };

                let admit = results.len() < ef
                    || results
                        .peek()
                        .is_some_and(|Reverse(worst)| sim > worst.sim);
                if admit {
                    frontier.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    // --------------------------------------------------------------------------------------------
    // Query
    // --------------------------------------------------------------------------------------------

    /// Returns up to `k` keys of undeleted nodes most similar to `query`,
    /// paired with their cosine similarity, ordered descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let ef = self.params.ef_construction as usize;

        // Greedy descent through the upper layers.
        for layer in (1..=self.max_level).rev() {
            if let Some(best) = self.search_layer(query, entry, layer, ef).first() {
                entry = best.id;
            }
        }

        // Detailed expansion on layer 0 with ef widened to at least k.
        let ef0 = ef.max(k);
        self.search_layer(query, entry, 0, ef0)
            .into_iter()
            .filter(|c| !self.nodes[c.id as usize].deleted)
            .take(k)
            .map(|c| (self.nodes[c.id as usize].key, c.sim))
            .collect()
    }

    // --------------------------------------------------------------------------------------------
    // Deletion
    // --------------------------------------------------------------------------------------------

    /// Tombstones the node for `key`. Edges are left untouched; the node
    /// is merely skipped in query results. Returns whether a live node
    /// was found.
    pub fn mark_deleted(&mut self, key: u64) -> bool {
        let Some(&id) = self.key_to_id.get(&key) else {
            return false;
        };
        let node = &mut self.nodes[id as usize];
        if node.deleted {
            return false;
        }
        node.deleted = true;
        let vector = node.vector.clone();
        self.deleted_log.push((id as u64, vector));
        true
    }

    /// Drops the whole graph, keeping the parameters.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.key_to_id.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.deleted_log.clear();
    }

    // --------------------------------------------------------------------------------------------
    // Snapshot support
    // --------------------------------------------------------------------------------------------

    /// Rebuilds a graph from snapshot parts: the arena (with vectors
    /// already attached), the recorded tombstones, and the persisted top
    /// layer. Used by [`snapshot::load`].
    pub(crate) fn from_parts(
        params: HnswParams,
        nodes: Vec<Node>,
        deleted_log: Vec<(u64, Vec<f32>)>,
        max_level: usize,
    ) -> Self {
        let key_to_id = nodes.iter().map(|n| (n.key, n.id)).collect();
        // The entry point is any node residing on the top layer.
        let entry_point = nodes
            .iter()
            .find(|n| n.max_level == max_level)
            .map(|n| n.id)
            .or_else(|| nodes.first().map(|n| n.id));

        Self {
            params,
            nodes,
            key_to_id,
            entry_point,
            max_level,
            deleted_log,
        }
    }
}
