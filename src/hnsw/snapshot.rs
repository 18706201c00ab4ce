//! HNSW snapshot — persistence for the graph structure.
//!
//! # On-disk layout (under `<root>/hnsw/`)
//!
//! ```text
//! global_header.bin        M · M_max · efConstruction · m_L ·
//!                          max_level · node_count · dim   (7 × u32 LE)
//! deleted_notes.bin        [(id: u64 LE)(vector: dim × f32 LE)]*
//! nodes/<id>/header.bin    (max_level: u32 LE)(key: u64 LE)
//! nodes/<id>/edges/<ℓ>.bin (count: u32 LE)(neighbor key: u64 LE)*
//! ```
//!
//! Edges are persisted as neighbor **keys**, not arena ids; load maps
//! them back through the rebuilt `key → id` table. Vectors are not part
//! of the snapshot — they attach from the vector cache (reloaded from the
//! embedding log first), keyed by each node's LSM key. A node whose key
//! has no cached vector is logically dead and is marked deleted.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
};

use thiserror::Error;
use tracing::{info, warn};

use super::{Hnsw, HnswParams, Node};
use crate::encoding::{Decode, Encode, EncodingError, MAX_SEQ_ITEMS};
use crate::vector::VectorCache;

/// Directory name of the snapshot under the data root.
pub const HNSW_DIR: &str = "hnsw";

const GLOBAL_HEADER: &str = "global_header.bin";
const DELETED_NOTES: &str = "deleted_notes.bin";
const NODES_DIR: &str = "nodes";
const EDGES_DIR: &str = "edges";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors from writing or reading a graph snapshot.
#[derive(Debug, Error)]
pub enum HnswError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Missing node files, unknown neighbor keys, or a dimension that
    /// disagrees with the store. Fatal at startup.
    #[error("Corrupt HNSW snapshot: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// Global header
// ------------------------------------------------------------------------------------------------

struct GlobalHeader {
    m: u32,
    m_max: u32,
    ef_construction: u32,
    m_l: u32,
    max_level: u32,
    node_count: u32,
    dim: u32,
}

impl GlobalHeader {
    const BYTES: usize = 28;

    fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(Self::BYTES);
        self.m.encode_to(&mut buf)?;
        self.m_max.encode_to(&mut buf)?;
        self.ef_construction.encode_to(&mut buf)?;
        self.m_l.encode_to(&mut buf)?;
        self.max_level.encode_to(&mut buf)?;
        self.node_count.encode_to(&mut buf)?;
        self.dim.encode_to(&mut buf)?;
        Ok(buf)
    }

    fn decode(buf: &[u8]) -> Result<Self, EncodingError> {
        let mut off = 0;
        let (m, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (m_max, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (ef_construction, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (m_l, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (max_level, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (node_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (dim, _) = u32::decode_from(&buf[off..])?;
        Ok(Self {
            m,
            m_max,
            ef_construction,
            m_l,
            max_level,
            node_count,
            dim,
        })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), HnswError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, HnswError> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

// ------------------------------------------------------------------------------------------------
// Save
// ------------------------------------------------------------------------------------------------

/// Writes a full snapshot of `graph` under `<root>/hnsw/`.
pub fn save(root: &Path, graph: &Hnsw, dim: usize) -> Result<(), HnswError> {
    let snap_root = root.join(HNSW_DIR);
    fs::create_dir_all(snap_root.join(NODES_DIR))?;

    // Tombstone record.
    let mut deleted_buf = Vec::new();
    for (id, vector) in graph.deleted_log() {
        id.encode_to(&mut deleted_buf)?;
        for x in vector {
            x.encode_to(&mut deleted_buf)?;
        }
    }
    write_file(&snap_root.join(DELETED_NOTES), &deleted_buf)?;

    // Per-node headers and edge lists.
    for node in graph.nodes() {
        let node_root = snap_root.join(NODES_DIR).join(node.id.to_string());
        let edges_root = node_root.join(EDGES_DIR);
        fs::create_dir_all(&edges_root)?;

        let mut header_buf = Vec::with_capacity(12);
        (node.max_level as u32).encode_to(&mut header_buf)?;
        node.key.encode_to(&mut header_buf)?;
        write_file(&node_root.join("header.bin"), &header_buf)?;

        for (layer, adjacency) in node.neighbors.iter().enumerate() {
            let mut edge_buf = Vec::with_capacity(4 + 8 * adjacency.len());
            (adjacency.len() as u32).encode_to(&mut edge_buf)?;
            for &neighbor in adjacency {
                graph.nodes()[neighbor as usize].key.encode_to(&mut edge_buf)?;
            }
            write_file(&edges_root.join(format!("{layer}.bin")), &edge_buf)?;
        }
    }

    // Global header last: its presence marks the snapshot as complete.
    let header = GlobalHeader {
        m: graph.params().m,
        m_max: graph.params().m_max,
        ef_construction: graph.params().ef_construction,
        m_l: graph.params().m_l,
        max_level: graph.max_level() as u32,
        node_count: graph.len() as u32,
        dim: dim as u32,
    };
    write_file(&snap_root.join(GLOBAL_HEADER), &header.encode()?)?;

    info!(
        nodes = graph.len(),
        max_level = graph.max_level(),
        deleted = graph.deleted_log().len(),
        "saved hnsw snapshot"
    );
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Load
// ------------------------------------------------------------------------------------------------

/// Loads the snapshot under `<root>/hnsw/`, attaching vectors from the
/// already-reconstituted `cache`.
///
/// Returns `Ok(None)` when no snapshot exists.
pub fn load(
    root: &Path,
    cache: &VectorCache,
    dim: usize,
) -> Result<Option<Hnsw>, HnswError> {
    let snap_root = root.join(HNSW_DIR);
    let header_path = snap_root.join(GLOBAL_HEADER);
    if !header_path.exists() {
        return Ok(None);
    }

    let raw = read_file(&header_path)?;
    if raw.len() < GlobalHeader::BYTES {
        return Err(HnswError::Corruption("global header truncated".into()));
    }
    let header = GlobalHeader::decode(&raw)?;

    if header.dim as usize != dim {
        return Err(HnswError::Corruption(format!(
            "snapshot has dimension {}, store expects {dim}",
            header.dim
        )));
    }

    if header.node_count > MAX_SEQ_ITEMS {
        return Err(HnswError::Corruption(format!(
            "global header claims {} nodes, more than the {MAX_SEQ_ITEMS} the loader accepts",
            header.node_count
        )));
    }

    let params = HnswParams {
        m: header.m,
        m_max: header.m_max,
        ef_construction: header.ef_construction,
        m_l: header.m_l,
    };

    // Pass 1: node headers, building the key → id table.
    let node_count = header.node_count as usize;
    let mut nodes = Vec::with_capacity(node_count);
    let mut key_to_id = std::collections::HashMap::with_capacity(node_count);

    for id in 0..node_count {
        let node_root = snap_root.join(NODES_DIR).join(id.to_string());
        let raw = read_file(&node_root.join("header.bin")).map_err(|_| {
            HnswError::Corruption(format!("node {id} named in global header has no header.bin"))
        })?;
        let (max_level, n) = u32::decode_from(&raw)?;
        let (key, _) = u64::decode_from(&raw[n..])?;
        let max_level = max_level as usize;

        key_to_id.insert(key, id as u32);
        nodes.push(Node {
            key,
            id: id as u32,
            vector: Vec::new(),
            max_level,
            deleted: false,
            neighbors: vec![Vec::new(); max_level + 1],
        });
    }

    // Pass 2: edge lists, mapping persisted keys back to arena ids.
    for id in 0..node_count {
        let edges_root = snap_root.join(NODES_DIR).join(id.to_string()).join(EDGES_DIR);
        let levels = nodes[id].max_level + 1;
        for layer in 0..levels {
            let raw = read_file(&edges_root.join(format!("{layer}.bin"))).map_err(|_| {
                HnswError::Corruption(format!("node {id} is missing its layer-{layer} edge file"))
            })?;
            let (count, mut off) = u32::decode_from(&raw)?;
            let count = count as usize;
            // The claimed count must fit in the bytes actually present.
            if raw.len().saturating_sub(off) / 8 < count {
                return Err(HnswError::Corruption(format!(
                    "node {id} layer {layer} claims {count} edges but holds only {} bytes of them",
                    raw.len().saturating_sub(off)
                )));
            }
            let mut adjacency = Vec::with_capacity(count);
            for _ in 0..count {
                let (neighbor_key, n) = u64::decode_from(&raw[off..])?;
                off += n;
                let neighbor_id = key_to_id.get(&neighbor_key).ok_or_else(|| {
                    HnswError::Corruption(format!(
                        "node {id} layer {layer} references unknown key {neighbor_key}"
                    ))
                })?;
                adjacency.push(*neighbor_id);
            }
            nodes[id].neighbors[layer] = adjacency;
        }
    }

    // Attach vectors from the cache; keys with no live vector are dead.
    let mut orphans = 0usize;
    for node in &mut nodes {
        match cache.get(node.key) {
            Some(vector) => node.vector = vector.clone(),
            None => {
                node.deleted = true;
                orphans += 1;
            }
        }
    }
    if orphans > 0 {
        warn!(orphans, "snapshot nodes without cached vectors marked deleted");
    }

    // Tombstone record.
    let mut deleted_log = Vec::new();
    let deleted_path = snap_root.join(DELETED_NOTES);
    if deleted_path.exists() {
        let raw = read_file(&deleted_path)?;
        let block = 8 + 4 * dim;
        if raw.len() % block != 0 {
            return Err(HnswError::Corruption(format!(
                "deleted-notes file of {} bytes is not a multiple of the {block}-byte entry size",
                raw.len()
            )));
        }
        for chunk in raw.chunks_exact(block) {
            let (id, mut off) = u64::decode_from(chunk)?;
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                let (x, n) = f32::decode_from(&chunk[off..])?;
                off += n;
                vector.push(x);
            }
            if let Some(node) = nodes.get_mut(id as usize) {
                node.deleted = true;
            }
            deleted_log.push((id, vector));
        }
    }

    info!(
        nodes = nodes.len(),
        max_level = header.max_level,
        deleted = deleted_log.len(),
        "loaded hnsw snapshot"
    );

    Ok(Some(Hnsw::from_parts(
        params,
        nodes,
        deleted_log,
        header.max_level as usize,
    )))
}
