//! Append-only embedding log — durability for the vector cache.
//!
//! # On-disk layout (`embedding.bin` under the data root)
//!
//! ```text
//! [dim: u64 LE]
//! [entry]*       entry = [key: u64 LE][vector: dim × f32 LE]
//! ```
//!
//! A vector whose components are all `f32::MAX` is a **tombstone**: the
//! key was deleted. The log is only ever appended to, so the same key can
//! occur many times; on load, entries are scanned **in reverse** and the
//! first occurrence of each key wins (last write wins).
//!
//! # Save strategy
//!
//! - Log already exists → append one entry per dirty key: the cached
//!   vector if the key is live, a tombstone otherwise.
//! - No log yet → write a fresh full dump of the cache.
//!
//! Either way the dirty set is cleared on success.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::Path,
};

use thiserror::Error;
use tracing::{debug, info};

use super::VectorCache;
use crate::encoding::{Decode, Encode, EncodingError};

/// File name of the embedding log under the data root.
pub const EMBEDDING_LOG: &str = "embedding.bin";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors from reading or writing the embedding log.
#[derive(Debug, Error)]
pub enum VectorLogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Truncated file or dimension disagreement. Fatal at startup.
    #[error("Corrupt embedding log: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Bytes occupied by one log entry at dimension `dim`.
fn entry_bytes(dim: usize) -> usize {
    8 + 4 * dim
}

fn encode_entry(buf: &mut Vec<u8>, key: u64, vector: &[f32]) -> Result<(), EncodingError> {
    key.encode_to(buf)?;
    for x in vector {
        x.encode_to(buf)?;
    }
    Ok(())
}

/// Whether a loaded vector is the deletion sentinel (all `f32::MAX`).
fn is_tombstone(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.to_bits() == f32::MAX.to_bits())
}

// ------------------------------------------------------------------------------------------------
// Save
// ------------------------------------------------------------------------------------------------

/// Persists the cache to `<root>/embedding.bin`.
///
/// Appends dirty entries if the log already exists, otherwise writes a
/// full dump. Clears the cache's dirty set on success.
pub fn save(root: &Path, cache: &mut VectorCache, dim: usize) -> Result<(), VectorLogError> {
    let path = root.join(EMBEDDING_LOG);
    let log_exists = path.exists() && path.metadata()?.len() > 0;

    let mut buf = Vec::new();
    let appended;

    if log_exists {
        for key in cache.dirty_keys() {
            match cache.get(key) {
                Some(vector) => encode_entry(&mut buf, key, vector)?,
                None => {
                    let tombstone = vec![f32::MAX; dim];
                    encode_entry(&mut buf, key, &tombstone)?;
                }
            }
        }
        appended = cache.dirty_keys().count();

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        debug!(entries = appended, "appended dirty keys to embedding log");
    } else {
        (dim as u64).encode_to(&mut buf)?;
        for (key, vector) in cache.iter() {
            encode_entry(&mut buf, *key, vector)?;
        }
        appended = cache.len();

        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        info!(entries = appended, dim, "wrote fresh embedding log");
    }

    cache.clear_dirty();
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Load
// ------------------------------------------------------------------------------------------------

/// Loads `<root>/embedding.bin` into a fresh cache.
///
/// Returns `Ok(None)` when the log does not exist (a fresh store).
/// Entries are replayed newest-first; the first occurrence of each key in
/// the reverse scan is authoritative, and tombstones suppress the key.
///
/// # Errors
///
/// [`VectorLogError::Corruption`] when the file length does not align to
/// whole entries, or when `expected_dim` disagrees with the persisted
/// dimension header.
pub fn load(root: &Path, expected_dim: usize) -> Result<Option<VectorCache>, VectorLogError> {
    let path = root.join(EMBEDDING_LOG);
    if !path.exists() {
        return Ok(None);
    }

    let mut raw = Vec::new();
    File::open(&path)?.read_to_end(&mut raw)?;

    if raw.len() < 8 {
        return Err(VectorLogError::Corruption(
            "embedding log shorter than its dimension header".into(),
        ));
    }

    let (dim, _) = u64::decode_from(&raw)?;
    let dim = dim as usize;
    if dim != expected_dim {
        return Err(VectorLogError::Corruption(format!(
            "embedding log has dimension {dim}, store expects {expected_dim}"
        )));
    }

    let body = &raw[8..];
    let block = entry_bytes(dim);
    if body.len() % block != 0 {
        return Err(VectorLogError::Corruption(format!(
            "embedding log body of {} bytes is not a multiple of the {block}-byte entry size",
            body.len()
        )));
    }

    let entries = body.len() / block;
    let mut cache = VectorCache::new();
    let mut suppressed = std::collections::HashSet::new();

    // Reverse scan: the newest entry for each key decides.
    for i in (0..entries).rev() {
        let chunk = &body[i * block..(i + 1) * block];
        let (key, mut off) = u64::decode_from(chunk)?;

        if cache.contains(key) || suppressed.contains(&key) {
            continue;
        }

        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            let (x, n) = f32::decode_from(&chunk[off..])?;
            off += n;
            vector.push(x);
        }

        if is_tombstone(&vector) {
            suppressed.insert(key);
        } else {
            cache.insert_clean(key, vector);
        }
    }

    info!(
        entries,
        live = cache.len(),
        dim,
        "loaded embedding log"
    );
    Ok(Some(cache))
}
