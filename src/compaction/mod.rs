//! # Compaction Module
//!
//! Tiered compaction for the level list: whenever a level holds strictly
//! more than `2^(l+1)` tables it is **overfull**, and one round of
//! compaction pushes part of it down into the next level. Rounds repeat
//! until no level is overfull.
//!
//! ## One round, level `l`
//!
//! 1. **Select victims.** At level 0, every table (their ranges overlap
//!    anyway). At level ≥ 1, the `count − 2^(l+1)` oldest tables,
//!    ordered by `(timestamp ↑, min_key ↑)`.
//! 2. **Pull in overlap.** Every table at level `l+1` whose key range
//!    intersects the span of the victims joins the merge.
//! 3. **Merge.** A k-way heap ordered by `(key ↑, level ↑, timestamp ↓)`
//!    pops the winning copy of each key first: a lower source level
//!    beats a higher one, and within a level the larger timestamp wins —
//!    "later write wins while flowing down".
//! 4. **Repack.** The merged stream packs into fresh tables at level
//!    `l+1`, cutting a new one whenever appending the next record would
//!    push the file past the flush limit. Each output gets a fresh
//!    timestamp.
//! 5. **Cleanup.** Victim files (and consumed overlap files) are removed
//!    from the level list and unlinked.
//!
//! ## Tombstones
//!
//! Tombstones are preserved through the merge — data they shadow may
//! still live in deeper levels. They are dropped only when the output
//! level is the deepest populated level, at which point nothing below
//! can resurrect.
//!
//! ## Invariants after quiescence
//!
//! - No level holds more than `2^(l+1)` tables (except possibly the
//!   deepest, transiently, until its own round runs — the loop keeps
//!   going until none is overfull).
//! - Key ranges at every level ≥ 1 are pairwise disjoint: each round
//!   merges the victims with **all** intersecting tables below, so the
//!   outputs cannot overlap anything left at the target level.


use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{DEL_MARKER, StoreError, StoreInner};
use crate::sstable::{Table, TableBuilder};

// ------------------------------------------------------------------------------------------------
// Level budget
// ------------------------------------------------------------------------------------------------

/// Maximum number of tables level `l` may hold: `2^(l+1)`.
pub fn capacity(level: usize) -> usize {
    1usize << (level + 1)
}

/// Lowest overfull level, if any.
fn first_overfull(inner: &StoreInner) -> Option<usize> {
    inner
        .levels
        .iter()
        .enumerate()
        .find(|(level, tables)| tables.len() > capacity(*level))
        .map(|(level, _)| level)
}

// ------------------------------------------------------------------------------------------------
// Merge cursor — one source table with its level
// ------------------------------------------------------------------------------------------------

struct Cursor {
    table: Arc<Table>,
    level: usize,
    pos: usize,
}

struct HeapEntry {
    key: u64,
    level: usize,
    time: u64,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.level == other.level && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// `(key ↑, level ↑, timestamp ↓)` — wrapped in [`Reverse`] for use
    /// in a min-heap, so the winning copy of each key pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| other.time.cmp(&self.time))
            .then_with(|| self.source.cmp(&other.source))
    }
}

// ------------------------------------------------------------------------------------------------
// Entry point
// ------------------------------------------------------------------------------------------------

/// Runs compaction rounds until no level is overfull.
///
/// Returns the number of rounds executed.
pub(crate) fn run(inner: &mut StoreInner) -> Result<usize, StoreError> {
    let mut rounds = 0usize;
    while let Some(level) = first_overfull(inner) {
        compact_level(inner, level)?;
        rounds += 1;
    }
    if rounds > 0 {
        info!(rounds, "compaction reached quiescence");
    }
    Ok(rounds)
}

/// One round: merge level `level`'s victims (plus intersecting tables
/// from `level + 1`) down into `level + 1`.
fn compact_level(inner: &mut StoreInner, level: usize) -> Result<(), StoreError> {
    // 1. Victims.
    let victims: Vec<Arc<Table>> = if level == 0 {
        inner.levels[0].clone()
    } else {
        let mut candidates = inner.levels[level].clone();
        candidates.sort_by(|a, b| {
            a.time()
                .cmp(&b.time())
                .then_with(|| a.min_key().cmp(&b.min_key()))
        });
        let excess = candidates.len() - capacity(level);
        candidates.truncate(excess);
        candidates
    };

    // 2. Key span of the victims.
    let min_key = victims.iter().map(|t| t.min_key()).min().unwrap_or(u64::MAX);
    let max_key = victims.iter().map(|t| t.max_key()).max().unwrap_or(0);

    // 3. Intersecting tables one level down.
    let overlap: Vec<Arc<Table>> = inner
        .levels
        .get(level + 1)
        .map(|tables| {
            tables
                .iter()
                .filter(|t| t.overlaps(min_key, max_key))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    // Tombstones can be dropped once the output level is the deepest one
    // holding any data.
    let output_is_deepest = inner
        .levels
        .iter()
        .skip(level + 2)
        .all(|tables| tables.is_empty());

    debug!(
        level,
        victims = victims.len(),
        overlap = overlap.len(),
        min_key,
        max_key,
        drop_tombstones = output_is_deepest,
        "compaction round"
    );

    // 4. Prime the k-way merge.
    let mut cursors: Vec<Cursor> = Vec::with_capacity(victims.len() + overlap.len());
    for table in &victims {
        cursors.push(Cursor {
            table: Arc::clone(table),
            level,
            pos: 0,
        });
    }
    for table in &overlap {
        cursors.push(Cursor {
            table: Arc::clone(table),
            level: level + 1,
            pos: 0,
        });
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(cursors.len());
    for (idx, cursor) in cursors.iter().enumerate() {
        if cursor.pos < cursor.table.count() {
            heap.push(Reverse(HeapEntry {
                key: cursor.table.key_at(cursor.pos),
                level: cursor.level,
                time: cursor.table.time(),
                source: idx,
            }));
        }
    }

    // 5. Pop winners and repack into fresh tables at level + 1.
    let target_dir = inner.level_dir(level + 1);
    fs::create_dir_all(&target_dir)?;

    let mut outputs: Vec<Arc<Table>> = Vec::new();
    let mut builder: Option<TableBuilder> = None;
    let mut last_key: Option<u64> = None;

    while let Some(Reverse(entry)) = heap.pop() {
        let idx = entry.source;
        let is_winner = last_key != Some(entry.key);
        last_key = Some(entry.key);

        if is_winner {
            let value = cursors[idx].table.value_at(cursors[idx].pos)?.to_vec();
            let keep = !(output_is_deepest && value == DEL_MARKER);
            if keep {
                let full = builder
                    .as_ref()
                    .is_some_and(|b| b.projected_bytes(value.len()) > inner.config.flush_limit);
                if full {
                    if let Some(done) = builder.take() {
                        outputs.push(seal(done, &target_dir)?);
                    }
                }
                builder
                    .get_or_insert_with(|| TableBuilder::new(inner.alloc_time()))
                    .add(entry.key, &value);
            }
        }

        // Advance the popped cursor and refill the heap.
        cursors[idx].pos += 1;
        if cursors[idx].pos < cursors[idx].table.count() {
            heap.push(Reverse(HeapEntry {
                key: cursors[idx].table.key_at(cursors[idx].pos),
                level: cursors[idx].level,
                time: cursors[idx].table.time(),
                source: idx,
            }));
        }
    }

    if let Some(done) = builder.take() {
        if !done.is_empty() {
            outputs.push(seal(done, &target_dir)?);
        }
    }

    // 6. Swap the level list: outputs in, consumed tables out, files gone.
    inner.ensure_level(level + 1);
    let consumed: Vec<Arc<Table>> = victims.iter().chain(overlap.iter()).cloned().collect();

    inner.levels[level].retain(|t| !consumed.iter().any(|c| Arc::ptr_eq(c, t)));
    inner.levels[level + 1].retain(|t| !consumed.iter().any(|c| Arc::ptr_eq(c, t)));
    inner.levels[level + 1].extend(outputs.iter().cloned());

    for table in &consumed {
        if let Err(e) = fs::remove_file(table.path()) {
            warn!(path = %table.path().display(), %e, "failed to unlink compacted table");
        }
    }

    info!(
        level,
        consumed = consumed.len(),
        outputs = outputs.len(),
        "compacted into level {}",
        level + 1
    );
    Ok(())
}

/// Writes a finished builder into the target directory and reopens it.
fn seal(builder: TableBuilder, target_dir: &std::path::Path) -> Result<Arc<Table>, StoreError> {
    let path = target_dir.join(format!("{}.sst", builder.time()));
    builder.write_to(&path)?;
    Ok(Arc::new(Table::open(&path)?))
}
