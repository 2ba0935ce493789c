//! Store module.
//!
//! Ties the layers into one engine: a WAL-backed [`Memtable`] in front of a
//! pyramid of immutable segment levels on disk. Writes land in the
//! memtable; when it fills, a flush seals it into a level-0 segment, and
//! overflowing levels cascade into the next one through compaction.
//!
//! # Directory layout
//!
//! ```text
//! <store>/
//!   mem.log            write-ahead log of the live memtable
//!   mem.data           value file of the live memtable
//!   level_0/
//!     <index>.meta     segment index
//!     <index>.data     segment value blob
//!   level_1/
//!     ...
//! ```
//!
//! File indices and segment timestamps are monotonic counters, recovered on
//! open as one past the maximum found in the directory tree. No manifest
//! file exists; the directory itself is the source of truth.
//!
//! # Read path
//!
//! Newest layer wins: memtable, then level 0 (segments there may overlap,
//! so every candidate is consulted and the highest timestamp decides), then
//! levels 1 and deeper, where segments are disjoint and at most one per
//! level can hold the key. A tombstone found at any layer terminates the
//! lookup.

mod compaction;
mod snapshot;

#[cfg(test)]
mod tests;

pub use snapshot::Snapshot;

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::memtable::{Memtable, MemtableError};
use crate::segment::{MetaForm, Segment, SegmentError, builder};
use crate::types::{Lookup, MAX_KEY_LEN, MAX_VALUE_LEN};

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// Rejected key or value.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Memtable failure.
    #[error(transparent)]
    Memtable(#[from] MemtableError),

    /// Segment failure.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Tunables for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Memtable size threshold (projected segment bytes) that triggers a
    /// flush.
    pub memtable_capacity: u32,
    /// Upper bound on the size of a compaction output segment.
    pub segment_max_size: u32,
    /// Fixed seed for the skip-list coin flips; `None` seeds from the OS.
    pub skiplist_seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memtable_capacity: 1 << 22,
            segment_max_size: 1 << 22,
            skiplist_seed: None,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), StoreError> {
        if self.memtable_capacity == 0 {
            return Err(StoreError::InvalidConfig("memtable_capacity must be > 0"));
        }
        if self.segment_max_size == 0 {
            return Err(StoreError::InvalidConfig("segment_max_size must be > 0"));
        }
        Ok(())
    }

    fn rng(&self) -> StdRng {
        match self.skiplist_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// A single-node, embedded, log-structured key-value store.
///
/// All methods take `&mut self`; the store is single-writer by
/// construction. Durability of every write is guaranteed by the memtable's
/// WAL before the call returns.
pub struct Store {
    dir: PathBuf,
    config: StoreConfig,
    memtable: Memtable,
    /// `levels[0]` may hold overlapping segments, sorted by timestamp
    /// ascending; deeper levels are pairwise disjoint.
    levels: Vec<Vec<Segment>>,
    next_file_index: u64,
    next_timestamp: u64,
    /// Cloned into every [`Snapshot`]; garbage collection stands down while
    /// any clone is alive.
    snapshot_pin: Arc<()>,
}

impl Store {
    /// Opens (or creates) a store rooted at `dir`, recovering the memtable
    /// from its WAL and re-opening every segment found on disk.
    pub fn open<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut levels: Vec<Vec<Segment>> = Vec::new();
        let mut max_file_index = 0u64;
        let mut max_timestamp = 0u64;

        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let level = match parse_level_dir(&name.to_string_lossy()) {
                Some(level) => level,
                None => continue,
            };
            while levels.len() <= level {
                levels.push(Vec::new());
            }

            for file in fs::read_dir(dirent.path())? {
                let file = file?;
                let path = file.path();
                if path.extension().is_none_or(|e| e != "meta") {
                    continue;
                }
                let index = match parse_segment_index(&path) {
                    Some(index) => index,
                    None => {
                        warn!(path = %path.display(), "ignoring unrecognized file");
                        continue;
                    }
                };
                let segment = Segment::open(&path, &path.with_extension("data"))?;
                max_file_index = max_file_index.max(index);
                max_timestamp = max_timestamp.max(segment.timestamp());
                levels[level].push(segment);
            }
        }
        for level in &mut levels {
            level.sort_by_key(Segment::timestamp);
        }

        let memtable = Memtable::open(
            dir.join("mem.data"),
            dir.join("mem.log"),
            config.memtable_capacity,
            config.rng(),
        )?;

        info!(
            dir = %dir.display(),
            levels = levels.len(),
            segments = levels.iter().map(Vec::len).sum::<usize>(),
            memtable_entries = memtable.len(),
            "store opened"
        );

        Ok(Self {
            dir,
            config,
            memtable,
            levels,
            next_file_index: max_file_index + 1,
            next_timestamp: max_timestamp + 1,
            snapshot_pin: Arc::new(()),
        })
    }

    /// Inserts or overwrites a key. Empty values are reserved as the
    /// deletion marker and rejected here; use [`Store::remove`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        if value.is_empty() {
            return Err(StoreError::InvalidArgument("empty value"));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreError::InvalidArgument("value too large"));
        }
        self.write(key, value)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        match self.memtable.get(key)? {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Tombstone => return Ok(None),
            Lookup::Miss => {}
        }
        Ok(search_levels(&self.levels, key)?)
    }

    /// Deletes a key by writing a tombstone over it. Returns whether the
    /// key was present; an absent key is left untouched.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        self.write(key, &[])?;
        Ok(true)
    }

    /// Delivers every live key-value pair in the inclusive `[lower, upper]`
    /// range to `visitor`, in no particular order across layers. An empty
    /// bound leaves that side unbounded.
    pub fn visit<F>(&self, lower: &[u8], upper: &[u8], visitor: &mut F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        if !lower.is_empty() && !upper.is_empty() && lower > upper {
            return Ok(());
        }
        let mut seen = HashSet::new();
        self.memtable.visit(lower, upper, visitor, &mut seen)?;
        visit_levels(&self.levels, lower, upper, visitor, &mut seen)?;
        Ok(())
    }

    /// Seals the memtable into a level-0 segment and cascades any
    /// overflowing levels. A no-op on an empty memtable.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        self.memtable.prepare_flush()?;

        let entries = self.memtable.index_entries();
        let index = self.next_file_index;
        let timestamp = self.next_timestamp;
        self.next_file_index += 1;
        self.next_timestamp += 1;

        fs::create_dir_all(level_dir(&self.dir, 0))?;
        let (meta_path, data_path) = segment_file_paths(&self.dir, 0, index);

        // The memtable's value file becomes the segment blob as-is; its
        // values sit in insertion order, so the meta must carry explicit
        // offsets.
        fs::rename(self.memtable.value_path(), &data_path)?;
        builder::write_meta(&meta_path, timestamp, &entries, MetaForm::Explicit)?;

        let segment = Segment::open(&meta_path, &data_path)?;
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        self.levels[0].push(segment);

        // Everything the WAL protected is now a segment; drop it before the
        // fresh memtable re-creates the path.
        fs::remove_file(self.memtable.wal_path())?;
        self.memtable = Memtable::open(
            self.dir.join("mem.data"),
            self.dir.join("mem.log"),
            self.config.memtable_capacity,
            self.config.rng(),
        )?;

        info!(index, timestamp, entries = entries.len(), "memtable flushed");

        let mut level = 0;
        while level < self.levels.len() && self.levels[level].len() > compaction::level_capacity(level)
        {
            compaction::compact_into(self, level)?;
            level += 1;
        }
        Ok(())
    }

    /// Durability barrier. Every `put` and `remove` is already fsynced
    /// through the WAL before returning, so there is nothing left to force.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Number of segments per level, level 0 first.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    /// Rewrites segments to drop entries shadowed by newer layers.
    ///
    /// Returns `false` without touching anything while a [`Snapshot`] is
    /// alive; the snapshot's segments share these files.
    pub fn garbage_collect(&mut self) -> Result<bool, StoreError> {
        if Arc::strong_count(&self.snapshot_pin) > 1 {
            debug!("garbage collection skipped, snapshot active");
            return Ok(false);
        }

        let mut removable = HashSet::new();
        self.memtable.mark_keys(&mut removable);

        let mut dropped_segments = 0usize;
        for level in 0..self.levels.len() {
            // Level 0 holds overlapping segments; newest (appended last)
            // claims its keys first. Deeper levels are disjoint, any order
            // works.
            let order: Vec<usize> = if level == 0 {
                (0..self.levels[level].len()).rev().collect()
            } else {
                (0..self.levels[level].len()).collect()
            };
            let mut emptied = Vec::new();
            for i in order {
                if self.levels[level][i].gc(&mut removable)? == 0 {
                    emptied.push(i);
                }
            }
            emptied.sort_unstable();
            for i in emptied.into_iter().rev() {
                self.levels[level].remove(i).delete()?;
                dropped_segments += 1;
            }
        }

        info!(dropped_segments, "garbage collection complete");
        Ok(true)
    }

    /// Write path shared by `put` and `remove`; an empty value is the
    /// tombstone. Retries once after a capacity-triggered flush.
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        loop {
            match self.memtable.put(key, value) {
                Ok(()) => return Ok(()),
                Err(MemtableError::FlushRequired) => self.flush()?,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn validate_key(key: &[u8]) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("empty key"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidArgument("key too large"));
    }
    Ok(())
}

/// Searches the segment levels for `key`, newest layer first. Shared with
/// [`Snapshot`].
fn search_levels(levels: &[Vec<Segment>], key: &[u8]) -> Result<Option<Vec<u8>>, SegmentError> {
    if let Some(level0) = levels.first() {
        // Level-0 segments overlap; the candidate with the highest
        // timestamp wins, and older candidates are never probed once a
        // newer one answered.
        let mut best: Option<(u64, Lookup)> = None;
        for segment in level0 {
            if let Some((ts, _)) = &best {
                if segment.timestamp() <= *ts {
                    continue;
                }
            }
            if !segment.contains_key_range(key) || !segment.may_contain(key) {
                continue;
            }
            match segment.get(key)? {
                Lookup::Miss => {}
                outcome => best = Some((segment.timestamp(), outcome)),
            }
        }
        match best {
            Some((_, Lookup::Hit(value))) => return Ok(Some(value)),
            Some((_, Lookup::Tombstone)) => return Ok(None),
            _ => {}
        }
    }

    for level in levels.iter().skip(1) {
        for segment in level {
            if !segment.contains_key_range(key) {
                continue;
            }
            // Disjoint level: only this segment can hold the key.
            if segment.may_contain(key) {
                match segment.get(key)? {
                    Lookup::Hit(value) => return Ok(Some(value)),
                    Lookup::Tombstone => return Ok(None),
                    Lookup::Miss => {}
                }
            }
            break;
        }
    }
    Ok(None)
}

/// Range scan across the segment levels, newest layer first, deduplicated
/// through `seen`. Shared with [`Snapshot`].
fn visit_levels<F>(
    levels: &[Vec<Segment>],
    lower: &[u8],
    upper: &[u8],
    visitor: &mut F,
    seen: &mut HashSet<Vec<u8>>,
) -> Result<(), SegmentError>
where
    F: FnMut(&[u8], &[u8]),
{
    if let Some(level0) = levels.first() {
        for segment in level0.iter().rev() {
            segment.visit(lower, upper, visitor, seen)?;
        }
    }
    for level in levels.iter().skip(1) {
        for segment in level {
            segment.visit(lower, upper, visitor, seen)?;
        }
    }
    Ok(())
}

fn level_dir(dir: &Path, level: usize) -> PathBuf {
    dir.join(format!("level_{level}"))
}

fn segment_file_paths(dir: &Path, level: usize, index: u64) -> (PathBuf, PathBuf) {
    let base = level_dir(dir, level);
    (
        base.join(format!("{index}.meta")),
        base.join(format!("{index}.data")),
    )
}

fn parse_level_dir(name: &str) -> Option<usize> {
    name.strip_prefix("level_")?.parse().ok()
}

fn parse_segment_index(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}
