//! Segment (SSTable) module.
//!
//! An immutable, sorted, on-disk run of key-value pairs: a binary-searchable
//! index over a companion value blob, fronted by a bloom filter. Segments
//! are built once, from a flushed memtable or a compaction merge, and
//! never mutated afterwards, except for the garbage-collection rewrite,
//! which replaces both files while keeping the segment's identity.
//!
//! # On-disk layout
//!
//! Two files per segment, `<index>.meta` and `<index>.data`:
//!
//! ```text
//! meta: [TIMESTAMP_LE:8][COUNT_LE:4][FORM_LE:4] then per entry
//!       form 0 (sequential): [KEY_LEN:4][VALUE_LEN:4][KEY_BYTES]
//!       form 1 (explicit):   [KEY_LEN:4][OFFSET:4][VALUE_LEN:4][KEY_BYTES]
//! data: the value blob
//! ```
//!
//! Form 0 is written by compaction and GC, whose values land in the blob in
//! index order; offsets are recomputed cumulatively at open. Form 1 is
//! written by flush, which adopts the memtable's value file verbatim (its
//! values sit in insertion order) and therefore must record each offset.
//!
//! A zero value length marks a tombstone; tombstones occupy index entries
//! but no blob bytes. The bloom filter is rebuilt from the index keys at
//! open time and is never serialized.
//!
//! # Concurrency
//!
//! Segments are read through a private file handle and `Mmap`; a snapshot
//! that re-opened a segment keeps its data reachable even after the live
//! store unlinks the files.

pub mod builder;

#[cfg(test)]
mod tests;

use std::{
    collections::HashSet,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::types::{KeyOffset, Lookup};

/// Errors returned by segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The meta file or an index entry does not describe a valid segment.
    #[error("corrupt segment: {0}")]
    Corrupt(String),
}

/// Layout tag stored in the meta header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaForm {
    /// Offsets implicit in write order (compaction / GC output).
    Sequential = 0,
    /// Offsets recorded per entry (flush adopting a memtable value file).
    Explicit = 1,
}

/// An immutable sorted run on disk.
pub struct Segment {
    timestamp: u64,
    index: Vec<KeyOffset>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    bloom: BloomFilter,
    /// `None` when the blob is empty (tombstone-only segment).
    data: Option<Mmap>,
    meta_path: PathBuf,
    data_path: PathBuf,
}

impl Segment {
    /// Opens a segment from its meta/data file pair, rebuilding the bloom
    /// filter and, for the sequential form, the value offsets.
    pub fn open<P: AsRef<Path>>(meta_path: P, data_path: P) -> Result<Self, SegmentError> {
        let meta_path = meta_path.as_ref().to_path_buf();
        let data_path = data_path.as_ref().to_path_buf();

        let bytes = fs::read(&meta_path)?;
        let mut cursor = MetaCursor::new(&bytes);

        let timestamp = cursor.read_u64()?;
        let count = cursor.read_u32()? as usize;
        let form = match cursor.read_u32()? {
            0 => MetaForm::Sequential,
            1 => MetaForm::Explicit,
            other => return Err(SegmentError::Corrupt(format!("unknown meta form {other}"))),
        };
        if count == 0 {
            return Err(SegmentError::Corrupt("segment with zero entries".into()));
        }

        let mut index = Vec::with_capacity(count);
        let mut bloom = BloomFilter::new();
        let mut pos: u32 = 0;
        for _ in 0..count {
            let key_len = cursor.read_u32()? as usize;
            let (offset, len) = match form {
                MetaForm::Sequential => {
                    let len = cursor.read_u32()?;
                    let offset = pos;
                    pos += len;
                    (offset, len)
                }
                MetaForm::Explicit => {
                    let offset = cursor.read_u32()?;
                    let len = cursor.read_u32()?;
                    (offset, len)
                }
            };
            let key = cursor.read_bytes(key_len)?.to_vec();
            if let Some(prev) = index.last() {
                let prev: &KeyOffset = prev;
                if prev.key.as_slice() >= key.as_slice() {
                    return Err(SegmentError::Corrupt("index keys not ascending".into()));
                }
            }
            bloom.insert(&key);
            index.push(KeyOffset::new(key, offset, len));
        }

        let min_key = index[0].key.clone();
        let max_key = index[count - 1].key.clone();
        let data = map_blob(&data_path)?;

        debug!(
            path = %meta_path.display(),
            timestamp,
            entries = count,
            "segment opened"
        );

        Ok(Self {
            timestamp,
            index,
            min_key,
            max_key,
            bloom,
            data,
            meta_path,
            data_path,
        })
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Number of index entries, tombstones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    pub fn index(&self) -> &[KeyOffset] {
        &self.index
    }

    /// Bloom pre-filter: `false` proves absence, `true` needs confirmation.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.contains(key)
    }

    /// Whether `key` falls inside this segment's `[min_key, max_key]`.
    pub fn contains_key_range(&self, key: &[u8]) -> bool {
        self.min_key.as_slice() <= key && key <= self.max_key.as_slice()
    }

    /// Whether this segment's range overlaps `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !(min > self.max_key.as_slice() || max < self.min_key.as_slice())
    }

    /// Binary-searches the index; tombstones surface as
    /// [`Lookup::Tombstone`] for the caller to translate.
    pub fn get(&self, key: &[u8]) -> Result<Lookup, SegmentError> {
        match self.index.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(i) => {
                let entry = &self.index[i];
                if entry.is_tombstone() {
                    Ok(Lookup::Tombstone)
                } else {
                    Ok(Lookup::Hit(self.read_value(entry)?.to_vec()))
                }
            }
            Err(_) => Ok(Lookup::Miss),
        }
    }

    /// Linear index scan over the inclusive `[lower, upper]` range (empty
    /// bound = unbounded), after whole-segment rejection via min/max.
    ///
    /// Keys already in `seen` are skipped; visited keys (tombstones
    /// included) are claimed in `seen` without being delivered.
    pub fn visit<F>(
        &self,
        lower: &[u8],
        upper: &[u8],
        visitor: &mut F,
        seen: &mut HashSet<Vec<u8>>,
    ) -> Result<(), SegmentError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        if !lower.is_empty() && lower > self.max_key.as_slice() {
            return Ok(());
        }
        if !upper.is_empty() && upper < self.min_key.as_slice() {
            return Ok(());
        }

        for entry in &self.index {
            if !lower.is_empty() && entry.key.as_slice() < lower {
                continue;
            }
            if !upper.is_empty() && entry.key.as_slice() > upper {
                break;
            }
            if seen.contains(&entry.key) {
                continue;
            }
            seen.insert(entry.key.clone());
            if entry.is_tombstone() {
                continue;
            }
            let value = self.read_value(entry)?;
            visitor(&entry.key, value);
        }
        Ok(())
    }

    /// Garbage-collection rewrite: drops every entry whose key is already
    /// claimed in `removable` (a newer layer holds it), claims the
    /// survivors, and rewrites both files compactly in place.
    ///
    /// Returns the number of surviving entries; zero means the caller
    /// should delete the segment. A segment with nothing to drop is left
    /// untouched on disk.
    pub fn gc(&mut self, removable: &mut HashSet<Vec<u8>>) -> Result<usize, SegmentError> {
        let stale = self
            .index
            .iter()
            .filter(|e| removable.contains(&e.key))
            .count();
        if stale == 0 {
            for entry in &self.index {
                removable.insert(entry.key.clone());
            }
            return Ok(self.index.len());
        }

        let mut new_index = Vec::with_capacity(self.index.len() - stale);
        let mut blob = Vec::new();
        for entry in &self.index {
            if removable.contains(&entry.key) {
                continue;
            }
            let value = self.read_value(entry)?;
            new_index.push(KeyOffset::new(entry.key.clone(), blob.len() as u32, entry.len));
            blob.extend_from_slice(value);
            removable.insert(entry.key.clone());
        }

        debug!(
            path = %self.meta_path.display(),
            dropped = stale,
            live = new_index.len(),
            "segment gc rewrite"
        );

        if new_index.is_empty() {
            self.index.clear();
            return Ok(0);
        }

        builder::write_blob(&self.data_path, &blob)?;
        builder::write_meta(
            &self.meta_path,
            self.timestamp,
            &new_index,
            MetaForm::Sequential,
        )?;

        self.min_key = new_index[0].key.clone();
        self.max_key = new_index[new_index.len() - 1].key.clone();
        let mut bloom = BloomFilter::new();
        for entry in &new_index {
            bloom.insert(&entry.key);
        }
        self.bloom = bloom;
        self.index = new_index;
        self.data = map_blob(&self.data_path)?;

        Ok(self.index.len())
    }

    /// Unlinks both backing files, consuming the segment.
    pub fn delete(self) -> Result<(), SegmentError> {
        debug!(path = %self.meta_path.display(), "segment deleted");
        fs::remove_file(&self.meta_path)?;
        fs::remove_file(&self.data_path)?;
        Ok(())
    }

    /// Slice of the value blob for one index entry (empty for tombstones).
    pub fn read_value(&self, entry: &KeyOffset) -> Result<&[u8], SegmentError> {
        if entry.len == 0 {
            return Ok(&[]);
        }
        let start = entry.offset as usize;
        let end = start + entry.len as usize;
        let blob = self
            .data
            .as_deref()
            .ok_or_else(|| SegmentError::Corrupt("index points into empty blob".into()))?;
        blob.get(start..end)
            .ok_or_else(|| SegmentError::Corrupt("index entry out of blob bounds".into()))
    }
}

/// Maps the value blob read-only; empty blobs carry no mapping.
fn map_blob(path: &Path) -> Result<Option<Mmap>, SegmentError> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // Safety: segment data files are only replaced via rename, never written
    // through while mapped.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some(mmap))
}

struct MetaCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MetaCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], SegmentError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| SegmentError::Corrupt("truncated meta file".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, SegmentError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, SegmentError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}
