//! Memtable module.
//!
//! The mutable, in-memory layer of the engine: a skip list over keys whose
//! values live in an on-disk value file, paired with a WAL for durability.
//!
//! ## Design overview
//!
//! The skip list is an arena of nodes addressed by index: `right` and
//! `down` links are indices into one `Vec`, never pointers. Each tier links
//! the same keys more sparsely than the tier below; the bottom tier holds
//! every key exactly once, in ascending order. A node stores a
//! [`KeyOffset`]: the key plus the offset/length of its value inside the
//! value file (`len == 0` is a tombstone).
//!
//! Tier height is decided by a coin flip per tier, capped by the search
//! path, with at most one new head tier per insert. The randomness source
//! is injected at construction so tests can pin tower shapes.
//!
//! ## Crash safety
//!
//! Every mutation is appended to the WAL and fsynced before the in-memory
//! structure or the value file is touched. On open, the WAL is replayed
//! (without re-logging) to rebuild both; a torn trailing record is dropped
//! by the WAL layer.
//!
//! ## Capacity
//!
//! `put` refuses to mutate once the projected size exceeds the configured
//! capacity and instead signals [`MemtableError::FlushRequired`]; the store
//! flushes and retries. The one exception is an oversized entry arriving at
//! an empty memtable, which is admitted, since a flush could never make
//! room for it.

#[cfg(test)]
mod tests;

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use rand::{Rng, rngs::StdRng};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::types::{ENTRY_OVERHEAD, FILE_HEADER, KeyOffset, Lookup};
use crate::wal::{Wal, WalError};

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Value-file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Write buffer limit reached; the store must flush and retry.
    #[error("flush required")]
    FlushRequired,
}

/// One skip-list element. Head sentinels carry an empty key.
struct Node {
    entry: KeyOffset,
    right: Option<u32>,
    down: Option<u32>,
}

/// WAL-backed sorted write buffer.
pub struct Memtable {
    nodes: Vec<Node>,
    /// Index of the top-tier head sentinel.
    head: u32,
    /// Projected size of the segment this table flushes into.
    total_size: u32,
    /// Distinct keys at the bottom tier.
    entry_count: u32,
    /// Write cursor into the value file.
    next_value_offset: u32,
    capacity: u32,
    value_file: File,
    value_path: PathBuf,
    wal: Wal,
    rng: StdRng,
}

impl Memtable {
    /// Opens a memtable over `value_path`/`wal_path`, replaying any existing
    /// WAL into a fresh value file and skip list.
    pub fn open<P: AsRef<Path>>(
        value_path: P,
        wal_path: P,
        capacity: u32,
        rng: StdRng,
    ) -> Result<Self, MemtableError> {
        let mut wal = Wal::open(wal_path.as_ref())?;
        let records = wal.replay()?;

        // Values are reconstructed from the WAL, so the value file always
        // starts from scratch.
        let value_path = value_path.as_ref().to_path_buf();
        let value_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&value_path)?;

        let mut table = Self {
            nodes: vec![Node {
                entry: KeyOffset::new(Vec::new(), 0, 0),
                right: None,
                down: None,
            }],
            head: 0,
            total_size: FILE_HEADER,
            entry_count: 0,
            next_value_offset: 0,
            capacity,
            value_file,
            value_path,
            wal,
            rng,
        };

        let replayed = records.len();
        for (key, value) in records {
            let (path, found) = table.find_path(&key);
            table.apply(path, found, &key, &value)?;
        }

        if replayed > 0 {
            info!(
                replayed,
                entries = table.entry_count,
                "memtable recovered from WAL"
            );
        }
        Ok(table)
    }

    /// Inserts or overwrites a key.
    ///
    /// WAL first, then value file, then skip list. Signals
    /// [`MemtableError::FlushRequired`], without mutating anything, when
    /// the projected size would exceed capacity.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), MemtableError> {
        let (path, found) = self.find_path(key);

        let projected = if found.is_some() {
            self.total_size + value.len() as u32
        } else {
            self.total_size + key.len() as u32 + value.len() as u32 + ENTRY_OVERHEAD
        };
        if projected > self.capacity && self.entry_count > 0 {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append(key, value)?;
        self.apply(path, found, key, value)?;

        trace!(
            key_len = key.len(),
            value_len = value.len(),
            total_size = self.total_size,
            "memtable put"
        );
        Ok(())
    }

    /// Point lookup. A stored zero-length value reports
    /// [`Lookup::Tombstone`], which the caller translates to "not found".
    pub fn get(&self, key: &[u8]) -> Result<Lookup, MemtableError> {
        let mut pos = self.head;
        loop {
            while let Some(r) = self.node(pos).right {
                if self.node(r).entry.key.as_slice() < key {
                    pos = r;
                } else {
                    break;
                }
            }
            if let Some(r) = self.node(pos).right {
                let entry = &self.node(r).entry;
                if entry.key == key {
                    if entry.is_tombstone() {
                        return Ok(Lookup::Tombstone);
                    }
                    return Ok(Lookup::Hit(self.read_value(entry.offset, entry.len)?));
                }
            }
            match self.node(pos).down {
                Some(d) => pos = d,
                None => return Ok(Lookup::Miss),
            }
        }
    }

    /// Walks the bottom tier once, delivering live keys within the inclusive
    /// `[lower, upper]` range (empty bound = unbounded on that side).
    ///
    /// Keys already present in `seen` are skipped; visited keys (including
    /// tombstones, which are never delivered) are added to it so older
    /// layers cannot resurrect them.
    pub fn visit<F>(
        &self,
        lower: &[u8],
        upper: &[u8],
        visitor: &mut F,
        seen: &mut HashSet<Vec<u8>>,
    ) -> Result<(), MemtableError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut cursor = self.node(self.bottom_head()).right;
        while let Some(idx) = cursor {
            let entry = &self.node(idx).entry;
            cursor = self.node(idx).right;

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
            let value = self.read_value(entry.offset, entry.len)?;
            visitor(&entry.key, &value);
        }
        Ok(())
    }

    /// Number of distinct keys (tombstones included).
    pub fn len(&self) -> usize {
        self.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Projected on-disk size of the segment this table would flush into.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn value_path(&self) -> &Path {
        &self.value_path
    }

    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }

    /// Bottom-tier index in ascending key order, with offsets into the
    /// value file. This is the sorted run a flush hands to the segment
    /// writer.
    pub fn index_entries(&self) -> Vec<KeyOffset> {
        let mut entries = Vec::with_capacity(self.entry_count as usize);
        let mut cursor = self.node(self.bottom_head()).right;
        while let Some(idx) = cursor {
            entries.push(self.node(idx).entry.clone());
            cursor = self.node(idx).right;
        }
        entries
    }

    /// Claims every key (tombstones included) in the removable-key set used
    /// by garbage collection: whatever the memtable holds is the newest
    /// version, so any older on-disk copy is stale.
    pub fn mark_keys(&self, set: &mut HashSet<Vec<u8>>) {
        let mut cursor = self.node(self.bottom_head()).right;
        while let Some(idx) = cursor {
            set.insert(self.node(idx).entry.key.clone());
            cursor = self.node(idx).right;
        }
    }

    /// Fsyncs the value file ahead of its adoption as a segment data file.
    pub fn prepare_flush(&mut self) -> Result<(), MemtableError> {
        self.value_file.sync_all()?;
        debug!(
            entries = self.entry_count,
            bytes = self.next_value_offset,
            "memtable sealed for flush"
        );
        Ok(())
    }

    // --- internals ---

    fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    fn bottom_head(&self) -> u32 {
        let mut pos = self.head;
        while let Some(d) = self.node(pos).down {
            pos = d;
        }
        pos
    }

    /// Records, per tier from top to bottom, the node after which `key`
    /// belongs, plus the topmost node matching `key` if it exists.
    fn find_path(&self, key: &[u8]) -> (Vec<u32>, Option<u32>) {
        let mut path = Vec::new();
        let mut found = None;
        let mut pos = self.head;
        loop {
            while let Some(r) = self.node(pos).right {
                if self.node(r).entry.key.as_slice() < key {
                    pos = r;
                } else {
                    break;
                }
            }
            if found.is_none() {
                if let Some(r) = self.node(pos).right {
                    if self.node(r).entry.key == key {
                        found = Some(r);
                    }
                }
            }
            path.push(pos);
            match self.node(pos).down {
                Some(d) => pos = d,
                None => break,
            }
        }
        (path, found)
    }

    /// Writes the value bytes and splices the skip list. Shared by `put`
    /// and WAL replay (which must not re-log).
    fn apply(
        &mut self,
        path: Vec<u32>,
        found: Option<u32>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), MemtableError> {
        let len = value.len() as u32;
        let offset = self.next_value_offset;
        if len > 0 {
            self.value_file.write_all_at(value, offset as u64)?;
        }
        self.next_value_offset += len;

        if let Some(top) = found {
            // Overwrite: the tower below a matching node is the same key at
            // every lower tier; update offset/len all the way down.
            let mut cursor = Some(top);
            while let Some(idx) = cursor {
                let node = &mut self.nodes[idx as usize];
                node.entry.offset = offset;
                node.entry.len = len;
                cursor = node.down;
            }
            self.total_size += len;
            return Ok(());
        }

        // Insert bottom-up along the recorded path, flipping a coin per tier.
        let mut down: Option<u32> = None;
        let mut grow = true;
        for &at in path.iter().rev() {
            if !grow {
                break;
            }
            let right = self.nodes[at as usize].right;
            let idx = self.alloc(Node {
                entry: KeyOffset::new(key.to_vec(), offset, len),
                right,
                down,
            });
            self.nodes[at as usize].right = Some(idx);
            down = Some(idx);
            grow = self.rng.random::<bool>();
        }
        if grow {
            // The coin outlasted every existing tier: add one new head tier
            // whose only entry is this key.
            let tower = self.alloc(Node {
                entry: KeyOffset::new(key.to_vec(), offset, len),
                right: None,
                down,
            });
            let old_head = self.head;
            self.head = self.alloc(Node {
                entry: KeyOffset::new(Vec::new(), 0, 0),
                right: Some(tower),
                down: Some(old_head),
            });
        }

        self.entry_count += 1;
        self.total_size += key.len() as u32 + len + ENTRY_OVERHEAD;
        Ok(())
    }

    fn alloc(&mut self, node: Node) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(node);
        idx
    }

    fn read_value(&self, offset: u32, len: u32) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.value_file.read_exact_at(&mut buf, offset as u64)?;
        Ok(buf)
    }
}
