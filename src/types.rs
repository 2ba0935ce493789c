//! Shared data-model types used across the engine layers.

/// Maximum accepted key length (4 KiB).
pub const MAX_KEY_LEN: usize = 4 * 1024;

/// Maximum accepted value length (16 MiB).
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

/// Per-entry overhead used for size accounting: the three `u32` fields of
/// an index entry (key length, offset, value length).
pub const ENTRY_OVERHEAD: u32 = 12;

/// Fixed header size of a segment meta file: timestamp (8) + count (4) +
/// form tag (4).
pub const FILE_HEADER: u32 = 16;

/// A key's position and size within a value blob.
///
/// `len == 0` marks a tombstone: the key is logically deleted and no bytes
/// are stored for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOffset {
    pub key: Vec<u8>,
    pub offset: u32,
    pub len: u32,
}

impl KeyOffset {
    pub fn new(key: Vec<u8>, offset: u32, len: u32) -> Self {
        Self { key, offset, len }
    }

    /// Whether this entry marks a logical deletion.
    pub fn is_tombstone(&self) -> bool {
        self.len == 0
    }
}

/// Outcome of a point lookup against a single layer (memtable or segment).
///
/// A tombstone is a *hit* internally, since it must shadow older layers,
/// but is translated to "not found" before reaching the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live value found.
    Hit(Vec<u8>),
    /// The key was deleted at this layer; older layers must not be consulted.
    Tombstone,
    /// The layer knows nothing about this key.
    Miss,
}
