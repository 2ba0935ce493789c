//! Write-Ahead Logging (WAL) module.
//!
//! A durable, append-only record of memtable mutations, replayed on open to
//! recover writes that never reached a segment.
//!
//! # On-disk layout
//!
//! ```text
//! [KEY_LEN_LE:4][VALUE_LEN_LE:4][KEY_BYTES][VALUE_BYTES]
//! [KEY_LEN_LE:4][VALUE_LEN_LE:4][KEY_BYTES][VALUE_BYTES]
//! ...
//! ```
//!
//! A zero `VALUE_LEN` records a tombstone.
//!
//! # Guarantees
//!
//! - **Durability**: every [`Wal::append`] is flushed and fsynced before it
//!   returns; the WAL write is the durability boundary of a `put`.
//! - **Recovery boundary**: replay stops at a cleanly-ended file or at a
//!   truncated trailing record. The partial record is the mark of a crash
//!   mid-write; it is dropped and physically truncated away, never replayed.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::types::{MAX_KEY_LEN, MAX_VALUE_LEN};

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A single replayed mutation: key plus value bytes (empty = tombstone).
pub type WalRecord = (Vec<u8>, Vec<u8>);

/// Append-only write-ahead log for one memtable.
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    /// Opens (or creates) the WAL at `path`, positioned for appending.
    ///
    /// Call [`Wal::replay`] before the first append when recovering.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Reads every complete record from the start of the file.
    ///
    /// A truncated trailing record is the recovery boundary: it is logged,
    /// cut off with `set_len`, and not returned.
    pub fn replay(&mut self) -> Result<Vec<WalRecord>, WalError> {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(0))?;

        let mut records = Vec::new();
        let mut committed: u64 = 0;

        loop {
            match read_record(&mut reader)? {
                ReadOutcome::Record { key, value, size } => {
                    committed += size;
                    records.push((key, value));
                }
                ReadOutcome::CleanEof => break,
                ReadOutcome::Truncated => {
                    warn!(
                        path = %self.path.display(),
                        offset = committed,
                        "dropping partial trailing WAL record"
                    );
                    self.file.set_len(committed)?;
                    break;
                }
            }
        }

        self.file.seek(SeekFrom::End(0))?;
        debug!(
            path = %self.path.display(),
            records = records.len(),
            "WAL replay complete"
        );
        Ok(records)
    }

    /// Appends one record and fsyncs it to durable storage.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        let mut buf = Vec::with_capacity(8 + key.len() + value.len());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        self.file.write_all(&buf)?;
        self.file.sync_all()?;

        trace!(key_len = key.len(), value_len = value.len(), "WAL append");
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum ReadOutcome {
    Record {
        key: Vec<u8>,
        value: Vec<u8>,
        size: u64,
    },
    CleanEof,
    Truncated,
}

/// Reads one record; distinguishes a clean end-of-file from a torn write.
fn read_record<R: Read>(reader: &mut R) -> Result<ReadOutcome, WalError> {
    let mut header = [0u8; 8];
    match read_exact_or_eof(reader, &mut header)? {
        Fill::Empty => return Ok(ReadOutcome::CleanEof),
        Fill::Partial => return Ok(ReadOutcome::Truncated),
        Fill::Full => {}
    }

    let key_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let value_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    // An implausible length field means the header itself came from a torn
    // write; treat it as the boundary rather than allocating blindly.
    if key_len == 0 || key_len > MAX_KEY_LEN || value_len > MAX_VALUE_LEN {
        return Ok(ReadOutcome::Truncated);
    }

    let mut key = vec![0u8; key_len];
    if !matches!(read_exact_or_eof(reader, &mut key)?, Fill::Full) {
        return Ok(ReadOutcome::Truncated);
    }

    let mut value = vec![0u8; value_len];
    if value_len > 0 && !matches!(read_exact_or_eof(reader, &mut value)?, Fill::Full) {
        return Ok(ReadOutcome::Truncated);
    }

    Ok(ReadOutcome::Record {
        key,
        value,
        size: 8 + key_len as u64 + value_len as u64,
    })
}

enum Fill {
    Full,
    Partial,
    Empty,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<Fill, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 { Fill::Empty } else { Fill::Partial });
        }
        filled += n;
    }
    Ok(Fill::Full)
}
