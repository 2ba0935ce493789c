//! Segment writers.
//!
//! All files are written to a temporary sibling path, fsynced, and renamed
//! into place, so a half-written segment is never observable under its
//! final name.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::segment::{MetaForm, SegmentError};
use crate::types::KeyOffset;

/// Serializes and writes a meta file for `entries` (already sorted).
///
/// The explicit form records each entry's offset; the sequential form omits
/// it, leaving offsets to be recomputed cumulatively at open.
pub fn write_meta(
    path: &Path,
    timestamp: u64,
    entries: &[KeyOffset],
    form: MetaForm,
) -> Result<(), SegmentError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(form as u32).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        if form == MetaForm::Explicit {
            buf.extend_from_slice(&entry.offset.to_le_bytes());
        }
        buf.extend_from_slice(&entry.len.to_le_bytes());
        buf.extend_from_slice(&entry.key);
    }

    write_atomic(path, &buf)?;
    debug!(
        path = %path.display(),
        timestamp,
        entries = entries.len(),
        form = ?form,
        "segment meta written"
    );
    Ok(())
}

/// Writes a value blob.
pub fn write_blob(path: &Path, blob: &[u8]) -> Result<(), SegmentError> {
    write_atomic(path, blob)
}

/// Writes a complete segment from a sorted run of key-value pairs, values
/// landing in the blob in index order (sequential meta form).
pub fn write_segment(
    meta_path: &Path,
    data_path: &Path,
    timestamp: u64,
    pairs: &[(Vec<u8>, Vec<u8>)],
) -> Result<(), SegmentError> {
    let mut index = Vec::with_capacity(pairs.len());
    let mut blob = Vec::new();
    for (key, value) in pairs {
        index.push(KeyOffset::new(
            key.clone(),
            blob.len() as u32,
            value.len() as u32,
        ));
        blob.extend_from_slice(value);
    }

    write_blob(data_path, &blob)?;
    write_meta(meta_path, timestamp, &index, MetaForm::Sequential)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SegmentError> {
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
