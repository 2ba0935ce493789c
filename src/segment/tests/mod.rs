
use std::path::PathBuf;

use super::{Segment, builder};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

pub(super) fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

pub(super) fn segment_paths(dir: &TempDir, idx: u64) -> (PathBuf, PathBuf) {
    (
        dir.path().join(format!("{idx}.meta")),
        dir.path().join(format!("{idx}.data")),
    )
}

/// Builds and opens a sequential-form segment from sorted string pairs.
pub(super) fn build(dir: &TempDir, idx: u64, timestamp: u64, pairs: &[(&str, &str)]) -> Segment {
    let owned: Vec<(Vec<u8>, Vec<u8>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    let (meta, data) = segment_paths(dir, idx);
    builder::write_segment(&meta, &data, timestamp, &owned).unwrap();
    Segment::open(&meta, &data).unwrap()
}
