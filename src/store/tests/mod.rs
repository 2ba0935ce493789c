mod tests_snapshot;

use super::{Store, StoreConfig};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

pub(super) fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Deterministic config with a capacity large enough that flushes only
/// happen when a test asks for them.
pub(super) fn manual_flush_config() -> StoreConfig {
    StoreConfig {
        memtable_capacity: 1 << 20,
        segment_max_size: 1 << 20,
        skiplist_seed: Some(7),
    }
}

pub(super) fn open_store(dir: &TempDir, config: StoreConfig) -> Store {
    Store::open(dir.path(), config).unwrap()
}

/// Range scan into a sorted vec of pairs.
pub(super) fn collect(store: &Store, lower: &[u8], upper: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    store
        .visit(lower, upper, &mut |k: &[u8], v: &[u8]| {
            out.push((k.to_vec(), v.to_vec()))
        })
        .unwrap();
    out.sort();
    out
}
