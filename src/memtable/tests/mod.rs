mod tests_basic;

use super::Memtable;
use rand::{SeedableRng, rngs::StdRng};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

pub(super) fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Opens a memtable in `dir` with a pinned RNG so tower shapes are stable.
pub(super) fn open_memtable(dir: &TempDir, capacity: u32) -> Memtable {
    Memtable::open(
        dir.path().join("mem.data"),
        dir.path().join("mem.log"),
        capacity,
        StdRng::seed_from_u64(42),
    )
    .unwrap()
}
