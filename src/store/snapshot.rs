//! Point-in-time read views.

use std::{collections::HashSet, sync::Arc};

use tracing::info;

use crate::segment::Segment;
use crate::store::{Store, StoreError, search_levels, visit_levels};

/// A frozen, read-only view of the store at the moment it was taken.
///
/// The snapshot owns independent file handles and mappings for every
/// segment, so it stays readable even after compaction unlinks the files
/// underneath it. It carries no mutating methods; writes go through the
/// live [`Store`], which never sees them reflected here.
pub struct Snapshot {
    levels: Vec<Vec<Segment>>,
    _pin: Arc<()>,
}

impl Snapshot {
    /// Point lookup against the frozen view.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(search_levels(&self.levels, key)?)
    }

    /// Range scan against the frozen view, same contract as
    /// [`Store::visit`].
    pub fn visit<F>(&self, lower: &[u8], upper: &[u8], visitor: &mut F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        if !lower.is_empty() && !upper.is_empty() && lower > upper {
            return Ok(());
        }
        let mut seen = HashSet::new();
        visit_levels(&self.levels, lower, upper, visitor, &mut seen)?;
        Ok(())
    }
}

impl Store {
    /// Takes a point-in-time snapshot.
    ///
    /// The memtable is flushed first, so the snapshot is segments all the
    /// way down. While any snapshot is alive, [`Store::garbage_collect`]
    /// stands down; compaction keeps running, relying on the snapshot's
    /// open handles to keep unlinked files readable.
    pub fn snapshot(&mut self) -> Result<Snapshot, StoreError> {
        self.flush()?;

        let mut levels = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            let mut frozen = Vec::with_capacity(level.len());
            for segment in level {
                frozen.push(Segment::open(segment.meta_path(), segment.data_path())?);
            }
            levels.push(frozen);
        }

        info!(
            segments = levels.iter().map(Vec::len).sum::<usize>(),
            "snapshot taken"
        );

        Ok(Snapshot {
            levels,
            _pin: Arc::clone(&self.snapshot_pin),
        })
    }
}
