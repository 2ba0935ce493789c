//! Leveled compaction.
//!
//! When a level exceeds its capacity (`2 << level` segments), a k-way merge
//! folds the overflow into the next level down the pyramid: the victims
//! plus every target-level segment whose key range they overlap are merged
//! into fresh, disjoint, size-bounded segments. New files are fully written
//! before any participant is unlinked, so a crash mid-compaction leaves a
//! readable (if temporarily oversized) store.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fs,
};

use tracing::{debug, info};

use crate::segment::{Segment, builder};
use crate::store::{Store, StoreError, level_dir, segment_file_paths};
use crate::types::{ENTRY_OVERHEAD, FILE_HEADER};

/// Maximum number of segments level `level` may hold after a flush.
pub(super) fn level_capacity(level: usize) -> usize {
    2 << level
}

/// Merges the overflow of level `src` into level `src + 1`.
///
/// From level 0 every segment is taken (they overlap each other anyway);
/// from deeper levels only the oldest segments beyond capacity. The merged
/// output carries the highest participant timestamp and is inserted into
/// the target level in timestamp order.
pub(super) fn compact_into(store: &mut Store, src: usize) -> Result<(), StoreError> {
    let des = src + 1;
    if store.levels.len() <= des {
        store.levels.push(Vec::new());
    }

    let victims: Vec<Segment> = if src == 0 {
        store.levels[0].drain(..).collect()
    } else {
        let overflow = store.levels[src].len() - level_capacity(src);
        store.levels[src].drain(..overflow).collect()
    };

    let mut min_key = victims[0].min_key().to_vec();
    let mut max_key = victims[0].max_key().to_vec();
    for victim in &victims[1..] {
        if victim.min_key() < min_key.as_slice() {
            min_key = victim.min_key().to_vec();
        }
        if victim.max_key() > max_key.as_slice() {
            max_key = victim.max_key().to_vec();
        }
    }

    // Pull every target-level segment the victims' range touches into the
    // merge; the rest of the level stays disjoint from the output.
    let mut participants = victims;
    let mut i = 0;
    while i < store.levels[des].len() {
        if store.levels[des][i].overlaps(&min_key, &max_key) {
            participants.push(store.levels[des].remove(i));
        } else {
            i += 1;
        }
    }

    debug!(
        src,
        des,
        participants = participants.len(),
        "compaction started"
    );

    let timestamp = participants
        .iter()
        .map(Segment::timestamp)
        .max()
        .unwrap_or(0);
    let merged = merge(&participants)?;

    // Partition the merged run into segments bounded by segment_max_size,
    // accounted the same way the memtable projects its flush size.
    let mut outputs: Vec<Vec<(Vec<u8>, Vec<u8>)>> = Vec::new();
    let mut current: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut size = FILE_HEADER;
    for (key, value) in merged {
        let cost = ENTRY_OVERHEAD + key.len() as u32 + value.len() as u32;
        if !current.is_empty() && size + cost > store.config.segment_max_size {
            outputs.push(std::mem::take(&mut current));
            size = FILE_HEADER;
        }
        size += cost;
        current.push((key, value));
    }
    if !current.is_empty() {
        outputs.push(current);
    }

    fs::create_dir_all(level_dir(&store.dir, des))?;
    let mut fresh = Vec::with_capacity(outputs.len());
    for pairs in &outputs {
        let index = store.next_file_index;
        store.next_file_index += 1;
        let (meta_path, data_path) = segment_file_paths(&store.dir, des, index);
        builder::write_segment(&meta_path, &data_path, timestamp, pairs)?;
        fresh.push(Segment::open(&meta_path, &data_path)?);
    }

    for segment in fresh {
        let at = store.levels[des]
            .iter()
            .position(|s| s.timestamp() > segment.timestamp())
            .unwrap_or(store.levels[des].len());
        store.levels[des].insert(at, segment);
    }

    info!(
        src,
        des,
        outputs = outputs.len(),
        timestamp,
        "compaction complete"
    );

    // Only now, with the replacement files durable, the inputs go away.
    for segment in participants {
        segment.delete()?;
    }
    Ok(())
}

/// One cursor feeding the merge heap.
struct MergeSource {
    pairs: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    timestamp: u64,
}

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    timestamp: u64,
    source: usize,
}

// Key ascending, then timestamp descending: wrapped in `Reverse`, the heap
// pops the smallest key and, among equal keys, the newest version first.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// K-way merge of sorted segments into one ascending run. For a key held
/// by several participants the newest version is kept, tombstones
/// included; the rest are discarded.
fn merge(participants: &[Segment]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let mut sources = Vec::with_capacity(participants.len());
    for segment in participants {
        let mut pairs = Vec::with_capacity(segment.len());
        for entry in segment.index() {
            pairs.push((entry.key.clone(), segment.read_value(entry)?.to_vec()));
        }
        sources.push(MergeSource {
            pairs: pairs.into_iter(),
            timestamp: segment.timestamp(),
        });
    }

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (i, source) in sources.iter_mut().enumerate() {
        if let Some((key, value)) = source.pairs.next() {
            heap.push(Reverse(HeapEntry {
                key,
                value,
                timestamp: source.timestamp,
                source: i,
            }));
        }
    }

    let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    while let Some(Reverse(entry)) = heap.pop() {
        let source = entry.source;
        let duplicate = merged
            .last()
            .is_some_and(|(last, _)| last == &entry.key);
        if !duplicate {
            merged.push((entry.key, entry.value));
        }
        if let Some((key, value)) = sources[source].pairs.next() {
            heap.push(Reverse(HeapEntry {
                key,
                value,
                timestamp: sources[source].timestamp,
                source,
            }));
        }
    }
    Ok(merged)
}
