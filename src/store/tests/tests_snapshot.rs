use super::{init_tracing, manual_flush_config, open_store};
use crate::store::Snapshot;
use tempfile::TempDir;

fn snapshot_pairs(snap: &Snapshot, lower: &[u8], upper: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    snap.visit(lower, upper, &mut |k: &[u8], v: &[u8]| {
        out.push((k.to_vec(), v.to_vec()))
    })
    .unwrap();
    out.sort();
    out
}

#[test]
fn test_snapshot_isolated_from_later_writes() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    store.put(b"k", b"v1").unwrap();
    let snap = store.snapshot().unwrap();

    store.put(b"k", b"v2").unwrap();
    store.put(b"later", b"x").unwrap();

    assert_eq!(snap.get(b"k").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(snap.get(b"later").unwrap(), None);
    assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_snapshot_unaffected_by_remove() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    store.put(b"k", b"v").unwrap();
    let snap = store.snapshot().unwrap();
    store.remove(b"k").unwrap();

    assert_eq!(store.get(b"k").unwrap(), None);
    assert_eq!(snap.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_snapshot_survives_compaction_of_its_files() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    for i in 0..10u32 {
        store
            .put(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())
            .unwrap();
    }
    let snap = store.snapshot().unwrap();

    // Force a cascade that unlinks the segment the snapshot holds open.
    store.put(b"extra-1", b"x").unwrap();
    store.flush().unwrap();
    store.put(b"extra-2", b"y").unwrap();
    store.flush().unwrap();
    assert_eq!(store.level_sizes()[0], 0);

    for i in 0..10u32 {
        assert_eq!(
            snap.get(format!("k{i:02}").as_bytes()).unwrap(),
            Some(format!("v{i}").into_bytes())
        );
    }
    assert_eq!(snap.get(b"extra-1").unwrap(), None);
}

#[test]
fn test_snapshot_visit_reflects_creation_time() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.remove(b"a").unwrap();
    let snap = store.snapshot().unwrap();
    store.put(b"c", b"3").unwrap();

    assert_eq!(
        snapshot_pairs(&snap, b"", b""),
        vec![(b"b".to_vec(), b"2".to_vec())]
    );
}

#[test]
fn test_gc_stands_down_while_snapshot_alive() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    store.put(b"k", b"old").unwrap();
    let snap = store.snapshot().unwrap();
    store.put(b"k", b"new").unwrap();
    store.flush().unwrap();

    assert!(!store.garbage_collect().unwrap());
    assert_eq!(store.level_sizes(), vec![2]);

    drop(snap);
    assert!(store.garbage_collect().unwrap());
    assert_eq!(store.level_sizes(), vec![1]);
    assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_two_snapshots_pin_independently() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp, manual_flush_config());

    store.put(b"k", b"v").unwrap();
    let first = store.snapshot().unwrap();
    let second = store.snapshot().unwrap();

    drop(first);
    assert!(!store.garbage_collect().unwrap());
    drop(second);
    assert!(store.garbage_collect().unwrap());
}
