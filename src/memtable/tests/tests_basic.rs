use super::{init_tracing, open_memtable};
use crate::memtable::MemtableError;
use crate::types::Lookup;
use tempfile::TempDir;

#[test]
fn test_put_and_get() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 1 << 20);

    table.put(b"key1", b"value1").unwrap();
    assert_eq!(table.get(b"key1").unwrap(), Lookup::Hit(b"value1".to_vec()));
    assert_eq!(table.get(b"key2").unwrap(), Lookup::Miss);
}

#[test]
fn test_overwrite_replaces_value_without_growing_count() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 1 << 20);

    table.put(b"a", b"old").unwrap();
    table.put(b"a", b"new-value").unwrap();

    assert_eq!(table.get(b"a").unwrap(), Lookup::Hit(b"new-value".to_vec()));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_tombstone_is_a_hit_internally() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 1 << 20);

    table.put(b"k", b"v").unwrap();
    table.put(b"k", b"").unwrap();

    assert_eq!(table.get(b"k").unwrap(), Lookup::Tombstone);
    // Still one entry: the tombstone shadows, it does not erase.
    assert_eq!(table.len(), 1);
}

#[test]
fn test_keys_sorted_at_bottom_tier() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 1 << 20);

    for key in [&b"mango"[..], b"apple", b"zebra", b"kiwi", b"banana"] {
        table.put(key, b"x").unwrap();
    }

    let index = table.index_entries();
    let keys: Vec<_> = index.iter().map(|e| e.key.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(keys.len(), 5);
}

#[test]
fn test_flush_required_leaves_table_untouched() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 128);

    table.put(b"first", b"fits").unwrap();
    let size_before = table.total_size();

    let big = vec![b'v'; 256];
    match table.put(b"second", &big) {
        Err(MemtableError::FlushRequired) => {}
        other => panic!("expected FlushRequired, got {other:?}"),
    }

    assert_eq!(table.total_size(), size_before);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(b"second").unwrap(), Lookup::Miss);
}

#[test]
fn test_oversized_entry_admitted_into_empty_table() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 64);

    // Larger than the whole capacity: flushing could never make room, so
    // an empty table takes it anyway.
    let big = vec![b'v'; 1024];
    table.put(b"huge", &big).unwrap();
    assert_eq!(table.get(b"huge").unwrap(), Lookup::Hit(big));
}

#[test]
fn test_many_keys_random_order() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut table = open_memtable(&tmp, 1 << 22);

    for i in (0..500u32).rev() {
        let key = format!("key-{i:05}");
        let value = format!("value-{i}");
        table.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    assert_eq!(table.len(), 500);
    for i in 0..500u32 {
        let key = format!("key-{i:05}");
        assert_eq!(
            table.get(key.as_bytes()).unwrap(),
            Lookup::Hit(format!("value-{i}").into_bytes())
        );
    }
}
