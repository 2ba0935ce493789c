use crate::wal::Wal;
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

#[test]
fn test_append_and_replay_round_trip() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mem.log");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(b"alpha", b"1").unwrap();
        wal.append(b"beta", b"2").unwrap();
        wal.append(b"gamma", b"3").unwrap();
    }

    let mut wal = Wal::open(&path).unwrap();
    let records = wal.replay().unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0], (b"alpha".to_vec(), b"1".to_vec()));
    assert_eq!(records[1], (b"beta".to_vec(), b"2".to_vec()));
    assert_eq!(records[2], (b"gamma".to_vec(), b"3".to_vec()));
}

#[test]
fn test_replay_empty_wal() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let mut wal = Wal::open(tmp.path().join("mem.log")).unwrap();
    assert!(wal.replay().unwrap().is_empty());
}

#[test]
fn test_tombstone_record_has_empty_value() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mem.log");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(b"doomed", b"value").unwrap();
        wal.append(b"doomed", b"").unwrap();
    }

    let mut wal = Wal::open(&path).unwrap();
    let records = wal.replay().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[1].1.is_empty());
}

#[test]
fn test_append_after_replay_continues_log() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mem.log");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(b"a", b"1").unwrap();
    }
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.replay().unwrap();
        wal.append(b"b", b"2").unwrap();
    }

    let mut wal = Wal::open(&path).unwrap();
    let records = wal.replay().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].0, b"b".to_vec());
}
