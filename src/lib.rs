//! # StrataDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture: a WAL-backed
//! in-memory skip list in front of leveled, immutable, bloom-filtered
//! segments on disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Store, StoreConfig};
//!
//! let mut store = Store::open("/tmp/my_store", StoreConfig::default()).unwrap();
//!
//! // Write
//! store.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! assert!(store.remove(b"hello").unwrap());
//! assert_eq!(store.get(b"hello").unwrap(), None);
//!
//! // Range scan (inclusive bounds, empty bound = unbounded)
//! store.put(b"a", b"1").unwrap();
//! store.put(b"b", b"2").unwrap();
//! store.visit(b"a", b"c", &mut |key, value| {
//!     println!("{:?} = {:?}", key, value);
//! }).unwrap();
//!
//! // Point-in-time view
//! let snap = store.snapshot().unwrap();
//! store.put(b"a", b"overwritten").unwrap();
//! assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
//! ```
//!
//! ## Features
//!
//! - **Write-ahead logging**: every mutation is fsynced before acknowledgement.
//! - **Leveled compaction**: overflowing levels cascade through a k-way merge
//!   into disjoint, size-bounded segments.
//! - **Bloom filters**: fast negative lookups on every segment.
//! - **Crash recovery**: the memtable replays its WAL and the levels rebuild
//!   from the directory tree on restart, torn trailing writes dropped.
//! - **Snapshots**: cheap frozen views that stay readable across compaction.
//! - **Garbage collection**: on-demand rewrite of segments to shed entries
//!   shadowed by newer layers.

pub(crate) mod bloom;
pub(crate) mod memtable;
pub(crate) mod segment;
pub(crate) mod store;
pub(crate) mod types;
pub(crate) mod wal;

pub use store::{Snapshot, Store, StoreConfig, StoreError};
