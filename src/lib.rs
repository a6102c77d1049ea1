//! Cairn - the storage engine core of a disk-oriented RDBMS
//!
//! This crate provides the primitives every higher database layer relies
//! on: a fixed-size page cache between volatile memory and a
//! page-addressed disk, and a B+ tree index built on top of it.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and reserved-page formats
//!   - `DiskManager`: reads, writes, allocates and recycles pages in a
//!     single database file
//!   - `DiskScheduler`: background worker that serializes page I/O
//!   - `HeaderPage`: page 0, mapping index names to root page ids
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames and writes dirty
//!     victims back on eviction
//!   - `LruKReplacer`: LRU-K victim selection over evictable frames
//!   - `FrameHeader`: per-frame metadata, buffer and frame latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pairing of pin and latch
//!
//! - **Containers** (`container`): `ExtendibleHashTable`, the dynamically
//!   growing directory/bucket map used as the pool's page table
//!
//! - **Index** (`index`): `BPlusTree`, a persistent ordered unique
//!   key -> RecordId mapping with point lookup, range iteration, and
//!   latch-crabbing concurrency
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cairn::buffer::BufferPoolManager;
//! use cairn::index::{BPlusTree, IntegerComparator};
//! use cairn::storage::disk::DiskManager;
//! use cairn::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let tree = BPlusTree::new(
//!     "orders_pk",
//!     Arc::clone(&bpm),
//!     Arc::new(IntegerComparator),
//!     64,
//!     64,
//! )
//! .unwrap();
//!
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(42).unwrap().is_some());
//!
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{CairnError, FrameId, IndexKey, PageId, RecordId, Result, SlotId};
