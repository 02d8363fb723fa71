//! Crio - An embedded storage engine in Rust
//!
//! This crate provides the core components of a disk-oriented storage
//! engine: a fixed-capacity buffer pool with LRU-K replacement, an
//! asynchronous per-page disk I/O scheduler, and a persistent B+ tree index
//! built entirely on top of the buffer pool.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O
//!   - `DiskManager`: Reads and writes pages to/from a backing file
//!   - `DiskScheduler`: Asynchronous disk I/O scheduling
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards for thread-safe page access
//!
//! - **Index** (`index`): A generic, persistent B+ tree
//!   - `BPlusTree<K, V>`: get/put/delete/range-scan/iterate over any
//!     fixed-width-encodable key and value
//!
//! # Example
//!
//! ```rust,no_run
//! use crio::index::BPlusTree;
//!
//! let tree = BPlusTree::<i32, i32>::open("test.db").unwrap();
//!
//! tree.put(1, 100).unwrap();
//! tree.put(2, 200).unwrap();
//!
//! assert_eq!(tree.get(&1).unwrap(), Some(100));
//!
//! for entry in tree.iterator().unwrap() {
//!     let (key, value) = entry.unwrap();
//!     println!("{key} -> {value}");
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{CrioError, PageId, Result};
