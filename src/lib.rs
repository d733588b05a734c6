//! # fractree - External-Memory Fractal Tree
//!
//! `fractree` is an ordered key→value index for working sets that exceed
//! internal memory. It buffers inserts inside the tree's inner nodes and
//! flushes them downward in batches, so an insert costs asymptotically
//! fewer block transfers than a B-tree's while point lookups and range
//! scans stay logarithmic.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fractree::{AllocStrategy, FractalTree, MemStore};
//!
//! // 4 KiB blocks, 32 KiB of cached images.
//! let store = Arc::new(MemStore::new(4096));
//! let mut tree: FractalTree<u64, u64, MemStore, 4096, 32768> =
//!     FractalTree::new(store, AllocStrategy::Append)?;
//!
//! tree.insert(17, 1700)?;
//! assert_eq!(tree.find(17)?, Some(1700));
//! let hits = tree.range_find(0, 100)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   FractalTree (insert / find / range)   │
//! ├─────────────────────────────────────────┤
//! │   Node & leaf page views over blocks    │
//! ├────────────────────┬────────────────────┤
//! │  BlockCache (node) │ BlockCache (leaf)  │
//! ├────────────────────┴────────────────────┤
//! │   BlockStore: MemStore / FileStore      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every persisted object is exactly one fixed-size block. The caches are
//! exact-LRU over preallocated images and share a dirty set with the
//! engine; dirty blocks are written back before their images are reused.
//! The root's image stays resident for the tree's lifetime.
//!
//! ## Scope
//!
//! The engine is single-threaded: operations take `&mut self` and run to
//! completion on the calling thread, suspending only for block I/O. There
//! are no deletions, no transactions, and no crash recovery; the latest
//! insert for a key wins.

pub mod config;
pub mod ftree;
pub mod storage;

pub use ftree::{Datum, FractalTree, Key, Leaf, Node, Value, ValuesSearch};
pub use storage::{AllocStrategy, Bid, BlockCache, BlockStore, DirtySet, FileStore, MemStore,
    RawBlock};
