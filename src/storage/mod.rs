//! # Storage Layer
//!
//! The storage layer provides everything below the tree engine: block
//! identity, raw block images, backing stores, and the LRU block cache.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Fractal tree engine           │
//! ├──────────────────────────────────────┤
//! │  BlockCache (nodes) │ BlockCache     │
//! │  exact LRU, dirty   │ (leaves)       │
//! │  tracking           │                │
//! ├──────────────────────────────────────┤
//! │  BlockStore: MemStore / FileStore    │
//! └──────────────────────────────────────┘
//! ```
//!
//! Every persisted object is exactly one fixed-size raw block, identified
//! by an opaque [`Bid`]. The caches guarantee at most one in-memory image
//! per bid and write dirty images back before recycling them. The stores
//! perform synchronous, bounds-checked block I/O behind `&self`, so one
//! `Arc<Store>` serves the tree and both of its caches.
//!
//! ## Module Organization
//!
//! - `block`: `Bid`, `RawBlock`, `AllocStrategy`, the `BlockStore` trait
//! - `mem`: heap-backed store for tests and ephemeral trees
//! - `file`: memory-mapped single-file store
//! - `cache`: exact-LRU block cache and the shared dirty set

mod block;
mod cache;
mod file;
mod mem;

pub use block::{AllocStrategy, Bid, BlockStore, RawBlock};
pub use cache::{BlockCache, DirtySet};
pub use file::FileStore;
pub use mem::MemStore;
