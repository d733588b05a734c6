//! # Fractal Tree Index
//!
//! This module implements the fractal tree: an ordered key→value index
//! whose working set lives in a block store and whose inserts cost
//! asymptotically fewer block transfers than a B-tree's.
//!
//! ## Architecture Overview
//!
//! Every inner node carries, besides its sorted pivot values and child
//! ids, a sorted *message buffer* of pending inserts. An insert lands in
//! the root's buffer in O(1) block touches; only when a buffer fills does
//! it get flushed one level down, amortizing each block write across many
//! keys. Lookups stay logarithmic because a buffered key is found in the
//! buffer of some node on the root-to-leaf path.
//!
//! ```text
//!        root:  [buffer | pivots | children]
//!               /                \
//!   node: [buffer|pivots|children]  ...        ← flush pushes buffered
//!        /            \                          items downward
//!   leaf: [values]   leaf: [values]            ← actual stored data
//! ```
//!
//! ## Node Splitting
//!
//! Splits keep the tree shallow-growing and flush-safe:
//!
//! - A depth-1 root with a full buffer splits into two leaves around a
//!   promoted middle item (`depth 1 → 2`).
//! - A root with at-least-half-full pivots splits into two nodes before
//!   any flushing (`depth d → d+1`).
//! - Before a node's buffer is flushed into a child, any child whose
//!   pivots are at least half full is pre-split. This *small-split
//!   invariant* bounds a flush to at most one promoted pivot per child,
//!   so a single flush pass can never overflow the parent's pivots.
//!
//! ## Identity and Re-Attachment
//!
//! Parents reference children by integer id, resolved through id→object
//! maps, never by in-memory pointer: a child's block image may be evicted
//! and reloaded at a different address under the same id. A page view
//! (`NodeMut`, `LeafMut`) therefore borrows its image only until the next
//! cache operation; the borrow checker enforces re-attachment at every
//! potential eviction point.
//!
//! ## Module Organization
//!
//! - `node`: inner-node metadata, page view, and sorted-merge helpers
//! - `leaf`: leaf metadata and page view
//! - `tree`: the engine (insert, find, range_find, splits, flushes)

mod leaf;
mod node;
mod tree;

use std::fmt::Debug;

use zerocopy::{FromBytes, Immutable, IntoBytes};

pub use leaf::{Leaf, LeafMut};
pub use node::{merge_new_into, Node, NodeMut, ValuesSearch};
pub use tree::FractalTree;

/// Key bound: totally ordered, plain-old-data, fixed-size.
///
/// Blanket-implemented; all integer types qualify, as does any
/// `#[derive(FromBytes, IntoBytes, Immutable)]` POD struct with an `Ord`.
pub trait Key: Ord + Copy + Debug + FromBytes + IntoBytes + Immutable {}
impl<T: Ord + Copy + Debug + FromBytes + IntoBytes + Immutable> Key for T {}

/// Datum bound: plain-old-data, fixed-size, default-constructible.
pub trait Datum: Copy + Debug + Default + FromBytes + IntoBytes + Immutable {}
impl<T: Copy + Debug + Default + FromBytes + IntoBytes + Immutable> Datum for T {}

/// One stored pair. Ordered and compared by key only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<K, D> {
    pub key: K,
    pub datum: D,
}

impl<K, D> Value<K, D> {
    pub fn new(key: K, datum: D) -> Self {
        Self { key, datum }
    }
}
