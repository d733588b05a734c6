//! # Geometry Constants
//!
//! This module derives every capacity in the system from two compile-time
//! inputs: the raw block size and the in-memory pool size. Constants that
//! depend on each other are derived together here so a change to one input
//! cannot leave a dependent value stale.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE, size_of::<K>() + size_of::<D>()  (= VALUE_SIZE)
//!       │
//!       ├─> MAX_VALUES (node fanout − 1)
//!       │     = ⌊√(BLOCK_SIZE / VALUE_SIZE) / 2⌋
//!       │     Square-root fanout leaves most of the block to the message
//!       │     buffer; the /2 keeps room for a buffer at all once child
//!       │     ids are accounted for.
//!       │
//!       ├─> MAX_BUFFER_ITEMS (node message buffer)
//!       │     = ⌊(BLOCK_SIZE − MAX_VALUES·VALUE_SIZE
//!       │                    − (MAX_VALUES+1)·CHILD_ID_SIZE) / VALUE_SIZE⌋
//!       │
//!       └─> MAX_LEAF_ITEMS = ⌊BLOCK_SIZE / VALUE_SIZE⌋
//!
//! MEM_POOL_SIZE, BLOCK_SIZE
//!       │
//!       ├─> NODE_CACHE_CAPACITY = MEM_POOL_SIZE / (2·BLOCK_SIZE) − 1
//!       │     One pool slot is reserved for the root's resident image.
//!       │
//!       └─> LEAF_CACHE_CAPACITY = MEM_POOL_SIZE / (2·BLOCK_SIZE)
//! ```
//!
//! ## Critical Invariants
//!
//! Checked at tree instantiation (monomorphization-time `const` asserts):
//!
//! 1. `MAX_VALUES >= 5`: pre-splitting children at `(MAX_VALUES + 1) / 2`
//!    pivots must leave both halves with at least one pivot, while a
//!    below-threshold parent plus one promoted pivot per child stays
//!    within `MAX_VALUES` during a flush; both hold only from fanout 5 up
//! 2. `MAX_BUFFER_ITEMS >= 2`: a buffer must be splittable around a mid
//! 3. `MAX_LEAF_ITEMS >= 2`: same for leaves
//! 4. both cache capacities `>= 2`: eviction needs a victim and a loader
//!
//! A block size too small for the chosen key/datum types fails to compile
//! rather than failing at runtime.

use std::mem::size_of;

/// Bytes of one serialized child identifier inside a node block.
pub const CHILD_ID_SIZE: usize = size_of::<u32>();

/// Smallest fanout for which the small-split invariant is self-sustaining
/// (see the module docs).
pub const MIN_NODE_VALUES: usize = 5;

/// A node buffer must hold at least a splittable pair.
pub const MIN_NODE_BUFFER_ITEMS: usize = 2;

/// A leaf must hold at least a splittable pair.
pub const MIN_LEAF_ITEMS: usize = 2;

/// Caches below this capacity cannot evict and reload at the same time.
pub const MIN_CACHE_CAPACITY: usize = 2;

/// Bytes of one serialized `(key, datum)` pair.
pub const fn value_size<K, D>() -> usize {
    size_of::<K>() + size_of::<D>()
}

/// Byte offsets and capacities of the node block layout.
///
/// A node block packs, in order: the message buffer, the pivot values, and
/// the child identifiers. Counts live in the in-memory node object, so the
/// block carries arrays only and bytes past the logical lengths are
/// unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeGeometry {
    pub value_size: usize,
    pub max_values: usize,
    pub max_buffer_items: usize,
    pub buffer_offset: usize,
    pub values_offset: usize,
    pub children_offset: usize,
}

/// Capacity of the leaf block layout: one sorted array of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafGeometry {
    pub value_size: usize,
    pub max_items: usize,
}

const fn isqrt(n: usize) -> usize {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Derives the node layout for a key/datum pair inside `block_size` bytes.
pub const fn node_geometry<K, D>(block_size: usize) -> NodeGeometry {
    let vs = value_size::<K, D>();
    let max_values = isqrt(block_size / vs) / 2;
    let fixed = max_values * vs + (max_values + 1) * CHILD_ID_SIZE;
    let max_buffer_items = (block_size - fixed) / vs;
    NodeGeometry {
        value_size: vs,
        max_values,
        max_buffer_items,
        buffer_offset: 0,
        values_offset: max_buffer_items * vs,
        children_offset: max_buffer_items * vs + max_values * vs,
    }
}

/// Derives the leaf layout for a key/datum pair inside `block_size` bytes.
pub const fn leaf_geometry<K, D>(block_size: usize) -> LeafGeometry {
    let vs = value_size::<K, D>();
    LeafGeometry {
        value_size: vs,
        max_items: block_size / vs,
    }
}

/// Block images the node cache may hold; one pool slot stays with the root.
pub const fn node_cache_capacity(mem_pool_size: usize, block_size: usize) -> usize {
    mem_pool_size / (2 * block_size) - 1
}

/// Block images the leaf cache may hold.
pub const fn leaf_cache_capacity(mem_pool_size: usize, block_size: usize) -> usize {
    mem_pool_size / (2 * block_size)
}
