//! Compile-time configuration and geometry derivation.

mod constants;

pub use constants::{
    leaf_cache_capacity, leaf_geometry, node_cache_capacity, node_geometry, value_size,
    LeafGeometry, NodeGeometry, CHILD_ID_SIZE, MIN_CACHE_CAPACITY, MIN_LEAF_ITEMS,
    MIN_NODE_BUFFER_ITEMS, MIN_NODE_VALUES,
};
