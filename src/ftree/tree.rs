//! # Fractal Tree Engine
//!
//! `FractalTree` ties the page layouts, the id→object maps, and the two
//! block caches into the index described in the module docs of
//! [`crate::ftree`].
//!
//! ## Insert Path
//!
//! ```text
//! 1. Root buffer has room → merge the value in, done.
//! 2. Root buffer full:
//!    - depth 1            → split_singular_root (two leaves, depth 2)
//!    - pivots ≥ half full → split_root (two nodes, depth + 1)
//!    - otherwise          → flush the root buffer one level down
//! 3. Merge the value into the now-roomy root buffer.
//! ```
//!
//! Flushing walks the buffer in pivot order and pushes each slice into its
//! child. A node child whose pivots are at least half full is split
//! *before* receiving items (the small-split invariant), so a flush pass
//! promotes at most one pivot per child and the flushing node's own pivot
//! array cannot overflow mid-pass. A leaf child that cannot take its slice
//! is split around the merged middle instead (`split_and_flush`).
//!
//! ## Read Paths
//!
//! `find` probes each node's buffer, then its pivots, descending until a
//! leaf. `range_find` first drains the buffers along the visited paths
//! (same pre-split guard as insert), so every matching value sits in its
//! final position before collection.
//!
//! ## Borrows and Eviction
//!
//! Every block access goes through a freshly attached view; nothing holds
//! an image reference across a cache operation. Where an algorithm needs
//! data across a potential eviction point (e.g. a buffer slice pushed into
//! a child), it copies the slice out first and re-loads afterwards.

use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;

use super::leaf::{Leaf, LeafMut};
use super::node::{Node, NodeMut, ValuesSearch};
use super::{Datum, Key, Value};
use crate::config::{
    leaf_cache_capacity, leaf_geometry, node_cache_capacity, node_geometry, MIN_CACHE_CAPACITY,
    MIN_LEAF_ITEMS, MIN_NODE_BUFFER_ITEMS, MIN_NODE_VALUES,
};
use crate::storage::{AllocStrategy, Bid, BlockCache, BlockStore, DirtySet, RawBlock};

const ROOT_ID: u32 = 0;

/// An external-memory fractal tree.
///
/// `BLOCK_SIZE` is the raw block size in bytes; `MEM_POOL_SIZE` the byte
/// budget for cached block images, split between the node and leaf caches.
/// Geometry violations (fanout below 5, unsplittable buffers, cache
/// capacity below 2) fail at compile time when the tree is instantiated.
pub struct FractalTree<K, D, S, const BLOCK_SIZE: usize, const MEM_POOL_SIZE: usize>
where
    K: Key,
    D: Datum,
    S: BlockStore,
{
    store: Arc<S>,
    alloc: AllocStrategy,
    depth: usize,
    root: Node,
    root_block: Box<RawBlock<BLOCK_SIZE>>,
    nodes: HashMap<u32, Node>,
    leaves: HashMap<u32, Leaf>,
    node_cache: BlockCache<S, BLOCK_SIZE>,
    leaf_cache: BlockCache<S, BLOCK_SIZE>,
    dirty: DirtySet,
    next_node_id: u32,
    next_leaf_id: u32,
    _kv: PhantomData<(K, D)>,
}

enum DescendStep<D> {
    Hit(Option<D>),
    Node(u32),
    Leaf(u32),
}

impl<K, D, S, const BLOCK_SIZE: usize, const MEM_POOL_SIZE: usize>
    FractalTree<K, D, S, BLOCK_SIZE, MEM_POOL_SIZE>
where
    K: Key,
    D: Datum,
    S: BlockStore,
{
    pub const MAX_VALUES_PER_NODE: usize = node_geometry::<K, D>(BLOCK_SIZE).max_values;
    pub const MAX_BUFFER_ITEMS_PER_NODE: usize = node_geometry::<K, D>(BLOCK_SIZE).max_buffer_items;
    pub const MAX_BUFFER_ITEMS_PER_LEAF: usize = leaf_geometry::<K, D>(BLOCK_SIZE).max_items;
    pub const NODE_CACHE_CAPACITY: usize = node_cache_capacity(MEM_POOL_SIZE, BLOCK_SIZE);
    pub const LEAF_CACHE_CAPACITY: usize = leaf_cache_capacity(MEM_POOL_SIZE, BLOCK_SIZE);

    const PARAMS_OK: () = {
        assert!(
            Self::MAX_VALUES_PER_NODE >= MIN_NODE_VALUES,
            "block size too small: a node must hold at least 5 pivot values"
        );
        assert!(
            Self::MAX_BUFFER_ITEMS_PER_NODE >= MIN_NODE_BUFFER_ITEMS,
            "block size too small: a node buffer must hold at least 2 items"
        );
        assert!(
            Self::MAX_BUFFER_ITEMS_PER_LEAF >= MIN_LEAF_ITEMS,
            "block size too small: a leaf must hold at least 2 items"
        );
        assert!(
            Self::NODE_CACHE_CAPACITY >= MIN_CACHE_CAPACITY,
            "memory pool too small: the node cache needs at least 2 slots"
        );
        assert!(
            Self::LEAF_CACHE_CAPACITY >= MIN_CACHE_CAPACITY,
            "memory pool too small: the leaf cache needs at least 2 slots"
        );
    };

    /// Creates an empty tree over `store`: a single root node with a
    /// resident block image, no children, no leaves.
    pub fn new(store: Arc<S>, alloc: AllocStrategy) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::PARAMS_OK;
        ensure!(
            store.block_size() == BLOCK_SIZE,
            "store block size {} does not match the tree's block size {}",
            store.block_size(),
            BLOCK_SIZE
        );

        let dirty = DirtySet::new();
        let node_cache =
            BlockCache::new(Arc::clone(&store), Self::NODE_CACHE_CAPACITY, dirty.clone());
        let leaf_cache =
            BlockCache::new(Arc::clone(&store), Self::LEAF_CACHE_CAPACITY, dirty.clone());

        Ok(Self {
            store,
            alloc,
            depth: 1,
            root: Node::new(ROOT_ID, Bid::INVALID),
            root_block: RawBlock::zeroed(),
            nodes: HashMap::new(),
            leaves: HashMap::new(),
            node_cache,
            leaf_cache,
            dirty,
            next_node_id: ROOT_ID + 1,
            next_leaf_id: 0,
            _kv: PhantomData,
        })
    }

    // ---- public API ---------------------------------------------------

    /// Inserts `(key, datum)`. Re-inserting a key overwrites its datum.
    pub fn insert(&mut self, key: K, datum: D) -> Result<()> {
        let root_buffer_full = self.node_mut(ROOT_ID)?.buffer_full();
        if root_buffer_full {
            if self.depth == 1 {
                self.split_singular_root()?;
            } else {
                let root_half_full = self.node_mut(ROOT_ID)?.values_at_least_half_full();
                if root_half_full {
                    // Splitting before flushing keeps the small-split
                    // invariant for the root itself.
                    self.split_root()?;
                } else if self.depth == 2 {
                    self.flush_bottom_buffer(ROOT_ID)?;
                } else {
                    self.flush_buffer(ROOT_ID, 1)?;
                }
            }
        }

        let mut root = self.node_mut(ROOT_ID)?;
        root.add_to_buffer(&[Value::new(key, datum)]);
        Ok(())
    }

    /// Point lookup. Buffered keys are found without touching a leaf.
    pub fn find(&mut self, key: K) -> Result<Option<D>> {
        let depth = self.depth;
        let mut node_id = ROOT_ID;
        let mut level = 1;
        loop {
            let step = {
                let node = self.node_mut(node_id)?;
                if let Some(datum) = node.buffer_find(&key) {
                    DescendStep::Hit(Some(datum))
                } else if node.num_values() == 0 {
                    // Only the singular root has no pivots.
                    DescendStep::Hit(None)
                } else {
                    match node.values_find(&key) {
                        ValuesSearch::Found(datum) => DescendStep::Hit(Some(datum)),
                        ValuesSearch::Descend(child) => {
                            if level == depth - 1 {
                                DescendStep::Leaf(child)
                            } else {
                                DescendStep::Node(child)
                            }
                        }
                    }
                }
            };
            match step {
                DescendStep::Hit(result) => return Ok(result),
                DescendStep::Leaf(leaf_id) => {
                    let leaf = self.leaf_mut(leaf_id)?;
                    return Ok(leaf.buffer_find(&key));
                }
                DescendStep::Node(child_id) => {
                    node_id = child_id;
                    level += 1;
                }
            }
        }
    }

    /// Returns every stored pair with `lower <= key <= upper`, ascending.
    ///
    /// Buffers along the visited paths are drained downward first so each
    /// match is read from its final position; the drain may grow the tree
    /// (same splits as the insert path) but always leaves the visited
    /// buffers empty.
    pub fn range_find(&mut self, lower: K, upper: K) -> Result<Vec<Value<K, D>>> {
        let mut out = Vec::new();
        if upper < lower {
            return Ok(out);
        }
        if self.depth == 1 {
            let root = self.node_mut(ROOT_ID)?;
            return Ok(root.buffer_range(&lower, &upper));
        }
        self.drain_root()?;
        self.collect_range(ROOT_ID, 1, lower, upper, &mut out)?;
        Ok(out)
    }

    /// Tree height; 1 means the tree is just the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Inner nodes, the root included.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len() + 1
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Writes every dirty cached block back to the store and returns how
    /// many were written. The caches also do this on drop; calling it
    /// explicitly surfaces write errors instead of swallowing them.
    pub fn flush(&mut self) -> Result<usize> {
        let nodes = self.node_cache.write_back_all()?;
        let leaves = self.leaf_cache.write_back_all()?;
        Ok(nodes + leaves)
    }

    /// Dumps the tree structure to stdout. Informational only.
    pub fn visualize(&mut self) -> Result<()> {
        let mut out = String::new();
        writeln!(
            out,
            "fractal tree: depth={} nodes={} leaves={}",
            self.depth,
            self.num_nodes(),
            self.num_leaves()
        )
        .expect("string write");
        self.render_subtree(ROOT_ID, 1, 1, &mut out)?;
        print!("{out}");
        Ok(())
    }

    // ---- object resolution --------------------------------------------

    fn node_mut(&mut self, id: u32) -> Result<NodeMut<'_, K, D, BLOCK_SIZE>> {
        if id == ROOT_ID {
            Ok(NodeMut::attach(&mut self.root, &mut *self.root_block))
        } else {
            let node = self.nodes.get_mut(&id).expect("unknown node id");
            let block = self.node_cache.load(node.bid())?;
            Ok(NodeMut::attach(node, block))
        }
    }

    fn leaf_mut(&mut self, id: u32) -> Result<LeafMut<'_, K, D, BLOCK_SIZE>> {
        let leaf = self.leaves.get_mut(&id).expect("unknown leaf id");
        let block = self.leaf_cache.load(leaf.bid())?;
        Ok(LeafMut::attach(leaf, block))
    }

    fn alloc_node(&mut self) -> Result<u32> {
        let bid = self.store.new_block(self.alloc)?;
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(id, Node::new(id, bid));
        Ok(id)
    }

    fn alloc_leaf(&mut self) -> Result<u32> {
        let bid = self.store.new_block(self.alloc)?;
        let id = self.next_leaf_id;
        self.next_leaf_id += 1;
        self.leaves.insert(id, Leaf::new(id, bid));
        Ok(id)
    }

    /// Marks a node's block dirty after a mutation. The root's image is
    /// engine-owned and never store-managed, so it is skipped.
    fn touch_node(&self, id: u32) {
        if id == ROOT_ID {
            return;
        }
        let node = self.nodes.get(&id).expect("unknown node id");
        self.dirty.insert(node.bid());
    }

    fn touch_leaf(&self, id: u32) {
        let leaf = self.leaves.get(&id).expect("unknown leaf id");
        self.dirty.insert(leaf.bid());
    }

    // ---- splits -------------------------------------------------------

    /// Depth 1 → 2: the root's full buffer becomes two leaves around a
    /// promoted middle item.
    fn split_singular_root(&mut self) -> Result<()> {
        let left_id = self.alloc_leaf()?;
        let right_id = self.alloc_leaf()?;

        let (left_items, pivot, right_items) = {
            let root = self.node_mut(ROOT_ID)?;
            let n = root.num_buffer_items();
            let mid = (n - 1) / 2;
            (
                root.buffer_items(0, mid),
                root.buffer_item(mid),
                root.buffer_items(mid + 1, n),
            )
        };

        {
            let mut left = self.leaf_mut(left_id)?;
            left.set_buffer(&left_items);
        }
        self.touch_leaf(left_id);
        {
            let mut right = self.leaf_mut(right_id)?;
            right.set_buffer(&right_items);
        }
        self.touch_leaf(right_id);

        let mut root = self.node_mut(ROOT_ID)?;
        root.clear_buffer();
        root.add_to_values(pivot, left_id, right_id);
        self.depth += 1;
        Ok(())
    }

    /// Depth d → d+1: the root's pivots and buffer are partitioned into
    /// two fresh nodes around the middle pivot.
    fn split_root(&mut self) -> Result<()> {
        let left_id = self.alloc_node()?;
        let right_id = self.alloc_node()?;

        let (pivot, left_values, left_children, right_values, right_children, left_buf, right_buf) = {
            let root = self.node_mut(ROOT_ID)?;
            let n = root.num_values();
            let mid = (n - 1) / 2;
            let pivot = root.value_at(mid);
            (
                pivot,
                root.values(0, mid),
                root.child_ids(0, mid + 1),
                root.values(mid + 1, n),
                root.child_ids(mid + 1, n + 1),
                root.buffer_items_less_than(&pivot.key),
                root.buffer_items_greater_equal_than(&pivot.key),
            )
        };

        {
            let mut left = self.node_mut(left_id)?;
            left.set_values_and_children(&left_values, &left_children);
            left.set_buffer(&left_buf);
        }
        self.touch_node(left_id);
        {
            let mut right = self.node_mut(right_id)?;
            right.set_values_and_children(&right_values, &right_children);
            right.set_buffer(&right_buf);
        }
        self.touch_node(right_id);

        let mut root = self.node_mut(ROOT_ID)?;
        root.clear();
        root.add_to_values(pivot, left_id, right_id);
        self.depth += 1;
        Ok(())
    }

    /// Splits an at-least-half-full inner child around its middle pivot,
    /// writing the promoted pivot into `parent_id`.
    fn split_node_child(&mut self, parent_id: u32, child_id: u32) -> Result<()> {
        let right_id = self.alloc_node()?;

        let (pivot, left_values, left_children, right_values, right_children, left_buf, right_buf) = {
            let child = self.node_mut(child_id)?;
            let n = child.num_values();
            let mid = (n - 1) / 2;
            let pivot = child.value_at(mid);
            (
                pivot,
                child.values(0, mid),
                child.child_ids(0, mid + 1),
                child.values(mid + 1, n),
                child.child_ids(mid + 1, n + 1),
                child.buffer_items_less_than(&pivot.key),
                child.buffer_items_greater_equal_than(&pivot.key),
            )
        };

        {
            let mut child = self.node_mut(child_id)?;
            child.clear();
            child.set_values_and_children(&left_values, &left_children);
            child.set_buffer(&left_buf);
        }
        self.touch_node(child_id);
        {
            let mut right = self.node_mut(right_id)?;
            right.set_values_and_children(&right_values, &right_children);
            right.set_buffer(&right_buf);
        }
        self.touch_node(right_id);

        {
            let mut parent = self.node_mut(parent_id)?;
            parent.add_to_values(pivot, child_id, right_id);
        }
        self.touch_node(parent_id);
        Ok(())
    }

    /// Merges a buffer slice into a leaf that cannot take it whole: the
    /// combined run splits into the old leaf and a fresh right sibling
    /// around a promoted middle value.
    fn split_and_flush_leaf(
        &mut self,
        parent_id: u32,
        leaf_id: u32,
        items: &[Value<K, D>],
    ) -> Result<()> {
        let right_id = self.alloc_leaf()?;

        let combined = {
            let leaf = self.leaf_mut(leaf_id)?;
            super::node::merge_new_into(items, &leaf.all_buffer_items())
        };
        let mid = (combined.len() - 1) / 2;

        {
            let mut left = self.leaf_mut(leaf_id)?;
            left.set_buffer(&combined[..mid]);
        }
        self.touch_leaf(leaf_id);
        {
            let mut right = self.leaf_mut(right_id)?;
            right.set_buffer(&combined[mid + 1..]);
        }
        self.touch_leaf(right_id);

        {
            let mut parent = self.node_mut(parent_id)?;
            parent.add_to_values(combined[mid], leaf_id, right_id);
        }
        self.touch_node(parent_id);
        Ok(())
    }

    // ---- flushes ------------------------------------------------------

    /// Pushes a node's buffered items into its leaf children. `node_id`'s
    /// children must be leaves.
    fn flush_bottom_buffer(&mut self, node_id: u32) -> Result<()> {
        let mut num_children = self.node_mut(node_id)?.num_children();
        let mut i = 0;
        let mut high = 0;
        while i < num_children {
            let low = high;
            let (new_high, leaf_id) = {
                let node = self.node_mut(node_id)?;
                (node.index_of_upper_bound_of_buffer(i), node.child_id(i))
            };
            high = new_high;

            if high > low {
                let items = self.node_mut(node_id)?.buffer_items(low, high);
                let space = self.leaf_mut(leaf_id)?.remaining_capacity();
                if items.len() <= space {
                    let mut leaf = self.leaf_mut(leaf_id)?;
                    leaf.add_to_buffer(&items);
                    drop(leaf);
                    self.touch_leaf(leaf_id);
                } else {
                    self.split_and_flush_leaf(node_id, leaf_id, &items)?;
                }
            }

            i += 1;
            // A leaf split inserts a pivot, so the child count can grow.
            num_children = self.node_mut(node_id)?.num_children();
        }

        self.node_mut(node_id)?.clear_buffer();
        self.touch_node(node_id);
        Ok(())
    }

    /// Pushes a node's buffered items into its node children, recursing
    /// when a child's buffer cannot take its slice. `level` is the node's
    /// distance from the root (root = 1); children are nodes, i.e.
    /// `level <= depth - 2`.
    fn flush_buffer(&mut self, node_id: u32, level: usize) -> Result<()> {
        let mut num_children = self.node_mut(node_id)?.num_children();
        let mut i = 0;
        let mut high = 0;
        while i < num_children {
            let low = high;
            high = self.node_mut(node_id)?.index_of_upper_bound_of_buffer(i);

            if high > low {
                let child_id = self.node_mut(node_id)?.child_id(i);

                let needs_presplit = self.node_mut(child_id)?.values_at_least_half_full();
                if needs_presplit {
                    // Small-split invariant: pre-split the child so any
                    // recursive flush promotes at most one pivot into it.
                    self.split_node_child(node_id, child_id)?;
                    // The child now covers a narrower key range.
                    high = self.node_mut(node_id)?.index_of_upper_bound_of_buffer(i);
                }

                if high > low {
                    let space = {
                        let child = self.node_mut(child_id)?;
                        child.max_buffer_items() - child.num_buffer_items()
                    };
                    let to_push = high - low;

                    if to_push <= space {
                        let items = self.node_mut(node_id)?.buffer_items(low, high);
                        let mut child = self.node_mut(child_id)?;
                        child.add_to_buffer(&items);
                        drop(child);
                        self.touch_node(child_id);
                    } else {
                        // Fill the child, flush it, then push the rest.
                        // The slices are scoped so the full run is never
                        // held across the recursive flush.
                        {
                            let items = self.node_mut(node_id)?.buffer_items(low, low + space);
                            let mut child = self.node_mut(child_id)?;
                            child.add_to_buffer(&items);
                        }
                        self.touch_node(child_id);

                        if level == self.depth - 2 {
                            self.flush_bottom_buffer(child_id)?;
                        } else {
                            self.flush_buffer(child_id, level + 1)?;
                        }

                        {
                            let items = self.node_mut(node_id)?.buffer_items(low + space, high);
                            let mut child = self.node_mut(child_id)?;
                            child.add_to_buffer(&items);
                        }
                        self.touch_node(child_id);
                    }
                }
            }

            i += 1;
            // A pre-split inserts a pivot, so the child count can grow.
            num_children = self.node_mut(node_id)?.num_children();
        }

        self.node_mut(node_id)?.clear_buffer();
        self.touch_node(node_id);
        Ok(())
    }

    // ---- range scan ---------------------------------------------------

    /// Empties the root's buffer before a range descent, with the same
    /// pre-split guard as the insert path.
    fn drain_root(&mut self) -> Result<()> {
        let buffered = self.node_mut(ROOT_ID)?.num_buffer_items();
        if buffered == 0 {
            return Ok(());
        }
        let root_half_full = self.node_mut(ROOT_ID)?.values_at_least_half_full();
        if root_half_full {
            // Partitions the buffer into the two new children; the root's
            // buffer is empty afterwards.
            self.split_root()
        } else if self.depth == 2 {
            self.flush_bottom_buffer(ROOT_ID)
        } else {
            self.flush_buffer(ROOT_ID, 1)
        }
    }

    /// Empties a node child's buffer before descending into it.
    fn drain_child(&mut self, parent_id: u32, child_id: u32, child_level: usize) -> Result<()> {
        let buffered = self.node_mut(child_id)?.num_buffer_items();
        if buffered == 0 {
            return Ok(());
        }
        let child_half_full = self.node_mut(child_id)?.values_at_least_half_full();
        if child_half_full {
            self.split_node_child(parent_id, child_id)?;
        }
        // The split moved the upper part of the buffer to the new sibling
        // (drained when the scan reaches it); flush whatever remains here.
        let buffered = self.node_mut(child_id)?.num_buffer_items();
        if buffered == 0 {
            return Ok(());
        }
        if child_level == self.depth - 1 {
            self.flush_bottom_buffer(child_id)
        } else {
            self.flush_buffer(child_id, child_level)
        }
    }

    /// Appends every stored pair in `[lo, hi]` under `node_id`, ascending:
    /// child 0, pivot 0, child 1, pivot 1, ... Children re-resolve every
    /// iteration because draining a child can split it and insert a pivot.
    fn collect_range(
        &mut self,
        node_id: u32,
        level: usize,
        lo: K,
        hi: K,
        out: &mut Vec<Value<K, D>>,
    ) -> Result<()> {
        let leaves_below = level == self.depth - 1;
        let mut i = 0;
        loop {
            let child = {
                let node = self.node_mut(node_id)?;
                if i >= node.num_children() {
                    None
                } else {
                    let low_bound = if i == 0 {
                        None
                    } else {
                        Some(node.value_at(i - 1).key)
                    };
                    let high_bound = if i < node.num_values() {
                        Some(node.value_at(i).key)
                    } else {
                        None
                    };
                    Some((node.child_id(i), low_bound, high_bound))
                }
            };
            let Some((child_id, low_bound, high_bound)) = child else {
                break;
            };

            // Child i covers [low_bound, high_bound).
            let intersects = low_bound.map_or(true, |b| b <= hi)
                && high_bound.map_or(true, |b| lo < b);
            if intersects {
                if leaves_below {
                    let matches = {
                        let leaf = self.leaf_mut(child_id)?;
                        leaf.buffer_range(&lo, &hi)
                    };
                    out.extend(matches);
                } else {
                    self.drain_child(node_id, child_id, level + 1)?;
                    self.collect_range(child_id, level + 1, lo, hi, out)?;
                }
            }

            // The pivot right of child i, re-read after a possible split.
            let pivot = {
                let node = self.node_mut(node_id)?;
                (i < node.num_values()).then(|| node.value_at(i))
            };
            if let Some(p) = pivot {
                if lo <= p.key && p.key <= hi {
                    out.push(p);
                }
            }

            i += 1;
        }
        Ok(())
    }

    // ---- visualization ------------------------------------------------

    fn render_subtree(
        &mut self,
        node_id: u32,
        level: usize,
        indent: usize,
        out: &mut String,
    ) -> Result<()> {
        let (line, children) = {
            let node = self.node_mut(node_id)?;
            let pivots: Vec<K> = (0..node.num_values()).map(|i| node.value_at(i).key).collect();
            let line = format!(
                "{:indent$}node {}: buffer {}/{} pivots {:?}\n",
                "",
                node.id(),
                node.num_buffer_items(),
                node.max_buffer_items(),
                pivots,
                indent = indent * 2,
            );
            (line, node.child_ids(0, node.num_children()))
        };
        out.push_str(&line);

        if level == self.depth - 1 {
            for leaf_id in children {
                let leaf = self.leaf_mut(leaf_id)?;
                let line = format!(
                    "{:indent$}leaf {}: {}/{} items\n",
                    "",
                    leaf.id(),
                    leaf.num_buffer_items(),
                    leaf.max_buffer_items(),
                    indent = (level + 1) * 2,
                );
                out.push_str(&line);
            }
        } else {
            for child_id in children {
                self.render_subtree(child_id, level + 1, indent + 1, out)?;
            }
        }
        Ok(())
    }
}
