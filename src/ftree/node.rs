//! Inner-node metadata and page layout.
//!
//! A node block packs three arrays at offsets computed from the geometry:
//!
//! ```text
//! +-----------------------------+----------------+--------------------+
//! | buffer: [value; B_n]        | values: [V_n]  | childIDs: [V_n+1]  |
//! +-----------------------------+----------------+--------------------+
//! ```
//!
//! `buffer` holds pending messages sorted by key, `values` the routing
//! pivots (each with a datum, answering finds at this level), `childIDs`
//! the ids of the `num_values + 1` children. The logical lengths live in
//! the in-memory [`Node`] object; block bytes past them are unspecified.

use std::marker::PhantomData;
use std::mem::size_of;

use smallvec::SmallVec;
use zerocopy::{FromBytes, IntoBytes};

use super::{Datum, Key, Value};
use crate::config::{node_geometry, NodeGeometry, CHILD_ID_SIZE};
use crate::storage::{Bid, RawBlock};

/// In-memory identity and logical lengths of one inner node.
///
/// Two nodes are the same node iff their ids match; the block image behind
/// `bid` may come and go from the cache while this object persists.
#[derive(Debug)]
pub struct Node {
    id: u32,
    bid: Bid,
    num_buffer_items: usize,
    num_values: usize,
}

impl Node {
    pub(crate) fn new(id: u32, bid: Bid) -> Self {
        Self {
            id,
            bid,
            num_buffer_items: 0,
            num_values: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn bid(&self) -> Bid {
        self.bid
    }

    pub fn num_buffer_items(&self) -> usize {
        self.num_buffer_items
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    /// `num_values + 1` children once the node has routed at all.
    pub fn num_children(&self) -> usize {
        if self.num_values == 0 {
            0
        } else {
            self.num_values + 1
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

/// Outcome of probing a node's pivot values for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesSearch<D> {
    /// The key is a pivot at this level; here is its datum.
    Found(D),
    /// Not at this level; continue in the child with this id.
    Descend(u32),
}

/// A node object attached to its block image.
///
/// The view is valid until the next cache operation; after anything that
/// can evict, re-attach through a fresh load.
pub struct NodeMut<'a, K, D, const BS: usize> {
    meta: &'a mut Node,
    data: &'a mut [u8],
    _kv: PhantomData<(K, D)>,
}

impl<'a, K: Key, D: Datum, const BS: usize> NodeMut<'a, K, D, BS> {
    pub const GEO: NodeGeometry = node_geometry::<K, D>(BS);

    pub fn attach(meta: &'a mut Node, block: &'a mut RawBlock<BS>) -> Self {
        Self {
            meta,
            data: block.bytes_mut(),
            _kv: PhantomData,
        }
    }

    pub fn id(&self) -> u32 {
        self.meta.id
    }

    pub fn num_buffer_items(&self) -> usize {
        self.meta.num_buffer_items
    }

    pub fn num_values(&self) -> usize {
        self.meta.num_values
    }

    pub fn num_children(&self) -> usize {
        self.meta.num_children()
    }

    pub fn max_buffer_items(&self) -> usize {
        Self::GEO.max_buffer_items
    }

    pub fn buffer_full(&self) -> bool {
        self.meta.num_buffer_items == Self::GEO.max_buffer_items
    }

    pub fn values_full(&self) -> bool {
        self.meta.num_values == Self::GEO.max_values
    }

    /// The small-split threshold: `(V_n + 1) / 2` pivots or more. Children
    /// at or past it are split before receiving a flush, which bounds the
    /// pivots a parent can gain in one flush pass to one per child.
    pub fn values_at_least_half_full(&self) -> bool {
        self.meta.num_values >= (Self::GEO.max_values + 1) / 2
    }

    // ---- queries ------------------------------------------------------

    /// Binary-searches the message buffer.
    pub fn buffer_find(&self, key: &K) -> Option<D> {
        let n = self.meta.num_buffer_items;
        let idx = lower_bound::<K>(self.data, Self::GEO.buffer_offset, n, Self::GEO.value_size, key);
        if idx < n {
            let v = self.buffer_item(idx);
            if v.key == *key {
                return Some(v.datum);
            }
        }
        None
    }

    /// Binary-searches the pivot values. On a miss, names the child whose
    /// subtree must be searched next.
    pub fn values_find(&self, key: &K) -> ValuesSearch<D> {
        let n = self.meta.num_values;
        let idx = lower_bound::<K>(self.data, Self::GEO.values_offset, n, Self::GEO.value_size, key);
        if idx < n {
            let v = self.value_at(idx);
            if v.key == *key {
                return ValuesSearch::Found(v.datum);
            }
        }
        ValuesSearch::Descend(self.child_id(idx))
    }

    /// First buffer index whose key is `>=` the pivot guarding `child_idx`
    /// from above; `num_buffer_items` for the last child. Buffer items in
    /// `[upper_bound(i-1), upper_bound(i))` belong to child `i`.
    pub fn index_of_upper_bound_of_buffer(&self, child_idx: usize) -> usize {
        debug_assert!(child_idx < self.meta.num_children());
        if child_idx < self.meta.num_values {
            let pivot = self.values_key(child_idx);
            lower_bound::<K>(
                self.data,
                Self::GEO.buffer_offset,
                self.meta.num_buffer_items,
                Self::GEO.value_size,
                &pivot,
            )
        } else {
            self.meta.num_buffer_items
        }
    }

    pub fn buffer_item(&self, idx: usize) -> Value<K, D> {
        debug_assert!(idx < self.meta.num_buffer_items);
        read_value_at(self.data, Self::GEO.buffer_offset, idx, Self::GEO.value_size)
    }

    /// Copies buffer items `[low, high)` out of the block.
    pub fn buffer_items(&self, low: usize, high: usize) -> Vec<Value<K, D>> {
        debug_assert!(low <= high && high <= self.meta.num_buffer_items);
        (low..high).map(|i| self.buffer_item(i)).collect()
    }

    pub fn all_buffer_items(&self) -> Vec<Value<K, D>> {
        self.buffer_items(0, self.meta.num_buffer_items)
    }

    /// Buffer items with keys strictly below `bound`.
    pub fn buffer_items_less_than(&self, bound: &K) -> Vec<Value<K, D>> {
        let split = lower_bound::<K>(
            self.data,
            Self::GEO.buffer_offset,
            self.meta.num_buffer_items,
            Self::GEO.value_size,
            bound,
        );
        self.buffer_items(0, split)
    }

    /// Buffer items with keys `>= bound`.
    pub fn buffer_items_greater_equal_than(&self, bound: &K) -> Vec<Value<K, D>> {
        let split = lower_bound::<K>(
            self.data,
            Self::GEO.buffer_offset,
            self.meta.num_buffer_items,
            Self::GEO.value_size,
            bound,
        );
        self.buffer_items(split, self.meta.num_buffer_items)
    }

    /// Buffer items with `lo <= key <= hi`.
    pub fn buffer_range(&self, lo: &K, hi: &K) -> Vec<Value<K, D>> {
        let n = self.meta.num_buffer_items;
        let start = lower_bound::<K>(self.data, Self::GEO.buffer_offset, n, Self::GEO.value_size, lo);
        let mut out = Vec::new();
        for i in start..n {
            let v = self.buffer_item(i);
            if v.key > *hi {
                break;
            }
            out.push(v);
        }
        out
    }

    pub fn value_at(&self, idx: usize) -> Value<K, D> {
        debug_assert!(idx < self.meta.num_values);
        read_value_at(self.data, Self::GEO.values_offset, idx, Self::GEO.value_size)
    }

    fn values_key(&self, idx: usize) -> K {
        read_key_at(self.data, Self::GEO.values_offset, idx, Self::GEO.value_size)
    }

    /// Copies pivot values `[low, high)` out of the block.
    pub fn values(&self, low: usize, high: usize) -> Vec<Value<K, D>> {
        debug_assert!(low <= high && high <= self.meta.num_values);
        (low..high).map(|i| self.value_at(i)).collect()
    }

    pub fn child_id(&self, idx: usize) -> u32 {
        debug_assert!(idx <= self.meta.num_values);
        let off = Self::GEO.children_offset + idx * CHILD_ID_SIZE;
        u32::read_from_bytes(&self.data[off..off + CHILD_ID_SIZE]).expect("exact-size id slice")
    }

    /// Copies child ids `[low, high)` out of the block.
    pub fn child_ids(&self, low: usize, high: usize) -> SmallVec<[u32; 8]> {
        debug_assert!(low <= high && high <= self.meta.num_values + 1);
        (low..high).map(|i| self.child_id(i)).collect()
    }

    // ---- mutations ----------------------------------------------------

    /// Replaces the buffer wholesale. `items` must be sorted by key.
    pub fn set_buffer(&mut self, items: &[Value<K, D>]) {
        debug_assert!(is_sorted_by_key(items));
        debug_assert!(items.len() <= Self::GEO.max_buffer_items);
        for (i, &v) in items.iter().enumerate() {
            write_value_at(self.data, Self::GEO.buffer_offset, i, Self::GEO.value_size, v);
        }
        self.meta.num_buffer_items = items.len();
    }

    /// Merges `new_values` (sorted by key) into the node.
    ///
    /// Keys that match an existing pivot overwrite that pivot's datum and
    /// never enter the buffer; the rest merge into the buffer with the new
    /// datum winning key ties. The merged buffer must fit.
    pub fn add_to_buffer(&mut self, new_values: &[Value<K, D>]) {
        debug_assert!(is_sorted_by_key(new_values));
        let remaining = self.update_duplicate_values(new_values);
        let merged = merge_new_into(&remaining, &self.all_buffer_items());
        debug_assert!(merged.len() <= Self::GEO.max_buffer_items);
        self.set_buffer(&merged);
    }

    pub fn clear_buffer(&mut self) {
        self.meta.num_buffer_items = 0;
    }

    /// Replaces pivots and children wholesale. `children` must be exactly
    /// one longer than `values`.
    pub fn set_values_and_children(&mut self, values: &[Value<K, D>], children: &[u32]) {
        debug_assert!(is_sorted_by_key(values));
        debug_assert!(values.len() <= Self::GEO.max_values);
        debug_assert_eq!(children.len(), values.len() + 1);
        for (i, &v) in values.iter().enumerate() {
            write_value_at(self.data, Self::GEO.values_offset, i, Self::GEO.value_size, v);
        }
        for (i, &id) in children.iter().enumerate() {
            self.write_child_id(i, id);
        }
        self.meta.num_values = values.len();
    }

    /// Inserts a promoted pivot and rewires the split child's two halves.
    ///
    /// Preconditions: the pivots are not full and `value.key` is not
    /// already a pivot.
    pub fn add_to_values(&mut self, value: Value<K, D>, left_child: u32, right_child: u32) {
        let n = self.meta.num_values;
        debug_assert!(n < Self::GEO.max_values);
        let pos = lower_bound::<K>(
            self.data,
            Self::GEO.values_offset,
            n,
            Self::GEO.value_size,
            &value.key,
        );
        debug_assert!(pos == n || self.values_key(pos) != value.key);

        // Shift values [pos, n) and children [pos+1, n+1) one slot right.
        let vs = Self::GEO.value_size;
        let vals = Self::GEO.values_offset;
        self.data
            .copy_within(vals + pos * vs..vals + n * vs, vals + (pos + 1) * vs);
        if n > 0 {
            let kids = Self::GEO.children_offset;
            self.data.copy_within(
                kids + (pos + 1) * CHILD_ID_SIZE..kids + (n + 1) * CHILD_ID_SIZE,
                kids + (pos + 2) * CHILD_ID_SIZE,
            );
        }

        write_value_at(self.data, vals, pos, vs, value);
        self.write_child_id(pos, left_child);
        self.write_child_id(pos + 1, right_child);
        self.meta.num_values = n + 1;
    }

    pub fn clear_values(&mut self) {
        self.meta.num_values = 0;
    }

    pub fn clear(&mut self) {
        self.clear_buffer();
        self.clear_values();
    }

    /// Overwrites pivots whose keys appear in `new_values` and returns the
    /// new values that matched no pivot, still sorted.
    fn update_duplicate_values(&mut self, new_values: &[Value<K, D>]) -> Vec<Value<K, D>> {
        let mut remaining = Vec::with_capacity(new_values.len());
        let n = self.meta.num_values;
        let mut vi = 0;
        for &item in new_values {
            while vi < n && self.values_key(vi) < item.key {
                vi += 1;
            }
            if vi < n && self.values_key(vi) == item.key {
                write_value_at(self.data, Self::GEO.values_offset, vi, Self::GEO.value_size, item);
                vi += 1;
            } else {
                remaining.push(item);
            }
        }
        remaining
    }

    fn write_child_id(&mut self, idx: usize, id: u32) {
        let off = Self::GEO.children_offset + idx * CHILD_ID_SIZE;
        self.data[off..off + CHILD_ID_SIZE].copy_from_slice(&id.to_ne_bytes());
    }
}

// ---- shared layout helpers (also used by the leaf view) ----------------

pub(super) fn read_value_at<K: Key, D: Datum>(
    data: &[u8],
    base: usize,
    idx: usize,
    value_size: usize,
) -> Value<K, D> {
    let off = base + idx * value_size;
    let ks = size_of::<K>();
    let key = K::read_from_bytes(&data[off..off + ks]).expect("exact-size key slice");
    let datum =
        D::read_from_bytes(&data[off + ks..off + value_size]).expect("exact-size datum slice");
    Value { key, datum }
}

pub(super) fn write_value_at<K: Key, D: Datum>(
    data: &mut [u8],
    base: usize,
    idx: usize,
    value_size: usize,
    value: Value<K, D>,
) {
    let off = base + idx * value_size;
    let ks = size_of::<K>();
    value
        .key
        .write_to(&mut data[off..off + ks])
        .expect("exact-size key slice");
    value
        .datum
        .write_to(&mut data[off + ks..off + value_size])
        .expect("exact-size datum slice");
}

pub(super) fn read_key_at<K: Key>(data: &[u8], base: usize, idx: usize, value_size: usize) -> K {
    let off = base + idx * value_size;
    K::read_from_bytes(&data[off..off + size_of::<K>()]).expect("exact-size key slice")
}

/// First index in the sorted run whose key is `>= key`.
pub(super) fn lower_bound<K: Key>(
    data: &[u8],
    base: usize,
    len: usize,
    value_size: usize,
    key: &K,
) -> usize {
    let mut lo = 0;
    let mut hi = len;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if read_key_at::<K>(data, base, mid, value_size) < *key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

pub(super) fn is_sorted_by_key<K: Key, D: Datum>(items: &[Value<K, D>]) -> bool {
    items.windows(2).all(|w| w[0].key < w[1].key)
}

/// Merges two key-sorted runs; on a key tie the entry from `new_values`
/// wins and the current one is dropped.
pub fn merge_new_into<K: Key, D: Datum>(
    new_values: &[Value<K, D>],
    current: &[Value<K, D>],
) -> Vec<Value<K, D>> {
    let mut out = Vec::with_capacity(new_values.len() + current.len());
    let mut i = 0;
    let mut j = 0;
    while i < new_values.len() && j < current.len() {
        match new_values[i].key.cmp(&current[j].key) {
            std::cmp::Ordering::Less => {
                out.push(new_values[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(current[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(new_values[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&new_values[i..]);
    out.extend_from_slice(&current[j..]);
    out
}
