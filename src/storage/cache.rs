//! # LRU Block Cache
//!
//! This module implements the fixed-capacity cache that sits between the
//! tree's in-memory node/leaf objects and the backing store. Each cache
//! instance owns `capacity` preallocated block images; at any observable
//! point `num_cached_blocks() + num_unused_blocks() == capacity`.
//!
//! ## Eviction
//!
//! Exact least-recently-used: a recency list keeps the most-recently-used
//! bid at the back, and eviction always claims the front. Capacities here
//! are derived from the memory-pool constants and are single digits, so
//! the O(capacity) touch on the recency list is cheaper than maintaining
//! an intrusive list would be.
//!
//! ## Dirty Tracking
//!
//! The cache shares a [`DirtySet`] with its sibling cache and the tree
//! engine. The engine inserts a bid after writing through its image; the
//! cache removes the bid when it writes the image back (on eviction, on
//! `kick`, on `write_back_all`, and on drop). A dirty image is never
//! discarded without a write-back.
//!
//! ## Failure Accounting
//!
//! - A failed read leaves no cache entry and returns the image to the
//!   unused pool.
//! - A failed write-back during eviction leaves the victim cached and
//!   dirty and surfaces the error to the caller.
//!
//! ## Pointer Stability
//!
//! `load` returns a mutable borrow of the image. The borrow ends before
//! the next cache call, and any later `load` may evict the block and
//! recycle its image for another bid; callers re-load after every
//! operation that can evict. The borrow checker enforces this: an image
//! reference cannot be held across another `&mut self` call.

use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use super::block::{Bid, BlockStore, RawBlock};

/// The set of bids whose in-memory images have outrun the store.
///
/// Shared between the tree engine (which inserts after mutating an image)
/// and both caches (which remove after writing an image back).
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    bids: Arc<Mutex<HashSet<Bid>>>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bid: Bid) {
        self.bids.lock().insert(bid);
    }

    pub fn remove(&self, bid: Bid) {
        self.bids.lock().remove(&bid);
    }

    pub fn contains(&self, bid: Bid) -> bool {
        self.bids.lock().contains(&bid)
    }

    pub fn len(&self) -> usize {
        self.bids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.lock().is_empty()
    }
}

struct CacheEntry<const BS: usize> {
    image: Box<RawBlock<BS>>,
}

pub struct BlockCache<S: BlockStore, const BS: usize> {
    store: Arc<S>,
    capacity: usize,
    entries: HashMap<Bid, CacheEntry<BS>>,
    /// Recency order over cached bids: least-recently-used at the front.
    recency: Vec<Bid>,
    /// LIFO pool of images not currently bound to a bid.
    unused: Vec<Box<RawBlock<BS>>>,
    dirty: DirtySet,
}

impl<S: BlockStore, const BS: usize> BlockCache<S, BS> {
    pub fn new(store: Arc<S>, capacity: usize, dirty: DirtySet) -> Self {
        assert!(capacity >= 1, "cache capacity must be at least 1");
        let unused = (0..capacity).map(|_| RawBlock::zeroed()).collect();
        Self {
            store,
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: Vec::with_capacity(capacity),
            unused,
            dirty,
        }
    }

    /// Returns the image for `bid`, reading it from the store on a miss.
    ///
    /// The returned borrow is valid until the next cache operation; a miss
    /// may evict (and write back) the least-recently-used block first.
    pub fn load(&mut self, bid: Bid) -> Result<&mut RawBlock<BS>> {
        if self.entries.contains_key(&bid) {
            self.touch(bid);
            return Ok(&mut self.entries.get_mut(&bid).expect("entry just probed").image);
        }

        if self.unused.is_empty() {
            self.evict()?;
        }
        let mut image = self.unused.pop().expect("eviction must free an image");

        if let Err(err) = self.store.read_block(bid, image.bytes_mut()) {
            self.unused.push(image);
            return Err(err);
        }

        self.recency.push(bid);
        self.entries.insert(bid, CacheEntry { image });
        Ok(&mut self.entries.get_mut(&bid).expect("entry just inserted").image)
    }

    /// Drops `bid` from the cache, writing its image back first if dirty.
    /// Does nothing if the bid is not cached.
    pub fn kick(&mut self, bid: Bid) -> Result<()> {
        let Some(entry) = self.entries.get(&bid) else {
            return Ok(());
        };

        if self.dirty.contains(bid) {
            // On failure the entry stays cached and dirty.
            self.store.write_block(bid, entry.image.bytes())?;
            self.dirty.remove(bid);
        }

        let entry = self.entries.remove(&bid).expect("entry just probed");
        self.recency.retain(|&b| b != bid);
        self.unused.push(entry.image);
        Ok(())
    }

    /// Kicks the least-recently-used block.
    pub fn evict(&mut self) -> Result<()> {
        let lru = *self
            .recency
            .first()
            .ok_or_else(|| eyre!("cannot evict from an empty cache"))?;
        self.kick(lru)
    }

    /// Writes every dirty cached image back to the store. Returns the
    /// number of blocks written.
    pub fn write_back_all(&mut self) -> Result<usize> {
        let mut written = 0;
        for (&bid, entry) in &self.entries {
            if self.dirty.contains(bid) {
                self.store.write_block(bid, entry.image.bytes())?;
                self.dirty.remove(bid);
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn is_cached(&self, bid: Bid) -> bool {
        self.entries.contains_key(&bid)
    }

    pub fn is_dirty(&self, bid: Bid) -> bool {
        self.dirty.contains(bid)
    }

    pub fn num_cached_blocks(&self) -> usize {
        self.entries.len()
    }

    pub fn num_unused_blocks(&self) -> usize {
        self.unused.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dirty_set(&self) -> &DirtySet {
        &self.dirty
    }

    pub(crate) fn check_accounting(&self) {
        debug_assert_eq!(
            self.entries.len() + self.unused.len(),
            self.capacity,
            "cached + unused images must equal capacity"
        );
        debug_assert_eq!(self.entries.len(), self.recency.len());
    }

    fn touch(&mut self, bid: Bid) {
        if let Some(pos) = self.recency.iter().position(|&b| b == bid) {
            self.recency.remove(pos);
        }
        self.recency.push(bid);
    }
}

impl<S: BlockStore, const BS: usize> Drop for BlockCache<S, BS> {
    fn drop(&mut self) {
        // Best effort: a store that fails here has already lost the data's
        // home; there is nowhere left to surface the error.
        for (&bid, entry) in &self.entries {
            if self.dirty.contains(bid) {
                let _ = self.store.write_block(bid, entry.image.bytes());
                self.dirty.remove(bid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AllocStrategy, MemStore};

    const BS: usize = 32;

    fn store_with_blocks(n: usize) -> (Arc<MemStore>, Vec<Bid>) {
        let store = Arc::new(MemStore::new(BS));
        let bids = (0..n)
            .map(|_| store.new_block(AllocStrategy::Append).unwrap())
            .collect();
        (store, bids)
    }

    fn stamp(cache: &mut BlockCache<MemStore, BS>, bid: Bid, marker: u8) -> *const RawBlock<BS> {
        let image = cache.load(bid).unwrap();
        image.bytes_mut()[0] = marker;
        let slot = image as *const RawBlock<BS>;
        cache.dirty_set().insert(bid);
        slot
    }

    #[test]
    fn accounting_holds_through_loads_and_kicks() {
        let (store, bids) = store_with_blocks(5);
        let mut cache = BlockCache::<_, BS>::new(store, 3, DirtySet::new());

        assert_eq!(cache.num_cached_blocks(), 0);
        assert_eq!(cache.num_unused_blocks(), 3);

        for &bid in &bids {
            cache.load(bid).unwrap();
            cache.check_accounting();
            assert!(cache.num_cached_blocks() <= 3);
        }

        cache.kick(bids[4]).unwrap();
        cache.check_accounting();
        assert_eq!(cache.num_cached_blocks() + cache.num_unused_blocks(), 3);
    }

    #[test]
    fn load_is_stable_without_intervening_eviction() {
        let (store, bids) = store_with_blocks(1);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        let first = cache.load(bids[0]).unwrap() as *mut _;
        let second = cache.load(bids[0]).unwrap() as *mut _;
        assert_eq!(first, second);
    }

    #[test]
    fn dirty_write_then_kick_then_load_round_trips() {
        let (store, bids) = store_with_blocks(1);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        stamp(&mut cache, bids[0], 0xAA);
        cache.kick(bids[0]).unwrap();
        assert!(!cache.is_cached(bids[0]));
        assert!(!cache.is_dirty(bids[0]));

        let image = cache.load(bids[0]).unwrap();
        assert_eq!(image.bytes()[0], 0xAA);
    }

    #[test]
    fn clean_eviction_discards_unmarked_writes() {
        // 1-slot cache: loading B evicts A. A was written without the dirty
        // marker, so the write must not survive.
        let (store, bids) = store_with_blocks(2);
        let mut cache = BlockCache::<_, BS>::new(store, 1, DirtySet::new());

        let image = cache.load(bids[0]).unwrap();
        image.bytes_mut()[0] = 0xAA;

        cache.load(bids[1]).unwrap();
        let image = cache.load(bids[0]).unwrap();
        assert_eq!(image.bytes()[0], 0, "undirtied write must be discarded");
    }

    #[test]
    fn lru_eviction_writes_back_and_reuses_the_lru_image() {
        // 2-slot cache over three bids: loading C evicts dirty A (with a
        // write-back) and reuses A's image; reloading A then evicts B and
        // reuses B's image.
        let (store, bids) = store_with_blocks(3);
        let (a, b, c) = (bids[0], bids[1], bids[2]);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        let slot_a = stamp(&mut cache, a, b'a');
        let slot_b = stamp(&mut cache, b, b'b');
        let slot_c = stamp(&mut cache, c, b'c');

        assert!(!cache.is_cached(a), "A was least recently used");
        assert!(cache.is_cached(b));
        assert!(cache.is_cached(c));
        assert_eq!(slot_c, slot_a, "C must reuse the image that held A");

        let image = cache.load(a).unwrap();
        assert_eq!(image.bytes()[0], b'a', "dirty A must have been written back");
        assert_eq!(
            image as *const RawBlock<BS>,
            slot_b,
            "reloaded A must reuse the image that held B"
        );
        assert!(cache.is_cached(a) && !cache.is_cached(b) && cache.is_cached(c));
    }

    #[test]
    fn touch_protects_recently_used_blocks() {
        let (store, bids) = store_with_blocks(3);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        cache.load(bids[0]).unwrap();
        cache.load(bids[1]).unwrap();
        cache.load(bids[0]).unwrap(); // bids[1] is now LRU
        cache.load(bids[2]).unwrap();

        assert!(cache.is_cached(bids[0]));
        assert!(!cache.is_cached(bids[1]));
        assert!(cache.is_cached(bids[2]));
    }

    #[test]
    fn kick_is_idempotent_for_uncached_bids() {
        let (store, bids) = store_with_blocks(1);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        cache.kick(bids[0]).unwrap();
        cache.load(bids[0]).unwrap();
        cache.kick(bids[0]).unwrap();
        cache.kick(bids[0]).unwrap();
        cache.check_accounting();
    }

    #[test]
    fn every_dirty_bid_is_cached() {
        let (store, bids) = store_with_blocks(4);
        let dirty = DirtySet::new();
        let mut cache = BlockCache::<_, BS>::new(store, 2, dirty.clone());

        for (i, &bid) in bids.iter().enumerate() {
            stamp(&mut cache, bid, i as u8);
            // Eviction wrote older bids back and undirtied them.
            assert!(dirty.len() <= cache.num_cached_blocks());
            for &d in &bids[..=i] {
                if cache.is_dirty(d) {
                    assert!(cache.is_cached(d));
                }
            }
        }
    }

    #[test]
    fn write_back_all_cleans_without_evicting() {
        let (store, bids) = store_with_blocks(2);
        let store_probe = Arc::clone(&store);
        let mut cache = BlockCache::<_, BS>::new(store, 3, DirtySet::new());

        stamp(&mut cache, bids[0], 1);
        stamp(&mut cache, bids[1], 2);

        assert_eq!(cache.write_back_all().unwrap(), 2);
        assert!(cache.is_cached(bids[0]) && cache.is_cached(bids[1]));
        assert!(!cache.is_dirty(bids[0]) && !cache.is_dirty(bids[1]));

        let mut buf = [0u8; BS];
        store_probe.read_block(bids[0], &mut buf).unwrap();
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn drop_writes_dirty_images_back() {
        let (store, bids) = store_with_blocks(1);
        let store_probe = Arc::clone(&store);

        {
            let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());
            stamp(&mut cache, bids[0], 0x7E);
        }

        let mut buf = [0u8; BS];
        store_probe.read_block(bids[0], &mut buf).unwrap();
        assert_eq!(buf[0], 0x7E);
    }

    #[test]
    fn read_failure_returns_image_to_pool() {
        let (store, _) = store_with_blocks(1);
        let mut cache = BlockCache::<_, BS>::new(store, 2, DirtySet::new());

        // Reading a bid the store never allocated fails.
        let err = cache.load(Bid::from_index(99));
        assert!(err.is_err());
        assert_eq!(cache.num_cached_blocks(), 0);
        assert_eq!(cache.num_unused_blocks(), 2);
    }

    struct WriteFailStore {
        inner: MemStore,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl BlockStore for WriteFailStore {
        fn block_size(&self) -> usize {
            self.inner.block_size()
        }
        fn new_block(&self, strategy: AllocStrategy) -> Result<Bid> {
            self.inner.new_block(strategy)
        }
        fn free_block(&self, bid: Bid) -> Result<()> {
            self.inner.free_block(bid)
        }
        fn read_block(&self, bid: Bid, buf: &mut [u8]) -> Result<()> {
            self.inner.read_block(bid, buf)
        }
        fn write_block(&self, bid: Bid, buf: &[u8]) -> Result<()> {
            if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
                eyre::bail!("injected write failure for {:?}", bid);
            }
            self.inner.write_block(bid, buf)
        }
    }

    #[test]
    fn write_failure_during_eviction_keeps_victim_cached_and_dirty() {
        let store = Arc::new(WriteFailStore {
            inner: MemStore::new(BS),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        });
        let a = store.new_block(AllocStrategy::Append).unwrap();
        let b = store.new_block(AllocStrategy::Append).unwrap();
        let dirty = DirtySet::new();
        let mut cache = BlockCache::<_, BS>::new(Arc::clone(&store), 1, dirty.clone());

        {
            let image = cache.load(a).unwrap();
            image.bytes_mut()[0] = 1;
        }
        dirty.insert(a);

        store
            .fail_writes
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(cache.load(b).is_err(), "eviction write-back must fail");
        assert!(cache.is_cached(a));
        assert!(cache.is_dirty(a));
        assert_eq!(cache.num_cached_blocks() + cache.num_unused_blocks(), 1);

        store
            .fail_writes
            .store(false, std::sync::atomic::Ordering::Relaxed);
        cache.load(b).unwrap();
        assert!(!cache.is_cached(a));
        assert!(!cache.is_dirty(a));
    }
}
