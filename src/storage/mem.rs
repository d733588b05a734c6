//! Heap-backed block store for tests and ephemeral trees.

use eyre::{ensure, Result};
use parking_lot::Mutex;

use super::block::{AllocStrategy, Bid, BlockStore};

/// A block store whose blocks live on the heap.
///
/// `MemStore` implements the full [`BlockStore`] contract (allocation with
/// both strategies, a freelist, bounds- and size-checked I/O) without
/// touching a file system, which makes it the store of choice for unit
/// tests and for trees that only need spill space for the lifetime of the
/// process.
#[derive(Debug)]
pub struct MemStore {
    block_size: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    blocks: Vec<Box<[u8]>>,
    freelist: Vec<u64>,
}

impl MemStore {
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            block_size,
            inner: Mutex::new(Inner {
                blocks: Vec::new(),
                freelist: Vec::new(),
            }),
        }
    }

    /// Number of blocks ever allocated, including freed ones.
    pub fn num_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }
}

impl BlockStore for MemStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn new_block(&self, strategy: AllocStrategy) -> Result<Bid> {
        let mut inner = self.inner.lock();
        if strategy == AllocStrategy::Recycle {
            if let Some(index) = inner.freelist.pop() {
                inner.blocks[index as usize].fill(0);
                return Ok(Bid::from_index(index));
            }
        }
        let index = inner.blocks.len() as u64;
        let size = self.block_size;
        inner.blocks.push(vec![0u8; size].into_boxed_slice());
        Ok(Bid::from_index(index))
    }

    fn free_block(&self, bid: Bid) -> Result<()> {
        ensure!(bid.is_valid(), "cannot free the invalid bid");
        let mut inner = self.inner.lock();
        let index = bid.index();
        ensure!(
            (index as usize) < inner.blocks.len(),
            "bid {:?} out of bounds (store has {} blocks)",
            bid,
            inner.blocks.len()
        );
        ensure!(
            !inner.freelist.contains(&index),
            "double free of {:?}",
            bid
        );
        inner.freelist.push(index);
        Ok(())
    }

    fn read_block(&self, bid: Bid, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, store blocks are {}",
            buf.len(),
            self.block_size
        );
        let inner = self.inner.lock();
        let index = bid.index() as usize;
        ensure!(
            index < inner.blocks.len(),
            "read of unallocated {:?} (store has {} blocks)",
            bid,
            inner.blocks.len()
        );
        buf.copy_from_slice(&inner.blocks[index]);
        Ok(())
    }

    fn write_block(&self, bid: Bid, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "write buffer is {} bytes, store blocks are {}",
            buf.len(),
            self.block_size
        );
        let mut inner = self.inner.lock();
        let index = bid.index() as usize;
        ensure!(
            index < inner.blocks.len(),
            "write to unallocated {:?} (store has {} blocks)",
            bid,
            inner.blocks.len()
        );
        inner.blocks[index].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_blocks_are_zero_filled() {
        let store = MemStore::new(32);
        let bid = store.new_block(AllocStrategy::Append).unwrap();

        let mut buf = vec![0xFFu8; 32];
        store.read_block(bid, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = MemStore::new(16);
        let bid = store.new_block(AllocStrategy::Append).unwrap();

        let data: Vec<u8> = (0..16).collect();
        store.write_block(bid, &data).unwrap();

        let mut buf = vec![0u8; 16];
        store.read_block(bid, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn append_strategy_never_reuses_freed_blocks() {
        let store = MemStore::new(8);
        let a = store.new_block(AllocStrategy::Append).unwrap();
        store.free_block(a).unwrap();

        let b = store.new_block(AllocStrategy::Append).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.num_blocks(), 2);
    }

    #[test]
    fn recycle_strategy_reuses_freed_blocks_zeroed() {
        let store = MemStore::new(8);
        let a = store.new_block(AllocStrategy::Append).unwrap();
        store.write_block(a, &[1u8; 8]).unwrap();
        store.free_block(a).unwrap();

        let b = store.new_block(AllocStrategy::Recycle).unwrap();
        assert_eq!(a, b);

        let mut buf = [0xFFu8; 8];
        store.read_block(b, &mut buf).unwrap();
        assert!(buf.iter().all(|&x| x == 0), "recycled block must be zeroed");
    }

    #[test]
    fn recycle_with_empty_freelist_appends() {
        let store = MemStore::new(8);
        let a = store.new_block(AllocStrategy::Recycle).unwrap();
        let b = store.new_block(AllocStrategy::Recycle).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let store = MemStore::new(32);
        let bid = store.new_block(AllocStrategy::Append).unwrap();

        let mut short = vec![0u8; 16];
        assert!(store.read_block(bid, &mut short).is_err());
        assert!(store.write_block(bid, &short).is_err());
    }

    #[test]
    fn unallocated_bid_is_rejected() {
        let store = MemStore::new(8);
        let mut buf = [0u8; 8];
        assert!(store.read_block(Bid::from_index(5), &mut buf).is_err());
        assert!(store.write_block(Bid::from_index(5), &buf).is_err());
    }

    #[test]
    fn double_free_is_rejected() {
        let store = MemStore::new(8);
        let bid = store.new_block(AllocStrategy::Append).unwrap();
        store.free_block(bid).unwrap();
        assert!(store.free_block(bid).is_err());
    }
}
