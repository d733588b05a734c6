//! # Memory-Mapped File Store
//!
//! `FileStore` keeps blocks in a single file of concatenated
//! `block_size`-byte blocks, memory-mapped for access:
//!
//! ```text
//! Offset 0:              Block 0
//! Offset block_size:     Block 1
//! Offset 2·block_size:   Block 2
//! ...
//! ```
//!
//! The file size is always a multiple of the block size; allocation grows
//! the file by one block (zero-filled by the file system) and remaps.
//!
//! ## Safety Considerations
//!
//! A memory-mapped region becomes invalid when the file is grown and
//! remapped. All access therefore goes through `read_block`/`write_block`,
//! which copy between the map and caller-owned buffers under the store's
//! lock; no caller ever holds a reference into the map across a grow.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};

use super::block::{AllocStrategy, Bid, BlockStore};

#[derive(Debug)]
pub struct FileStore {
    block_size: usize,
    inner: RwLock<Inner>,
    freelist: Mutex<Vec<u64>>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    mmap: MmapMut,
    block_count: u64,
}

impl FileStore {
    /// Creates a new store file, truncating any existing one. The file
    /// starts empty; blocks appear as they are allocated.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        ensure!(block_size > 0, "block size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        // An empty file cannot be mapped; reserve one block up front and
        // hand it out as the first allocation.
        file.set_len(block_size as u64)
            .wrap_err("failed to reserve the initial block")?;

        // SAFETY: MmapMut::map_mut is unsafe because the mapping breaks if
        // the file is modified externally. This is safe because:
        // 1. The file was just created with truncate=true and is owned by
        //    this store for its lifetime.
        // 2. The file size is a non-zero multiple of block_size.
        // 3. All access copies through read_block/write_block under the
        //    store's lock, so no reference into the map outlives a remap.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            block_size,
            inner: RwLock::new(Inner {
                file,
                mmap,
                block_count: 0,
            }),
            freelist: Mutex::new(Vec::new()),
        })
    }

    /// Opens an existing store file.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        ensure!(block_size > 0, "block size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty store file '{}'",
            path.display()
        );
        ensure!(
            file_size % block_size as u64 == 0,
            "store file '{}' size {} is not a multiple of block size {}",
            path.display(),
            file_size,
            block_size
        );

        // SAFETY: see `create`. The size checks above ensure the map covers
        // a whole number of blocks, and access is copy-only under the lock.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            block_size,
            inner: RwLock::new(Inner {
                file,
                mmap,
                block_count: file_size / block_size as u64,
            }),
            freelist: Mutex::new(Vec::new()),
        })
    }

    /// Number of blocks ever allocated, including freed ones.
    pub fn num_blocks(&self) -> u64 {
        self.inner.read().block_count
    }

    /// Flushes the map to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner
            .read()
            .mmap
            .flush()
            .wrap_err("failed to sync store file")
    }

    fn grow(inner: &mut Inner, block_size: usize, new_block_count: u64) -> Result<()> {
        let reserved = inner.mmap.len() as u64 / block_size as u64;
        if new_block_count > reserved {
            inner
                .mmap
                .flush()
                .wrap_err("failed to flush mmap before grow")?;

            let new_size = new_block_count * block_size as u64;
            inner
                .file
                .set_len(new_size)
                .wrap_err_with(|| format!("failed to extend store file to {} bytes", new_size))?;

            // SAFETY: the old map is replaced while the write lock is held,
            // so no outstanding reference into it can exist (all access is
            // copy-only under this lock). The file was extended first.
            inner.mmap = unsafe {
                MmapMut::map_mut(&inner.file).wrap_err("failed to remap store file after grow")?
            };
        }
        inner.block_count = new_block_count;
        Ok(())
    }
}

impl BlockStore for FileStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn new_block(&self, strategy: AllocStrategy) -> Result<Bid> {
        if strategy == AllocStrategy::Recycle {
            if let Some(index) = self.freelist.lock().pop() {
                // Recycled blocks must come back zeroed, like fresh ones.
                let mut inner = self.inner.write();
                let offset = index as usize * self.block_size;
                inner.mmap[offset..offset + self.block_size].fill(0);
                return Ok(Bid::from_index(index));
            }
        }
        let mut inner = self.inner.write();
        let index = inner.block_count;
        Self::grow(&mut inner, self.block_size, index + 1)?;
        Ok(Bid::from_index(index))
    }

    fn free_block(&self, bid: Bid) -> Result<()> {
        ensure!(bid.is_valid(), "cannot free the invalid bid");
        ensure!(
            bid.index() < self.num_blocks(),
            "free of unallocated {:?}",
            bid
        );
        let mut freelist = self.freelist.lock();
        ensure!(!freelist.contains(&bid.index()), "double free of {:?}", bid);
        freelist.push(bid.index());
        Ok(())
    }

    fn read_block(&self, bid: Bid, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, store blocks are {}",
            buf.len(),
            self.block_size
        );
        let inner = self.inner.read();
        ensure!(
            bid.index() < inner.block_count,
            "read of unallocated {:?} (store has {} blocks)",
            bid,
            inner.block_count
        );
        let offset = bid.index() as usize * self.block_size;
        buf.copy_from_slice(&inner.mmap[offset..offset + self.block_size]);
        Ok(())
    }

    fn write_block(&self, bid: Bid, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "write buffer is {} bytes, store blocks are {}",
            buf.len(),
            self.block_size
        );
        let mut inner = self.inner.write();
        ensure!(
            bid.index() < inner.block_count,
            "write to unallocated {:?} (store has {} blocks)",
            bid,
            inner.block_count
        );
        let offset = bid.index() as usize * self.block_size;
        inner.mmap[offset..offset + self.block_size].copy_from_slice(buf);
        Ok(())
    }
}
