//! File-backed end-to-end runs: the tree over a memory-mapped store, with
//! caches small enough that evictions write real blocks to the file.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

use fractree::{AllocStrategy, BlockStore, FileStore, FractalTree, MemStore, Value};

type FileTree = FractalTree<u64, u64, FileStore, 4096, 32768>;

#[test]
fn file_backed_tree_survives_evictions() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::create(dir.path().join("tree.fdb"), 4096).unwrap());
    let mut tree = FileTree::new(Arc::clone(&store), AllocStrategy::Append).unwrap();

    let mut keys: Vec<u64> = (0..10_000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(1));

    for &k in &keys {
        tree.insert(k, 3 * k).unwrap();
    }

    // Far more blocks than cache slots: eviction write-backs hit the file.
    assert!(
        store.num_blocks() as usize > FileTree::LEAF_CACHE_CAPACITY + FileTree::NODE_CACHE_CAPACITY,
        "only {} blocks allocated",
        store.num_blocks()
    );

    for &k in &keys {
        assert_eq!(tree.find(k).unwrap(), Some(3 * k), "key {}", k);
    }

    let hits = tree.range_find(2_500, 7_499).unwrap();
    assert_eq!(hits.len(), 5_000);
    assert_eq!(hits.first(), Some(&Value::new(2_500, 7_500)));
    assert_eq!(hits.last(), Some(&Value::new(7_499, 22_497)));

    tree.flush().unwrap();
    store.sync().unwrap();
}

#[test]
fn recycle_strategy_reuses_store_blocks() {
    // The tree never frees blocks, but a store shared with other users can
    // hand recycled blocks to the tree transparently.
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::create(dir.path().join("tree.fdb"), 4096).unwrap());

    let scratch: Vec<_> = (0..8)
        .map(|_| store.new_block(AllocStrategy::Append).unwrap())
        .collect();
    for bid in scratch {
        store.free_block(bid).unwrap();
    }

    let mut tree = FileTree::new(Arc::clone(&store), AllocStrategy::Recycle).unwrap();
    for k in 0..2_000u64 {
        tree.insert(k, k).unwrap();
    }
    for k in 0..2_000u64 {
        assert_eq!(tree.find(k).unwrap(), Some(k));
    }
}

#[test]
fn mem_and_file_stores_agree() {
    let dir = tempdir().unwrap();
    let file_store = Arc::new(FileStore::create(dir.path().join("tree.fdb"), 4096).unwrap());
    let mem_store = Arc::new(MemStore::new(4096));

    let mut file_tree = FileTree::new(file_store, AllocStrategy::Append).unwrap();
    let mut mem_tree: FractalTree<u64, u64, MemStore, 4096, 32768> =
        FractalTree::new(mem_store, AllocStrategy::Append).unwrap();

    let mut keys: Vec<u64> = (0..4_000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(9));

    for &k in &keys {
        file_tree.insert(k, k * k).unwrap();
        mem_tree.insert(k, k * k).unwrap();
    }

    assert_eq!(file_tree.depth(), mem_tree.depth());
    assert_eq!(file_tree.num_nodes(), mem_tree.num_nodes());
    assert_eq!(file_tree.num_leaves(), mem_tree.num_leaves());

    for probe in [0, 1, 1_999, 3_998, 3_999] {
        assert_eq!(file_tree.find(probe).unwrap(), mem_tree.find(probe).unwrap());
    }
    assert_eq!(
        file_tree.range_find(100, 300).unwrap(),
        mem_tree.range_find(100, 300).unwrap()
    );
}
