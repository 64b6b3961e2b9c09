//! Integration tests for the Bramble B-tree engine.
//!
//! Scenario geometry throughout: key 8 / value 8 / block 256 / 100 blocks
//! (leaf and interior capacity 13), exercised over both the in-memory and
//! the file-backed cache.

use bramble_cache::{BlockCache, FileCache, MemoryCache};
use bramble_common::block::NodeKind;
use bramble_common::BrambleError;
use bramble_index::{BTreeIndex, DisplayMode, Node};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn new_index(num_blocks: u64) -> BTreeIndex<MemoryCache> {
    let cache = MemoryCache::new(256, num_blocks);
    let mut index = BTreeIndex::new(8, 8, cache).unwrap();
    index.attach(0, true).unwrap();
    index
}

fn key(n: u32) -> Vec<u8> {
    format!("k{n:07}").into_bytes()
}

fn val(n: u32) -> Vec<u8> {
    format!("v{n:07}").into_bytes()
}

fn sorted_dump<C: BlockCache>(index: &BTreeIndex<C>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    index.display(&mut out, DisplayMode::SortedKeyval).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| {
            let inner = line.strip_prefix('(').unwrap().strip_suffix(')').unwrap();
            let (k, v) = inner.split_once(',').unwrap();
            (k.to_string(), v.to_string())
        })
        .collect()
}

// =============================================================================
// Core scenarios
// =============================================================================

#[test]
fn s1_empty_store() {
    let index = new_index(100);

    assert!(matches!(
        index.lookup(b"aaaaaaaa").unwrap_err(),
        BrambleError::Nonexistent
    ));
    index.sanity_check().unwrap();
    assert_eq!(index.free_list_head(), 2);
}

#[test]
fn s2_first_insert_bootstrap() {
    let mut index = new_index(100);
    let head_before = index.free_list_head();

    index.insert(b"k0000000", b"v0000000").unwrap();

    // Root became an interior-shaped node with one separator and two leaves.
    let root = Node::read_from(index.cache(), index.root_block()).unwrap();
    assert_eq!(root.header.kind, NodeKind::Root);
    assert_eq!(root.header.num_keys, 1);
    assert_eq!(root.key(0).unwrap().as_ref(), b"k0000000");
    for i in 0..=1 {
        let child = Node::read_from(index.cache(), root.ptr(i).unwrap()).unwrap();
        assert_eq!(child.header.kind, NodeKind::Leaf);
    }

    assert_eq!(index.lookup(b"k0000000").unwrap().as_ref(), b"v0000000");
    assert_eq!(index.free_list_head(), head_before + 2);
    index.sanity_check().unwrap();
}

#[test]
fn s3_update() {
    let mut index = new_index(100);

    index.insert(&key(7), b"v1v1v1v1").unwrap();
    index.update(&key(7), b"v2v2v2v2").unwrap();
    assert_eq!(index.lookup(&key(7)).unwrap().as_ref(), b"v2v2v2v2");

    assert!(matches!(
        index.update(b"missing_", b"xxxxxxxx").unwrap_err(),
        BrambleError::Nonexistent
    ));
    index.sanity_check().unwrap();
}

#[test]
fn s4_conflict_preserves_store() {
    let mut index = new_index(100);
    index.insert(&key(7), b"v1v1v1v1").unwrap();

    let snapshot: Vec<Vec<u8>> = (0..index.cache().num_blocks())
        .map(|block| {
            let mut buf = vec![0u8; 256];
            index.cache().read_block(block, &mut buf).unwrap();
            buf
        })
        .collect();

    assert!(matches!(
        index.insert(&key(7), b"v2v2v2v2").unwrap_err(),
        BrambleError::Conflict
    ));
    assert_eq!(index.lookup(&key(7)).unwrap().as_ref(), b"v1v1v1v1");

    for (block, expected) in snapshot.iter().enumerate() {
        let mut buf = vec![0u8; 256];
        index.cache().read_block(block as u64, &mut buf).unwrap();
        assert_eq!(&buf, expected, "block {block} changed by rejected insert");
    }
}

#[test]
fn s5_leaf_split() {
    let mut index = new_index(100);

    // Leaf capacity is 13; the fourteenth ascending key splits the
    // rightmost leaf.
    let count = 14;
    for n in 0..count {
        index.insert(&key(n), &val(n)).unwrap();
    }
    index.sanity_check().unwrap();

    // Still exactly one interior level: the root's children are all leaves.
    let root = Node::read_from(index.cache(), index.root_block()).unwrap();
    assert_eq!(root.header.kind, NodeKind::Root);
    for i in 0..=root.header.num_keys as usize {
        let child = Node::read_from(index.cache(), root.ptr(i).unwrap()).unwrap();
        assert_eq!(child.header.kind, NodeKind::Leaf);
    }

    let dump = sorted_dump(&index);
    assert_eq!(dump.len(), count as usize);
    for (n, (k, v)) in dump.iter().enumerate() {
        assert_eq!(k, &format!("k{n:07}"));
        assert_eq!(v, &format!("v{n:07}"));
    }

    // No block is both reachable and free (sanity_check covers the
    // intersection; spot-check the free head is unallocated).
    let head = index.free_list_head();
    let free = Node::read_from(index.cache(), head).unwrap();
    assert_eq!(free.header.kind, NodeKind::Unallocated);
}

#[test]
fn s6_exhaustion() {
    // num_blocks = 4: the bootstrap consumes both free blocks, so the next
    // insert that needs an allocation fails.
    let cache = MemoryCache::new(256, 4);
    let mut index = BTreeIndex::new(8, 8, cache).unwrap();
    index.attach(0, true).unwrap();

    index.insert(&key(0), &val(0)).unwrap();
    assert_eq!(index.free_list_head(), 0);

    let mut saw_nospace = false;
    for n in 1..100 {
        match index.insert(&key(n), &val(n)) {
            Ok(()) => {}
            Err(BrambleError::NoSpace) => {
                saw_nospace = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(saw_nospace);
}

// =============================================================================
// Invariant sequences
// =============================================================================

#[test]
fn sanity_holds_after_every_operation() {
    let mut index = new_index(100);
    for n in 0..60 {
        index.insert(&key(n), &val(n)).unwrap();
        index.sanity_check().unwrap();
    }
    for n in (0..60).step_by(3) {
        index.update(&key(n), b"updated!").unwrap();
        index.sanity_check().unwrap();
    }
}

#[test]
fn inserted_pairs_stay_bound() {
    let mut index = new_index(100);
    for n in 0..80 {
        index.insert(&key(n), &val(n)).unwrap();
    }
    for n in 0..80 {
        assert_eq!(index.lookup(&key(n)).unwrap().as_ref(), val(n).as_slice());
    }
    assert!(matches!(
        index.lookup(b"neverins").unwrap_err(),
        BrambleError::Nonexistent
    ));
}

#[test]
fn update_wins_over_insert() {
    let mut index = new_index(100);
    for n in 0..30 {
        index.insert(&key(n), &val(n)).unwrap();
    }
    for n in 0..30 {
        index.update(&key(n), format!("u{n:07}").as_bytes()).unwrap();
    }
    for n in 0..30 {
        assert_eq!(
            index.lookup(&key(n)).unwrap().as_ref(),
            format!("u{n:07}").as_bytes()
        );
    }
}

#[test]
fn random_insertion_order() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let mut order: Vec<u32> = (0..200).collect();
    order.shuffle(&mut rng);

    let mut index = new_index(400);
    for &n in &order {
        index.insert(&key(n), &val(n)).unwrap();
    }
    index.sanity_check().unwrap();

    for n in 0..200 {
        assert_eq!(index.lookup(&key(n)).unwrap().as_ref(), val(n).as_slice());
    }

    let dump = sorted_dump(&index);
    assert_eq!(dump.len(), 200);
    for pair in dump.windows(2) {
        assert!(pair[0].0 < pair[1].0, "dump not strictly ascending");
    }
}

#[test]
fn descending_insertion_order() {
    let mut index = new_index(400);
    for n in (0..150).rev() {
        index.insert(&key(n), &val(n)).unwrap();
    }
    index.sanity_check().unwrap();
    for n in 0..150 {
        assert_eq!(index.lookup(&key(n)).unwrap().as_ref(), val(n).as_slice());
    }
}

#[test]
fn root_growth_keeps_leaves_level() {
    let mut index = new_index(800);
    for n in 0..500 {
        index.insert(&key(n), &val(n)).unwrap();
    }
    // Uniform leaf depth is part of the sanity sweep.
    index.sanity_check().unwrap();
    assert_ne!(index.root_block(), 1, "root never grew");
    assert_eq!(sorted_dump(&index).len(), 500);
}

#[test]
fn free_list_roundtrip_restores_head() {
    let mut index = new_index(100);
    let head = index.free_list_head();

    let block = index.allocate_block().unwrap();
    assert_eq!(block, head);

    // Stamp the block in use, then give it back.
    let mut node = Node::new(NodeKind::Leaf, 8, 8, 256);
    node.header.root_block = index.root_block();
    node.write_to(index.cache(), block).unwrap();
    index.deallocate_block(block).unwrap();

    assert_eq!(index.free_list_head(), head);
    index.sanity_check().unwrap();
}

// =============================================================================
// File-backed store
// =============================================================================

#[test]
fn file_backed_store_survives_reattach() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.bramble");

    {
        let cache = FileCache::create(&path, 256, 100, false).unwrap();
        let mut index = BTreeIndex::new(8, 8, cache).unwrap();
        index.attach(0, true).unwrap();
        for n in 0..50 {
            index.insert(&key(n), &val(n)).unwrap();
        }
        index.detach().unwrap();
    }

    let cache = FileCache::open(&path, 256, false).unwrap();
    let mut index = BTreeIndex::new(8, 8, cache).unwrap();
    index.attach(0, false).unwrap();

    index.sanity_check().unwrap();
    for n in 0..50 {
        assert_eq!(index.lookup(&key(n)).unwrap().as_ref(), val(n).as_slice());
    }

    // The mounted tree keeps accepting writes.
    index.insert(&key(50), &val(50)).unwrap();
    assert_eq!(sorted_dump(&index).len(), 51);
}

#[test]
fn file_backed_display_matches_memory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.bramble");

    let cache = FileCache::create(&path, 256, 100, false).unwrap();
    let mut file_index = BTreeIndex::new(8, 8, cache).unwrap();
    file_index.attach(0, true).unwrap();

    let mut mem_index = new_index(100);

    for n in 0..40 {
        file_index.insert(&key(n), &val(n)).unwrap();
        mem_index.insert(&key(n), &val(n)).unwrap();
    }

    assert_eq!(sorted_dump(&file_index), sorted_dump(&mem_index));
}
