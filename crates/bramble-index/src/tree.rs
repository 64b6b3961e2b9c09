//! The B-tree engine: attach/create, lookup, update, insert with node
//! splitting, the free-list allocator, and the structural sanity check.

use crate::node::Node;
use bramble_cache::BlockCache;
use bramble_common::block::{BlockId, NodeKind, NIL_BLOCK, PTR_SIZE};
use bramble_common::config::StoreConfig;
use bramble_common::{BrambleError, Result};
use bytes::Bytes;
use std::collections::HashSet;
use tracing::debug;

/// Payload for a node-level insertion: leaves take a value, interior nodes
/// take the right-hand child of the new separator.
enum SlotEntry<'a> {
    Value(&'a [u8]),
    RightChild(BlockId),
}

/// Disk-backed B-tree over fixed-size keys and values.
///
/// The handle owns the block cache, the superblock index, and an in-memory
/// copy of the superblock; the superblock is the single source of truth for
/// the root location and the free-list head.
pub struct BTreeIndex<C: BlockCache> {
    pub(crate) cache: C,
    pub(crate) superblock_index: BlockId,
    pub(crate) superblock: Node,
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Creates a detached handle over `cache`.
    ///
    /// Key and value widths are fixed here; [`BTreeIndex::attach`] either
    /// formats the store with them (`create`) or verifies them against the
    /// persisted superblock.
    pub fn new(key_size: usize, value_size: usize, cache: C) -> Result<Self> {
        let config = StoreConfig {
            key_size,
            value_size,
            block_size: cache.block_size(),
            num_blocks: cache.num_blocks(),
            fsync_enabled: false,
        };
        config.validate()?;

        let superblock = Node::new(
            NodeKind::Superblock,
            key_size as u16,
            value_size as u16,
            cache.block_size() as u32,
        );
        Ok(Self {
            cache,
            superblock_index: NIL_BLOCK,
            superblock,
        })
    }

    /// Returns the backing cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Block index of the tree root.
    pub fn root_block(&self) -> BlockId {
        self.superblock.header.root_block
    }

    /// Head of the free list (0 = empty).
    pub fn free_list_head(&self) -> BlockId {
        self.superblock.header.free_next
    }

    fn key_size(&self) -> usize {
        self.superblock.header.key_size as usize
    }

    fn value_size(&self) -> usize {
        self.superblock.header.value_size as usize
    }

    fn fresh_node(&self, kind: NodeKind) -> Node {
        let mut node = Node::new(
            kind,
            self.superblock.header.key_size,
            self.superblock.header.value_size,
            self.superblock.header.block_size,
        );
        node.header.root_block = self.superblock.header.root_block;
        node
    }

    pub(crate) fn load(&self, block: BlockId) -> Result<Node> {
        Node::read_from(&self.cache, block)
    }

    fn store(&self, block: BlockId, node: &Node) -> Result<()> {
        node.write_to(&self.cache, block)
    }

    fn persist_superblock(&self) -> Result<()> {
        self.superblock.write_to(&self.cache, self.superblock_index)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(BrambleError::BadLength {
                what: "key",
                expected: self.key_size(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.value_size() {
            return Err(BrambleError::BadLength {
                what: "value",
                expected: self.value_size(),
                actual: value.len(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Mount / unmount
    // =========================================================================

    /// Mounts the store, optionally formatting it first.
    ///
    /// Formatting lays out the superblock at block 0, an empty root at
    /// block 1, and chains every remaining block onto the free list in
    /// ascending order. Mounting then just reads the superblock.
    pub fn attach(&mut self, initblock: BlockId, create: bool) -> Result<()> {
        if initblock != NIL_BLOCK {
            return Err(BrambleError::Insane(format!(
                "superblock must live at block 0, got {initblock}"
            )));
        }
        self.superblock_index = initblock;

        if create {
            let num_blocks = self.cache.num_blocks();
            if num_blocks < 3 {
                return Err(BrambleError::NoSpace);
            }

            let mut sb = self.fresh_node(NodeKind::Superblock);
            sb.header.root_block = 1;
            sb.header.free_next = 2;
            self.cache.notify_allocate(0);
            self.store(0, &sb)?;

            let mut root = self.fresh_node(NodeKind::Root);
            root.header.root_block = 1;
            self.cache.notify_allocate(1);
            self.store(1, &root)?;

            for i in 2..num_blocks {
                let mut free = self.fresh_node(NodeKind::Unallocated);
                free.header.root_block = 1;
                free.header.free_next = if i + 1 == num_blocks { NIL_BLOCK } else { i + 1 };
                self.store(i, &free)?;
            }
            debug!(num_blocks, "formatted store");
        }

        // Mounting is just a matter of reading the superblock.
        let sb = self.load(0)?;
        if sb.header.kind != NodeKind::Superblock {
            return Err(BrambleError::Insane(format!(
                "block 0 holds a {} node",
                sb.header.kind
            )));
        }
        if sb.header.key_size != self.superblock.header.key_size {
            return Err(BrambleError::BadLength {
                what: "key_size",
                expected: self.key_size(),
                actual: sb.header.key_size as usize,
            });
        }
        if sb.header.value_size != self.superblock.header.value_size {
            return Err(BrambleError::BadLength {
                what: "value_size",
                expected: self.value_size(),
                actual: sb.header.value_size as usize,
            });
        }
        self.superblock = sb;
        Ok(())
    }

    /// Persists the superblock and returns its block index.
    pub fn detach(&mut self) -> Result<BlockId> {
        self.persist_superblock()?;
        Ok(self.superblock_index)
    }

    // =========================================================================
    // Free-list allocator
    // =========================================================================

    /// Pops one block off the free list.
    ///
    /// The superblock is persisted with the shortened list before the block
    /// is handed out, so a crash leaks at most this one block and can never
    /// double-allocate it.
    pub fn allocate_block(&mut self) -> Result<BlockId> {
        let head = self.superblock.header.free_next;
        if head == NIL_BLOCK {
            return Err(BrambleError::NoSpace);
        }

        let node = self.load(head)?;
        if node.header.kind != NodeKind::Unallocated {
            return Err(BrambleError::Insane(format!(
                "free-list head {} has kind {}",
                head, node.header.kind
            )));
        }

        self.superblock.header.free_next = node.header.free_next;
        self.persist_superblock()?;
        self.cache.notify_allocate(head);
        debug!(block = head, "allocated block");
        Ok(head)
    }

    /// Pushes `block` back onto the free list.
    pub fn deallocate_block(&mut self, block: BlockId) -> Result<()> {
        let mut node = self.load(block)?;
        if node.header.kind == NodeKind::Unallocated {
            return Err(BrambleError::Insane(format!("double free of block {block}")));
        }

        node.header.kind = NodeKind::Unallocated;
        node.header.num_keys = 0;
        node.header.free_next = self.superblock.header.free_next;
        self.store(block, &node)?;

        self.superblock.header.free_next = block;
        self.persist_superblock()?;
        self.cache.notify_deallocate(block);
        debug!(block, "deallocated block");
        Ok(())
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Child selection: the first separator with `key <= sep` wins, else the
    /// last child. Equal-to-separator descends left, matching the partition
    /// invariant (subtree `c_i` holds keys `<= k_i`).
    fn child_for(&self, node: &Node, key: &[u8]) -> Result<BlockId> {
        let num_keys = node.header.num_keys as usize;
        for i in 0..num_keys {
            if key <= node.key(i)?.as_ref() {
                return node.ptr(i);
            }
        }
        node.ptr(num_keys)
    }

    fn find_leaf(&self, block: BlockId, key: &[u8]) -> Result<(BlockId, Node)> {
        let node = self.load(block)?;
        match node.header.kind {
            NodeKind::Root | NodeKind::Interior => {
                if node.header.num_keys == 0 {
                    return Err(BrambleError::Nonexistent);
                }
                let child = self.child_for(&node, key)?;
                self.find_leaf(child, key)
            }
            NodeKind::Leaf => Ok((block, node)),
            other => Err(BrambleError::Insane(format!(
                "descent reached a {} node at block {}",
                other, block
            ))),
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Point lookup.
    pub fn lookup(&self, key: &[u8]) -> Result<Bytes> {
        self.check_key(key)?;
        let (_, leaf) = self.find_leaf(self.root_block(), key)?;
        for i in 0..leaf.header.num_keys as usize {
            if leaf.key(i)?.as_ref() == key {
                return leaf.val(i);
            }
        }
        Err(BrambleError::Nonexistent)
    }

    /// Overwrites the value bound to an existing key. No insert-on-update.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        let (block, mut leaf) = self.find_leaf(self.root_block(), key)?;
        for i in 0..leaf.header.num_keys as usize {
            if leaf.key(i)?.as_ref() == key {
                leaf.set_val(i, value)?;
                return self.store(block, &leaf);
            }
        }
        Err(BrambleError::Nonexistent)
    }

    /// Binds `key` to `value`. At most one binding per key; inserting an
    /// existing key fails with `Conflict` and leaves the store untouched.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        match self.lookup(key) {
            Ok(_) => return Err(BrambleError::Conflict),
            Err(BrambleError::Nonexistent) => {}
            Err(e) => return Err(e),
        }

        let root_block = self.root_block();
        let root = self.load(root_block)?;
        if root.header.kind != NodeKind::Root {
            return Err(BrambleError::Insane(format!(
                "superblock names block {} as root but it holds a {} node",
                root_block, root.header.kind
            )));
        }

        if root.header.num_keys == 0 {
            self.bootstrap_root(root_block, root, key)?;
        }

        self.insert_descend(root_block, key, value)?;

        // A root that just reached capacity is split here, growing the tree
        // by one level; every other node at capacity was split by its parent
        // on the way back up.
        if self.load(root_block)?.is_full() {
            self.grow_root(root_block)?;
        }
        Ok(())
    }

    /// Deletion with rebalancing is not implemented.
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(BrambleError::Unimpl)
    }

    // =========================================================================
    // Insert machinery
    // =========================================================================

    /// First insert ever: the root gains its only separator (the incoming
    /// key) over two freshly allocated empty leaves.
    fn bootstrap_root(&mut self, root_block: BlockId, mut root: Node, key: &[u8]) -> Result<()> {
        let lhs = self.allocate_block()?;
        let rhs = self.allocate_block()?;

        let leaf = self.fresh_node(NodeKind::Leaf);
        self.store(lhs, &leaf)?;
        self.store(rhs, &leaf)?;

        root.header.num_keys = 1;
        root.set_key(0, key)?;
        root.set_ptr(0, lhs)?;
        root.set_ptr(1, rhs)?;
        self.store(root_block, &root)?;
        debug!(lhs, rhs, "bootstrapped empty tree");
        Ok(())
    }

    /// Recursive descent: insert at the leaf, then split any child that came
    /// back at capacity and push the promoted median into this node.
    fn insert_descend(&mut self, block: BlockId, key: &[u8], value: &[u8]) -> Result<()> {
        let node = self.load(block)?;
        match node.header.kind {
            NodeKind::Root | NodeKind::Interior => {
                if node.header.num_keys == 0 {
                    return Err(BrambleError::Insane(format!(
                        "empty interior node at block {block} during insert"
                    )));
                }
                let child = self.child_for(&node, key)?;
                self.insert_descend(child, key, value)?;

                let child_node = self.load(child)?;
                if child_node.is_full() {
                    let (median, new_block) = self.split_block(child, child_node)?;
                    self.insert_entry(block, &median, SlotEntry::RightChild(new_block))?;
                }
                Ok(())
            }
            NodeKind::Leaf => self.insert_entry(block, key, SlotEntry::Value(value)),
            other => Err(BrambleError::Insane(format!(
                "insert descent reached a {} node at block {}",
                other, block
            ))),
        }
    }

    /// Splits a node at capacity into itself (left half) and a newly
    /// allocated right sibling. Returns the promoted median and the new
    /// block. The right half hits the cache before the left so a crash in
    /// between leaks the sibling instead of corrupting the original.
    fn split_block(&mut self, block: BlockId, mut lhs: Node) -> Result<(Bytes, BlockId)> {
        let new_block = self.allocate_block()?;
        let mut rhs = self.fresh_node(lhs.header.kind);

        let ks = self.key_size();
        let n = lhs.header.num_keys as usize;
        let median;

        if lhs.header.kind == NodeKind::Leaf {
            // Upper half moves right in one contiguous copy. The median is
            // the max of the left half; it stays there and is promoted by
            // value, so an equal-descends-left probe still finds it.
            let m = (n + 2) / 2;
            median = lhs.key(m - 1)?;
            let src = lhs.keyval_offset(m)?;
            let dst = rhs.keyval_offset(0)?;
            let len = (n - m) * (ks + self.value_size());
            rhs.body_mut()[dst..dst + len].copy_from_slice(&lhs.body()[src..src + len]);
            lhs.header.num_keys = m as u16;
            rhs.header.num_keys = (n - m) as u16;
        } else {
            // Interior split removes the median from both halves: pointers
            // [m+1, n] and keys [m+1, n) move right as one byte run.
            let m = n / 2;
            median = lhs.key(m)?;
            let src = lhs.ptr_offset(m + 1)?;
            let dst = rhs.ptr_offset(0)?;
            let len = (n - m - 1) * (ks + PTR_SIZE) + PTR_SIZE;
            rhs.body_mut()[dst..dst + len].copy_from_slice(&lhs.body()[src..src + len]);
            lhs.header.num_keys = m as u16;
            rhs.header.num_keys = (n - m - 1) as u16;
        }

        self.store(new_block, &rhs)?;
        self.store(block, &lhs)?;
        debug!(
            block,
            new_block,
            left = lhs.header.num_keys,
            right = rhs.header.num_keys,
            "split node"
        );
        Ok((median, new_block))
    }

    /// Splits a full root, growing the tree by one level: the old root's
    /// halves are rekinded interior, a fresh root takes the promoted median
    /// as its only separator, and the superblock is repointed at it.
    fn grow_root(&mut self, old_root_block: BlockId) -> Result<()> {
        // Taking the new root's block first keeps an allocation failure from
        // touching the tree: the worst case is one leaked block.
        let new_root_block = self.allocate_block()?;

        let mut old_root = self.load(old_root_block)?;
        old_root.header.kind = NodeKind::Interior;
        let (median, right_block) = self.split_block(old_root_block, old_root)?;

        let mut new_root = self.fresh_node(NodeKind::Root);
        new_root.header.root_block = new_root_block;
        new_root.header.num_keys = 1;
        new_root.set_key(0, &median)?;
        new_root.set_ptr(0, old_root_block)?;
        new_root.set_ptr(1, right_block)?;
        self.store(new_root_block, &new_root)?;

        self.superblock.header.root_block = new_root_block;
        self.persist_superblock()?;
        debug!(
            old_root = old_root_block,
            new_root = new_root_block,
            "root split, tree grew a level"
        );
        Ok(())
    }

    /// Inserts one entry into a node with room: a (key, value) pair into a
    /// leaf, or a separator plus right child into an interior node. The
    /// displaced suffix moves in a single contiguous shift.
    fn insert_entry(&mut self, block: BlockId, key: &[u8], entry: SlotEntry) -> Result<()> {
        let mut node = self.load(block)?;
        let n = node.header.num_keys as usize;
        if n >= node.capacity() {
            return Err(BrambleError::NoSpace);
        }
        match (&entry, node.header.kind) {
            (SlotEntry::Value(_), NodeKind::Leaf) => {}
            (SlotEntry::RightChild(_), NodeKind::Root | NodeKind::Interior) => {}
            _ => {
                return Err(BrambleError::Insane(format!(
                    "entry shape does not match {} node at block {}",
                    node.header.kind, block
                )))
            }
        }

        let mut at = n;
        for i in 0..n {
            if key < node.key(i)?.as_ref() {
                at = i;
                break;
            }
        }

        let ks = self.key_size();
        node.header.num_keys = (n + 1) as u16;
        match entry {
            SlotEntry::Value(value) => {
                if at < n {
                    let start = node.keyval_offset(at)?;
                    let slot = ks + self.value_size();
                    let len = (n - at) * slot;
                    node.body_mut().copy_within(start..start + len, start + slot);
                }
                node.set_key(at, key)?;
                node.set_val(at, value)?;
            }
            SlotEntry::RightChild(child) => {
                // The run from key_at through the trailing pointer interleaves
                // keys [at, n) and pointers [at+1, n]; one move shifts both.
                if at < n {
                    let start = node.key_offset(at)?;
                    let slot = ks + PTR_SIZE;
                    let len = (n - at) * slot;
                    node.body_mut().copy_within(start..start + len, start + slot);
                }
                node.set_key(at, key)?;
                node.set_ptr(at + 1, child)?;
            }
        }
        self.store(block, &node)
    }

    // =========================================================================
    // Sanity check
    // =========================================================================

    /// Verifies the structural invariants of the persisted tree.
    ///
    /// Checks: superblock kind at block 0; root kind at the stamped root
    /// index; size stamps consistent on every reachable node; keys strictly
    /// increasing within each node; all leaves at equal depth; no cycles;
    /// the free list acyclic, terminated at 0, every member unallocated; and
    /// no block both reachable and free.
    pub fn sanity_check(&self) -> Result<()> {
        let sb = self.load(0)?;
        if sb.header.kind != NodeKind::Superblock {
            return Err(BrambleError::Insane(format!(
                "block 0 holds a {} node",
                sb.header.kind
            )));
        }

        let root_block = sb.header.root_block;
        let mut reachable = HashSet::new();
        let mut leaf_depth = None;
        self.check_subtree(&sb, root_block, true, 0, &mut reachable, &mut leaf_depth)?;

        let mut free = HashSet::new();
        let mut cursor = sb.header.free_next;
        while cursor != NIL_BLOCK {
            if !free.insert(cursor) {
                return Err(BrambleError::Insane(format!(
                    "free list cycles back to block {cursor}"
                )));
            }
            let node = self.load(cursor)?;
            if node.header.kind != NodeKind::Unallocated {
                return Err(BrambleError::Insane(format!(
                    "free-list member {} has kind {}",
                    cursor, node.header.kind
                )));
            }
            cursor = node.header.free_next;
        }

        if let Some(shared) = reachable.intersection(&free).next() {
            return Err(BrambleError::Insane(format!(
                "block {shared} is both reachable and free"
            )));
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        sb: &Node,
        block: BlockId,
        expect_root: bool,
        depth: usize,
        reachable: &mut HashSet<BlockId>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        if !reachable.insert(block) {
            return Err(BrambleError::Insane(format!(
                "block {block} is reachable twice"
            )));
        }

        let node = self.load(block)?;
        let h = &node.header;
        if h.key_size != sb.header.key_size
            || h.value_size != sb.header.value_size
            || h.block_size != sb.header.block_size
        {
            return Err(BrambleError::Insane(format!(
                "size stamps on block {block} disagree with the superblock"
            )));
        }
        if h.num_keys as usize > node.capacity() {
            return Err(BrambleError::Insane(format!(
                "block {} holds {} keys but has capacity {}",
                block,
                h.num_keys,
                node.capacity()
            )));
        }
        for i in 1..h.num_keys as usize {
            if node.key(i - 1)? >= node.key(i)? {
                return Err(BrambleError::Insane(format!(
                    "keys out of order in block {block}"
                )));
            }
        }

        match h.kind {
            NodeKind::Root if expect_root => {
                if h.num_keys == 0 {
                    return Ok(()); // empty tree
                }
                for i in 0..=h.num_keys as usize {
                    self.check_subtree(sb, node.ptr(i)?, false, depth + 1, reachable, leaf_depth)?;
                }
                Ok(())
            }
            NodeKind::Interior if !expect_root => {
                if h.num_keys == 0 {
                    return Err(BrambleError::Insane(format!(
                        "empty interior node at block {block}"
                    )));
                }
                for i in 0..=h.num_keys as usize {
                    self.check_subtree(sb, node.ptr(i)?, false, depth + 1, reachable, leaf_depth)?;
                }
                Ok(())
            }
            NodeKind::Leaf if !expect_root => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(BrambleError::Insane(format!(
                            "leaf at block {block} sits at depth {depth}, others at {d}"
                        )));
                    }
                    Some(_) => {}
                }
                Ok(())
            }
            other => Err(BrambleError::Insane(format!(
                "unexpected {} node at block {} (depth {})",
                other, block, depth
            ))),
        }
    }
}
