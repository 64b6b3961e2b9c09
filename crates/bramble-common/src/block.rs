//! Block primitives: block indices, node kinds, and the on-block header.

use crate::error::{BrambleError, Result};

/// Index of a block within the backing store.
///
/// Block 0 is always the superblock. The value 0 doubles as the "none"
/// sentinel in free-list chaining; the superblock itself is never on the
/// free list, so the overloading is unambiguous.
pub type BlockId = u64;

/// Free-list terminator / "no block" sentinel.
pub const NIL_BLOCK: BlockId = 0;

/// Width of a child pointer / free-list link within a block.
pub const PTR_SIZE: usize = 8;

/// Kind tag stamped on every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// Free block on the free list.
    Unallocated = 0,
    /// Block 0: global metadata and the free-list head.
    Superblock = 1,
    /// The tree root (interior-shaped slots).
    Root = 2,
    /// Interior node: separators and child pointers.
    Interior = 3,
    /// Leaf node: key/value pairs.
    Leaf = 4,
}

impl NodeKind {
    /// Decodes a kind tag. An unknown tag means a corrupt or foreign block.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(NodeKind::Unallocated),
            1 => Ok(NodeKind::Superblock),
            2 => Ok(NodeKind::Root),
            3 => Ok(NodeKind::Interior),
            4 => Ok(NodeKind::Leaf),
            other => Err(BrambleError::Insane(format!("unknown node kind tag {other}"))),
        }
    }

    /// Returns true for kinds whose slot region is interior-shaped.
    pub fn is_interior_like(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Interior)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeKind::Unallocated => "unallocated",
            NodeKind::Superblock => "superblock",
            NodeKind::Root => "root",
            NodeKind::Interior => "interior",
            NodeKind::Leaf => "leaf",
        };
        f.write_str(name)
    }
}

/// Header at the start of every block.
///
/// Layout (32 bytes, little-endian):
/// - kind: 1 byte
/// - reserved: 1 byte
/// - key_size: 2 bytes
/// - value_size: 2 bytes
/// - block_size: 4 bytes
/// - root_block: 8 bytes
/// - free_next: 8 bytes (free-list head on the superblock, successor on
///   unallocated blocks)
/// - num_keys: 2 bytes
/// - reserved: 4 bytes
///
/// The key/value/block sizes are stamped redundantly on every node; the
/// authoritative copy lives in the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Kind of this block.
    pub kind: NodeKind,
    /// Key width in bytes.
    pub key_size: u16,
    /// Value width in bytes.
    pub value_size: u16,
    /// Block width in bytes.
    pub block_size: u32,
    /// Block index of the tree root.
    pub root_block: BlockId,
    /// Free-list successor (0 = end of list).
    pub free_next: BlockId,
    /// Number of keys currently held.
    pub num_keys: u16,
}

impl NodeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Creates a header for a freshly formatted block.
    pub fn new(kind: NodeKind, key_size: u16, value_size: u16, block_size: u32) -> Self {
        Self {
            kind,
            key_size,
            value_size,
            block_size,
            root_block: NIL_BLOCK,
            free_next: NIL_BLOCK,
            num_keys: 0,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.kind as u8;
        buf[2..4].copy_from_slice(&self.key_size.to_le_bytes());
        buf[4..6].copy_from_slice(&self.value_size.to_le_bytes());
        buf[6..10].copy_from_slice(&self.block_size.to_le_bytes());
        buf[10..18].copy_from_slice(&self.root_block.to_le_bytes());
        buf[18..26].copy_from_slice(&self.free_next.to_le_bytes());
        buf[26..28].copy_from_slice(&self.num_keys.to_le_bytes());
        // bytes 1 and 28-31 are reserved (already zeroed)
        buf
    }

    /// Deserializes the header from the first `SIZE` bytes of a block.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(BrambleError::BlockSizeMismatch {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            kind: NodeKind::from_u8(buf[0])?,
            key_size: u16::from_le_bytes([buf[2], buf[3]]),
            value_size: u16::from_le_bytes([buf[4], buf[5]]),
            block_size: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            root_block: u64::from_le_bytes([
                buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16], buf[17],
            ]),
            free_next: u64::from_le_bytes([
                buf[18], buf[19], buf[20], buf[21], buf[22], buf[23], buf[24], buf[25],
            ]),
            num_keys: u16::from_le_bytes([buf[26], buf[27]]),
        })
    }
}
