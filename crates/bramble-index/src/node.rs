//! Typed node view over a block, plus the block codec.

use bramble_cache::BlockCache;
use bramble_common::block::{BlockId, NodeHeader, NodeKind, PTR_SIZE};
use bramble_common::{BrambleError, Result};
use bytes::Bytes;

/// In-memory image of one block: header plus the kind-specific slot region.
///
/// Interior and root nodes interleave pointers and separator keys, with one
/// trailing pointer: `num_keys` separators partition `num_keys + 1` children.
/// Leaves reserve a leading sibling-pointer field (never used for chaining)
/// followed by packed (key, value) pairs.
///
/// The view never persists itself as a side effect; callers round through
/// [`Node::read_from`] / [`Node::write_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// The block header.
    pub header: NodeHeader,
    /// Slot region bytes (block minus header).
    body: Vec<u8>,
}

impl Node {
    /// Creates a freshly formatted node with a zeroed slot region.
    pub fn new(kind: NodeKind, key_size: u16, value_size: u16, block_size: u32) -> Self {
        let body_len = (block_size as usize).saturating_sub(NodeHeader::SIZE);
        Self {
            header: NodeHeader::new(kind, key_size, value_size, block_size),
            body: vec![0u8; body_len],
        }
    }

    fn key_size(&self) -> usize {
        self.header.key_size as usize
    }

    fn value_size(&self) -> usize {
        self.header.value_size as usize
    }

    fn num_keys(&self) -> usize {
        self.header.num_keys as usize
    }

    /// Maximum separators an interior-shaped node can hold.
    ///
    /// The leading pointer is budgeted up front so the trailing pointer of a
    /// node at exact capacity still fits.
    pub fn interior_capacity(&self) -> usize {
        self.body
            .len()
            .saturating_sub(PTR_SIZE)
            .checked_div(self.key_size() + PTR_SIZE)
            .unwrap_or(0)
    }

    /// Maximum (key, value) pairs a leaf can hold.
    pub fn leaf_capacity(&self) -> usize {
        self.body
            .len()
            .saturating_sub(PTR_SIZE)
            .checked_div(self.key_size() + self.value_size())
            .unwrap_or(0)
    }

    /// Slot capacity of this node, by kind.
    pub fn capacity(&self) -> usize {
        match self.header.kind {
            NodeKind::Root | NodeKind::Interior => self.interior_capacity(),
            NodeKind::Leaf => self.leaf_capacity(),
            NodeKind::Superblock | NodeKind::Unallocated => 0,
        }
    }

    /// A node at capacity needs splitting before it can take another entry.
    pub fn is_full(&self) -> bool {
        let capacity = self.capacity();
        capacity > 0 && self.num_keys() >= capacity
    }

    // =========================================================================
    // Byte-offset resolvers (body-relative), used by the splitter's bulk moves
    // =========================================================================

    /// Byte offset of pointer slot `i`. Interior-shaped nodes address slots
    /// `0..=capacity`; leaves expose only the reserved slot 0.
    pub fn ptr_offset(&self, i: usize) -> Result<usize> {
        match self.header.kind {
            NodeKind::Root | NodeKind::Interior => {
                if i > self.interior_capacity() {
                    return Err(BrambleError::SlotOutOfRange {
                        index: i,
                        limit: self.interior_capacity(),
                    });
                }
                Ok(i * (PTR_SIZE + self.key_size()))
            }
            NodeKind::Leaf if i == 0 => Ok(0),
            _ => Err(BrambleError::SlotOutOfRange { index: i, limit: 0 }),
        }
    }

    /// Byte offset of key slot `i` within the slot region.
    pub fn key_offset(&self, i: usize) -> Result<usize> {
        match self.header.kind {
            NodeKind::Root | NodeKind::Interior => {
                if i >= self.interior_capacity() {
                    return Err(BrambleError::SlotOutOfRange {
                        index: i,
                        limit: self.interior_capacity(),
                    });
                }
                Ok(i * (PTR_SIZE + self.key_size()) + PTR_SIZE)
            }
            NodeKind::Leaf => {
                if i >= self.leaf_capacity() {
                    return Err(BrambleError::SlotOutOfRange {
                        index: i,
                        limit: self.leaf_capacity(),
                    });
                }
                Ok(PTR_SIZE + i * (self.key_size() + self.value_size()))
            }
            _ => Err(BrambleError::SlotOutOfRange { index: i, limit: 0 }),
        }
    }

    /// Byte offset of (key, value) pair `i` in a leaf. Accepts `i == capacity`
    /// as the one-past-the-end boundary for bulk moves.
    pub fn keyval_offset(&self, i: usize) -> Result<usize> {
        if self.header.kind != NodeKind::Leaf {
            return Err(BrambleError::SlotOutOfRange { index: i, limit: 0 });
        }
        if i > self.leaf_capacity() {
            return Err(BrambleError::SlotOutOfRange {
                index: i,
                limit: self.leaf_capacity(),
            });
        }
        Ok(PTR_SIZE + i * (self.key_size() + self.value_size()))
    }

    // =========================================================================
    // Typed slot accessors
    // =========================================================================

    fn check_live(&self, i: usize) -> Result<()> {
        if i >= self.num_keys() {
            return Err(BrambleError::SlotOutOfRange {
                index: i,
                limit: self.num_keys(),
            });
        }
        Ok(())
    }

    /// Returns key `i`, for `i < num_keys`.
    pub fn key(&self, i: usize) -> Result<Bytes> {
        self.check_live(i)?;
        let off = self.key_offset(i)?;
        Ok(Bytes::copy_from_slice(&self.body[off..off + self.key_size()]))
    }

    /// Writes key `i`, for `i < num_keys`.
    pub fn set_key(&mut self, i: usize, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(BrambleError::BadLength {
                what: "key",
                expected: self.key_size(),
                actual: key.len(),
            });
        }
        self.check_live(i)?;
        let off = self.key_offset(i)?;
        self.body[off..off + key.len()].copy_from_slice(key);
        Ok(())
    }

    /// Returns child pointer `i`, for `i <= num_keys` (interior/root).
    pub fn ptr(&self, i: usize) -> Result<BlockId> {
        if self.header.kind.is_interior_like() && i > self.num_keys() {
            return Err(BrambleError::SlotOutOfRange {
                index: i,
                limit: self.num_keys(),
            });
        }
        let off = self.ptr_offset(i)?;
        let b = &self.body;
        Ok(u64::from_le_bytes([
            b[off],
            b[off + 1],
            b[off + 2],
            b[off + 3],
            b[off + 4],
            b[off + 5],
            b[off + 6],
            b[off + 7],
        ]))
    }

    /// Writes child pointer `i`, for `i <= num_keys` (interior/root).
    pub fn set_ptr(&mut self, i: usize, p: BlockId) -> Result<()> {
        if self.header.kind.is_interior_like() && i > self.num_keys() {
            return Err(BrambleError::SlotOutOfRange {
                index: i,
                limit: self.num_keys(),
            });
        }
        let off = self.ptr_offset(i)?;
        self.body[off..off + PTR_SIZE].copy_from_slice(&p.to_le_bytes());
        Ok(())
    }

    /// Returns value `i`, for `i < num_keys` (leaf).
    pub fn val(&self, i: usize) -> Result<Bytes> {
        if self.header.kind != NodeKind::Leaf {
            return Err(BrambleError::SlotOutOfRange { index: i, limit: 0 });
        }
        self.check_live(i)?;
        let off = self.keyval_offset(i)? + self.key_size();
        Ok(Bytes::copy_from_slice(
            &self.body[off..off + self.value_size()],
        ))
    }

    /// Writes value `i`, for `i < num_keys` (leaf).
    pub fn set_val(&mut self, i: usize, val: &[u8]) -> Result<()> {
        if val.len() != self.value_size() {
            return Err(BrambleError::BadLength {
                what: "value",
                expected: self.value_size(),
                actual: val.len(),
            });
        }
        if self.header.kind != NodeKind::Leaf {
            return Err(BrambleError::SlotOutOfRange { index: i, limit: 0 });
        }
        self.check_live(i)?;
        let off = self.keyval_offset(i)? + self.key_size();
        self.body[off..off + val.len()].copy_from_slice(val);
        Ok(())
    }

    /// Raw slot-region bytes, for the splitter's contiguous moves.
    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable slot-region bytes, for the splitter's contiguous moves.
    pub(crate) fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    // =========================================================================
    // Block codec
    // =========================================================================

    /// Serializes the node to exactly one block.
    pub fn to_block_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; NodeHeader::SIZE + self.body.len()];
        buf[..NodeHeader::SIZE].copy_from_slice(&self.header.to_bytes());
        buf[NodeHeader::SIZE..].copy_from_slice(&self.body);
        buf
    }

    /// Deserializes a node from one block. The header's stamped block size
    /// must match the buffer length; the codec is bit-exact and little-endian
    /// so a store written on one architecture is readable on another.
    pub fn from_block_bytes(buf: &[u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(buf)?;
        if header.block_size as usize != buf.len() {
            return Err(BrambleError::BlockSizeMismatch {
                expected: header.block_size as usize,
                actual: buf.len(),
            });
        }
        Ok(Self {
            header,
            body: buf[NodeHeader::SIZE..].to_vec(),
        })
    }

    /// Loads the node stored in block `block`.
    pub fn read_from<C: BlockCache>(cache: &C, block: BlockId) -> Result<Self> {
        let mut buf = vec![0u8; cache.block_size()];
        cache.read_block(block, &mut buf)?;
        Self::from_block_bytes(&buf)
    }

    /// Stores the node into block `block`.
    pub fn write_to<C: BlockCache>(&self, cache: &C, block: BlockId) -> Result<()> {
        let buf = self.to_block_bytes();
        if buf.len() != cache.block_size() {
            return Err(BrambleError::BlockSizeMismatch {
                expected: cache.block_size(),
                actual: buf.len(),
            });
        }
        cache.write_block(block, &buf)
    }
}
