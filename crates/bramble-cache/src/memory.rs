//! In-memory block store.

use crate::BlockCache;
use bramble_common::block::BlockId;
use bramble_common::{BrambleError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by [`MemoryCache`] for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of block reads served.
    pub reads: u64,
    /// Number of block writes served.
    pub writes: u64,
    /// Blocks currently marked allocated via the advisory hooks.
    pub allocated: u64,
}

/// Block store holding every block in RAM.
///
/// Blocks are zero-filled at creation, mirroring a freshly formatted disk.
pub struct MemoryCache {
    block_size: usize,
    blocks: Mutex<Vec<Box<[u8]>>>,
    reads: AtomicU64,
    writes: AtomicU64,
    allocated: AtomicU64,
}

impl MemoryCache {
    /// Creates a store of `num_blocks` zeroed blocks.
    pub fn new(block_size: usize, num_blocks: u64) -> Self {
        let blocks = (0..num_blocks)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        Self {
            block_size,
            blocks: Mutex::new(blocks),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Returns a snapshot of the access counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }

    fn check_buf(&self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.block_size {
            return Err(BrambleError::BlockSizeMismatch {
                expected: self.block_size,
                actual: buf.len(),
            });
        }
        Ok(())
    }
}

impl BlockCache for MemoryCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.blocks.lock().len() as u64
    }

    fn read_block(&self, index: BlockId, buf: &mut [u8]) -> Result<()> {
        self.check_buf(buf)?;
        let blocks = self.blocks.lock();
        let block = blocks
            .get(index as usize)
            .ok_or(BrambleError::BlockOutOfRange {
                index,
                limit: blocks.len() as u64,
            })?;
        buf.copy_from_slice(block);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, index: BlockId, buf: &[u8]) -> Result<()> {
        self.check_buf(buf)?;
        let mut blocks = self.blocks.lock();
        let limit = blocks.len() as u64;
        let block = blocks
            .get_mut(index as usize)
            .ok_or(BrambleError::BlockOutOfRange { index, limit })?;
        block.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn notify_allocate(&self, _index: BlockId) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn notify_deallocate(&self, _index: BlockId) {
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }
}
