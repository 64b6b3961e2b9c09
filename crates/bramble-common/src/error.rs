//! Error types for the Bramble block index.

use crate::block::BlockId;
use thiserror::Error;

/// Result type alias using BrambleError.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Errors that can occur in Bramble operations.
#[derive(Debug, Error)]
pub enum BrambleError {
    // I/O and codec errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block {index} out of range (cache holds {limit} blocks)")]
    BlockOutOfRange { index: BlockId, limit: u64 },

    #[error("block size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    // Allocator errors
    #[error("no space: free list exhausted")]
    NoSpace,

    // Tree errors
    #[error("key not found")]
    Nonexistent,

    #[error("key already exists")]
    Conflict,

    #[error("slot {index} out of range (limit {limit})")]
    SlotOutOfRange { index: usize, limit: usize },

    #[error("{what} has wrong length: expected {expected}, got {actual}")]
    BadLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("operation not implemented")]
    Unimpl,

    #[error("index corrupted: {0}")]
    Insane(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}
