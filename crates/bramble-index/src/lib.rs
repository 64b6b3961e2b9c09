//! Disk-backed B-tree index mapping fixed-size keys to fixed-size values.
//!
//! Persistent state is a flat sequence of equally sized blocks behind the
//! [`bramble_cache::BlockCache`] trait. Block 0 is the superblock; it names
//! the root node and anchors a free list of unallocated blocks threaded
//! through the blocks themselves.
//!
//! Block layout:
//!
//! ```text
//! +--------------------+ 0
//! | Node header (32)   |   kind, sizes, root block, free-list link, numkeys
//! +--------------------+ 32
//! | Slot region        |
//! |  interior:         |   [ptr0][key0][ptr1][key1] ... [key_{n-1}][ptr_n]
//! |  leaf:             |   [sibling (reserved)][key0 val0] ... [key_{n-1} val_{n-1}]
//! +--------------------+ BLOCK_SIZE
//! ```
//!
//! The engine is single-threaded: every public operation runs to completion
//! before the next begins, and block writes within an operation are ordered
//! so a crash between any two writes can leak blocks but never leaves a
//! reachable node dangling.

pub mod display;
pub mod node;
pub mod tree;

pub use display::DisplayMode;
pub use node::Node;
pub use tree::BTreeIndex;
