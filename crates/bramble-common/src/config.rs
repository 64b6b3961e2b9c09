//! Configuration for a Bramble block store.

use crate::block::{NodeHeader, PTR_SIZE};
use crate::error::{BrambleError, Result};
use serde::{Deserialize, Serialize};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of blocks in a freshly created store.
pub const DEFAULT_NUM_BLOCKS: u64 = 1024;

/// Geometry and durability settings for a block store.
///
/// Key, value, and block sizes are fixed at creation time and persisted in
/// the superblock; attaching with a mismatched configuration is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key width in bytes.
    pub key_size: usize,
    /// Value width in bytes.
    pub value_size: usize,
    /// Block width in bytes.
    pub block_size: usize,
    /// Number of blocks in the store.
    pub num_blocks: u64,
    /// Enable fsync after file-backed writes.
    pub fsync_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_size: 8,
            value_size: 8,
            block_size: DEFAULT_BLOCK_SIZE,
            num_blocks: DEFAULT_NUM_BLOCKS,
            fsync_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Validates the geometry.
    ///
    /// A block must hold the header, the reserved leading pointer, and at
    /// least two slots of each shape, so that a node can always be split.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(BrambleError::Config("key_size must be nonzero".into()));
        }
        if self.value_size == 0 {
            return Err(BrambleError::Config("value_size must be nonzero".into()));
        }
        if self.key_size > u16::MAX as usize {
            return Err(BrambleError::Config(format!(
                "key_size {} exceeds the header field width",
                self.key_size
            )));
        }
        if self.value_size > u16::MAX as usize {
            return Err(BrambleError::Config(format!(
                "value_size {} exceeds the header field width",
                self.value_size
            )));
        }
        if self.block_size > u32::MAX as usize {
            return Err(BrambleError::Config(format!(
                "block_size {} exceeds the header field width",
                self.block_size
            )));
        }

        let slot_region = self
            .block_size
            .checked_sub(NodeHeader::SIZE + PTR_SIZE)
            .unwrap_or(0);
        let widest_slot = self.key_size + self.value_size.max(PTR_SIZE);
        if slot_region / widest_slot < 2 {
            return Err(BrambleError::Config(format!(
                "block_size {} too small for two slots of key_size {} / value_size {}",
                self.block_size, self.key_size, self.value_size
            )));
        }
        Ok(())
    }

    /// Returns the total store size in bytes.
    pub fn store_size_bytes(&self) -> u64 {
        self.num_blocks * self.block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.key_size, 8);
        assert_eq!(config.value_size, 8);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.num_blocks, DEFAULT_NUM_BLOCKS);
        assert!(config.fsync_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scenario_geometry_is_valid() {
        let config = StoreConfig {
            key_size: 8,
            value_size: 8,
            block_size: 256,
            num_blocks: 100,
            fsync_enabled: false,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = StoreConfig {
            key_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            value_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_fields_rejected() {
        let config = StoreConfig {
            key_size: u16::MAX as usize + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            value_size: u16::MAX as usize + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_block_rejected() {
        let config = StoreConfig {
            key_size: 8,
            value_size: 8,
            block_size: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_size_bytes() {
        let config = StoreConfig {
            block_size: 256,
            num_blocks: 100,
            ..Default::default()
        };
        assert_eq!(config.store_size_bytes(), 25_600);
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = StoreConfig {
            key_size: 16,
            value_size: 32,
            block_size: 512,
            num_blocks: 50,
            fsync_enabled: false,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StoreConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.key_size, deserialized.key_size);
        assert_eq!(original.value_size, deserialized.value_size);
        assert_eq!(original.block_size, deserialized.block_size);
        assert_eq!(original.num_blocks, deserialized.num_blocks);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
