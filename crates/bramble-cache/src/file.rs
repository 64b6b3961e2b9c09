//! File-backed block store.

use crate::BlockCache;
use bramble_common::block::BlockId;
use bramble_common::{BrambleError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Block store backed by a single preallocated file.
///
/// Block `i` lives at byte offset `i * block_size`. The store never grows:
/// its size is fixed when the file is created.
pub struct FileCache {
    path: PathBuf,
    block_size: usize,
    num_blocks: u64,
    fsync_enabled: bool,
    file: Mutex<File>,
}

impl FileCache {
    /// Creates a new store file of `num_blocks` zeroed blocks.
    ///
    /// Truncates any existing file at `path`.
    pub fn create(
        path: impl AsRef<Path>,
        block_size: usize,
        num_blocks: u64,
        fsync_enabled: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(num_blocks * block_size as u64)?;
        if fsync_enabled {
            file.sync_all()?;
        }

        Ok(Self {
            path,
            block_size,
            num_blocks,
            fsync_enabled,
            file: Mutex::new(file),
        })
    }

    /// Opens an existing store file, deriving the block count from its length.
    pub fn open(path: impl AsRef<Path>, block_size: usize, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 || len % block_size as u64 != 0 {
            return Err(BrambleError::Config(format!(
                "store file {} has length {} which is not a multiple of block_size {}",
                path.display(),
                len,
                block_size
            )));
        }

        Ok(Self {
            path,
            block_size,
            num_blocks: len / block_size as u64,
            fsync_enabled,
            file: Mutex::new(file),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_access(&self, index: BlockId, buf_len: usize) -> Result<()> {
        if buf_len != self.block_size {
            return Err(BrambleError::BlockSizeMismatch {
                expected: self.block_size,
                actual: buf_len,
            });
        }
        if index >= self.num_blocks {
            return Err(BrambleError::BlockOutOfRange {
                index,
                limit: self.num_blocks,
            });
        }
        Ok(())
    }
}

impl BlockCache for FileCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read_block(&self, index: BlockId, buf: &mut [u8]) -> Result<()> {
        self.check_access(index, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index * self.block_size as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&self, index: BlockId, buf: &[u8]) -> Result<()> {
        self.check_access(index, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index * self.block_size as u64))?;
        file.write_all(buf)?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_cache(num_blocks: u64) -> (FileCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let cache = FileCache::create(dir.path().join("store.dat"), 64, num_blocks, false).unwrap();
        (cache, dir)
    }

    #[test]
    fn test_create_geometry() {
        let (cache, _dir) = create_test_cache(10);
        assert_eq!(cache.block_size(), 64);
        assert_eq!(cache.num_blocks(), 10);
        assert!(cache.path().exists());
    }

    #[test]
    fn test_create_is_zeroed() {
        let (cache, _dir) = create_test_cache(10);
        let mut buf = vec![0xAAu8; 64];
        cache.read_block(9, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (cache, _dir) = create_test_cache(10);

        let mut data = vec![0u8; 64];
        data[0] = 0xCD;
        data[63] = 0x12;
        cache.write_block(3, &data).unwrap();

        let mut read = vec![0u8; 64];
        cache.read_block(3, &mut read).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn test_out_of_range() {
        let (cache, _dir) = create_test_cache(10);
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            cache.read_block(10, &mut buf).unwrap_err(),
            BrambleError::BlockOutOfRange { index: 10, limit: 10 }
        ));
        assert!(cache.write_block(10, &buf).is_err());
    }

    #[test]
    fn test_wrong_buffer_size() {
        let (cache, _dir) = create_test_cache(10);
        let mut buf = vec![0u8; 63];
        assert!(cache.read_block(0, &mut buf).is_err());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");

        {
            let cache = FileCache::create(&path, 64, 5, true).unwrap();
            let mut data = vec![0u8; 64];
            data[7] = 0x77;
            cache.write_block(2, &data).unwrap();
        }

        let cache = FileCache::open(&path, 64, true).unwrap();
        assert_eq!(cache.num_blocks(), 5);
        let mut read = vec![0u8; 64];
        cache.read_block(2, &mut read).unwrap();
        assert_eq!(read[7], 0x77);
    }

    #[test]
    fn test_open_rejects_misaligned_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        assert!(FileCache::open(&path, 64, false).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        assert!(FileCache::open(dir.path().join("absent.dat"), 64, false).is_err());
    }
}
