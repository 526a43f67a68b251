//! Block device I/O for SimpleFS disk images

mod blockdev_trait;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

// Re-export the block device trait and related types
pub use self::blockdev_trait::{BlockDevice, BlockDeviceError, Result, BLOCK_SIZE};

/// A block device backed by a disk image file on the host filesystem
#[derive(Debug)]
pub struct FileBackedBlockDevice {
    file: Mutex<Option<File>>,
    path: PathBuf,
    block_count: u64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FileBackedBlockDevice {
    /// Open the disk image at `path` with exactly `blocks` blocks.
    ///
    /// Creates the file if it does not exist and truncates or extends it
    /// to `blocks * BLOCK_SIZE` bytes. A freshly extended region reads as
    /// zeros; an existing image keeps whatever it already held.
    pub async fn open(path: impl AsRef<Path>, blocks: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;

        // Set file length to the requested geometry
        file.set_len(blocks * BLOCK_SIZE as u64).await?;

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            block_count: blocks,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    /// Path of the backing image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sanity_check(&self, block_num: u64, len: usize) -> Result<()> {
        if block_num >= self.block_count {
            return Err(BlockDeviceError::InvalidBlockNumber(block_num));
        }
        if len != BLOCK_SIZE {
            return Err(BlockDeviceError::InvalidBlockSize(len));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockDevice for FileBackedBlockDevice {
    async fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<()> {
        self.sanity_check(block_num, buf.len())?;

        let offset = block_num * BLOCK_SIZE as u64;
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(buf).await?;
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()> {
        self.sanity_check(block_num, data.len())?;

        let offset = block_num * BLOCK_SIZE as u64;
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.flush().await?;
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    async fn sync(&self) -> Result<()> {
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.sync_all().await?;
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    async fn close(&self) -> Result<()> {
        let mut file_guard = self.file.lock().await;

        if file_guard.take().is_some() {
            log::info!(
                "device closed: {} reads, {} writes",
                self.reads.load(Ordering::Relaxed),
                self.writes.load(Ordering::Relaxed)
            );
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }
}
