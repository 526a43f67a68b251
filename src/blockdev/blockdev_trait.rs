//! Block device trait definitions for SimpleFS

use std::io;
use thiserror::Error;

/// Block size in bytes (4KB)
pub const BLOCK_SIZE: usize = 4096;

/// Error type for block device operations
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    /// Underlying host I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Block index outside the device
    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(u64),
    /// Buffer is not exactly one block
    #[error("Invalid block size: {0} (expected {BLOCK_SIZE})")]
    InvalidBlockSize(usize),
    /// The device has been closed
    #[error("Device is already closed")]
    DeviceClosed,
}

/// Result type for block device operations
pub type Result<T> = std::result::Result<T, BlockDeviceError>;

/// Trait for block device operations
///
/// The filesystem layer consumes exactly this surface: whole-block reads
/// and writes addressed by index, plus transfer counters for diagnostics.
/// No partial-block transfers are exposed and nothing is retried.
#[async_trait::async_trait]
pub trait BlockDevice: Send + Sync + 'static {
    /// Read one block from the device into `buf` (must be `BLOCK_SIZE` bytes)
    async fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<()>;

    /// Write one block (`data` must be `BLOCK_SIZE` bytes) to the device
    async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()>;

    /// Get the total number of blocks in the device
    fn block_count(&self) -> u64;

    /// Get the block size in bytes
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Number of successful block reads since the device was opened
    fn read_count(&self) -> u64;

    /// Number of successful block writes since the device was opened
    fn write_count(&self) -> u64;

    /// Sync any pending writes to the device
    async fn sync(&self) -> Result<()>;

    /// Close the device, reporting the cumulative transfer counters.
    /// Any further I/O fails with [`BlockDeviceError::DeviceClosed`].
    async fn close(&self) -> Result<()>;
}
