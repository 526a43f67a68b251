//! SimpleFS Core - an educational inode-indexed filesystem
//!
//! This crate stores files as inode-indexed byte streams on a flat,
//! block-addressed disk image. It has two layers: [`blockdev`] exposes a
//! fixed array of 4KB blocks backed by a host file, and [`fs`] interprets
//! those blocks as a SimpleFS image - a superblock, an inode table
//! covering 10% of the disk, and a data region addressed by five direct
//! pointers plus one indirect block per inode. A free-block bitmap is
//! rebuilt from the live inodes on every mount and never persisted.
//!
//! ```no_run
//! use simplefs::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), FsError> {
//! let device = Arc::new(FileBackedBlockDevice::open("disk.img", 100).await?);
//! let mut fs = FileSystem::new();
//! fs.format(device.as_ref()).await?;
//! fs.mount(device.clone()).await?;
//!
//! let inode = fs.create().await?;
//! fs.write(inode, b"hello world", 0).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod bitmap;
pub mod blockdev;
pub mod format;
pub mod fs;
pub mod layout;

// Re-export block device types
pub use blockdev::{BlockDevice, BlockDeviceError, FileBackedBlockDevice, BLOCK_SIZE};

// Re-export the on-disk format types
pub use format::{
    Inode, Superblock, INODES_PER_BLOCK, INODE_SIZE, MAGIC, MAX_FILE_SIZE, POINTERS_PER_BLOCK,
    POINTERS_PER_INODE,
};

// Re-export the filesystem types
pub use fs::{FileSystem, FsError};

/// Block device result type
pub type BlockResult<T> = std::result::Result<T, BlockDeviceError>;

/// Re-export common types and traits
pub mod prelude {
    pub use crate::bitmap::FreeBitmap;
    pub use crate::blockdev::{BlockDevice, BlockDeviceError, FileBackedBlockDevice, BLOCK_SIZE};
    pub use crate::format::{Inode, Superblock, MAX_FILE_SIZE};
    pub use crate::fs::{FileSystem, FsError};
    pub use crate::layout::Layout;
}
