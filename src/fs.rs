//! The SimpleFS filesystem layer
//!
//! A [`FileSystem`] handle is either detached or mounted on exactly one
//! block device. While mounted it holds the device, a copy of the
//! superblock, and the free-block bitmap rebuilt from the inode table.
//! Every mutation is write-through: the changed block reaches the device
//! before the operation moves on, so unmount has nothing to flush.

use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::bitmap::FreeBitmap;
use crate::blockdev::{BlockDevice, BlockDeviceError, BLOCK_SIZE};
use crate::format::{
    read_pointers, write_pointers, FormatError, Inode, Superblock, INODES_PER_BLOCK, MAGIC,
    MAX_FILE_SIZE, POINTERS_PER_INODE,
};
use crate::layout::Layout;

/// Filesystem error type
#[derive(Error, Debug)]
pub enum FsError {
    /// Block device failure, propagated as-is
    #[error("Block device error: {0}")]
    Device(#[from] BlockDeviceError),
    /// On-disk record could not be coded
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    /// The handle is already bound to a device
    #[error("Filesystem is already mounted")]
    AlreadyMounted,
    /// The operation needs a mounted handle
    #[error("Filesystem is not mounted")]
    NotMounted,
    /// Block 0 does not carry the SimpleFS magic
    #[error("Not a SimpleFS superblock")]
    InvalidSuperblock,
    /// Superblock geometry disagrees with the device
    #[error("Superblock geometry does not match the device")]
    GeometryMismatch,
    /// A live inode references a block outside the device
    #[error("Filesystem is corrupt")]
    CorruptFs,
    /// Inode number out of range or slot not in use
    #[error("Invalid inode number")]
    InvalidInode,
    /// The inode table is full
    #[error("No free inodes")]
    NoFreeInodes,
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::Format(FormatError::Io(err))
    }
}

/// Filesystem result type
pub type Result<T> = std::result::Result<T, FsError>;

/// State owned by the handle while it is bound to a device
struct Mounted {
    device: Arc<dyn BlockDevice>,
    superblock: Superblock,
    bitmap: FreeBitmap,
}

impl Mounted {
    /// Load the inode record for `inode_number` from its table block
    async fn load_inode(&self, inode_number: u32) -> Result<Inode> {
        if inode_number >= self.superblock.inodes {
            return Err(FsError::InvalidInode);
        }

        let layout = Layout::from_superblock(&self.superblock);
        let (table_block, slot) = layout.inode_location(inode_number);

        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_block(table_block as u64, &mut block).await?;
        Ok(Inode::read_slot(&block, slot)?)
    }

    /// Write the inode record back into its table block (read-modify-write
    /// of the containing block, the other 127 slots are preserved)
    async fn store_inode(&self, inode_number: u32, inode: &Inode) -> Result<()> {
        let layout = Layout::from_superblock(&self.superblock);
        let (table_block, slot) = layout.inode_location(inode_number);

        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_block(table_block as u64, &mut block).await?;
        inode.write_slot(&mut block, slot)?;
        self.device.write_block(table_block as u64, &block).await?;
        Ok(())
    }

    /// Data block backing logical block `logical` of a file, or 0 when
    /// that part of the file has never been written
    async fn file_block(&self, inode: &Inode, logical: usize) -> Result<u32> {
        if logical < POINTERS_PER_INODE {
            return Ok(inode.direct[logical]);
        }

        if inode.indirect == 0 {
            return Ok(0);
        }

        let slot = logical - POINTERS_PER_INODE;
        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_block(inode.indirect as u64, &mut block).await?;

        let mut cursor = Cursor::new(&block[slot * 4..slot * 4 + 4]);
        let pointer = cursor.read_u32::<LittleEndian>().map_err(FormatError::Io)?;
        Ok(pointer)
    }

    /// Resolve logical block `logical` for writing, allocating the data
    /// block (and, past the direct range, the indirect block) on demand.
    /// Every inode or indirect-block mutation is persisted before this
    /// returns. `None` means the disk has no free block left.
    async fn ensure_file_block(
        &mut self,
        inode: &mut Inode,
        inode_number: u32,
        logical: usize,
    ) -> Result<Option<u32>> {
        if logical < POINTERS_PER_INODE {
            if inode.direct[logical] == 0 {
                let fresh = match self.bitmap.allocate() {
                    Some(block) => block,
                    None => return Ok(None),
                };
                inode.direct[logical] = fresh;
                self.store_inode(inode_number, inode).await?;
            }
            return Ok(Some(inode.direct[logical]));
        }

        if inode.indirect == 0 {
            let fresh = match self.bitmap.allocate() {
                Some(block) => block,
                None => return Ok(None),
            };
            // A fresh indirect block must read as all-unused slots
            let zeros = vec![0u8; BLOCK_SIZE];
            self.device.write_block(fresh as u64, &zeros).await?;
            inode.indirect = fresh;
            self.store_inode(inode_number, inode).await?;
        }

        let slot = logical - POINTERS_PER_INODE;
        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_block(inode.indirect as u64, &mut block).await?;
        let mut pointers = read_pointers(&block)?;

        if pointers[slot] == 0 {
            let fresh = match self.bitmap.allocate() {
                Some(block) => block,
                None => return Ok(None),
            };
            pointers[slot] = fresh;
            write_pointers(&pointers, &mut block)?;
            self.device.write_block(inode.indirect as u64, &block).await?;
        }
        Ok(Some(pointers[slot]))
    }
}

/// A SimpleFS handle, detached or mounted on one block device
#[derive(Default)]
pub struct FileSystem {
    mounted: Option<Mounted>,
}

impl FileSystem {
    /// Create a detached handle
    pub fn new() -> Self {
        Self { mounted: None }
    }

    /// Whether the handle is currently bound to a device
    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Geometry of the mounted filesystem
    pub fn superblock(&self) -> Result<&Superblock> {
        Ok(&self.mounted()?.superblock)
    }

    /// Blocks currently available to the allocator
    pub fn free_blocks(&self) -> Result<usize> {
        Ok(self.mounted()?.bitmap.free_count())
    }

    fn mounted(&self) -> Result<&Mounted> {
        self.mounted.as_ref().ok_or(FsError::NotMounted)
    }

    fn mounted_mut(&mut self) -> Result<&mut Mounted> {
        self.mounted.as_mut().ok_or(FsError::NotMounted)
    }

    /// Write a fresh filesystem onto `device`, destroying its contents.
    ///
    /// Refused while this handle is mounted. The superblock lands in
    /// block 0 and every remaining block is overwritten with zeros,
    /// clearing the inode table and all data.
    pub async fn format(&self, device: &dyn BlockDevice) -> Result<()> {
        if self.mounted.is_some() {
            log::warn!("format refused: handle is mounted");
            return Err(FsError::AlreadyMounted);
        }

        let blocks = device.block_count() as u32;
        let layout = Layout::new(blocks);
        let superblock = Superblock {
            magic_number: MAGIC,
            blocks,
            inode_blocks: layout.inode_blocks,
            inodes: layout.inodes,
        };

        let mut block = vec![0u8; BLOCK_SIZE];
        superblock.write_to(&mut Cursor::new(&mut block[..]))?;
        device.write_block(0, &block).await?;

        let zeros = vec![0u8; BLOCK_SIZE];
        for index in 1..blocks {
            device.write_block(index as u64, &zeros).await?;
        }

        log::info!(
            "formatted {} blocks: {} inode blocks, {} inodes",
            blocks,
            layout.inode_blocks,
            layout.inodes
        );
        Ok(())
    }

    /// Bind this handle to `device`, validating the superblock and
    /// rebuilding the free-block bitmap from the live inodes.
    ///
    /// Any failure leaves the handle detached.
    pub async fn mount(&mut self, device: Arc<dyn BlockDevice>) -> Result<()> {
        if self.mounted.is_some() {
            log::warn!("mount refused: handle is already mounted");
            return Err(FsError::AlreadyMounted);
        }

        let mut block = vec![0u8; BLOCK_SIZE];
        device.read_block(0, &mut block).await?;
        let superblock = Superblock::read_from(&mut Cursor::new(&block[..]))?;

        if superblock.magic_number != MAGIC {
            return Err(FsError::InvalidSuperblock);
        }
        if u64::from(superblock.blocks) != device.block_count() {
            return Err(FsError::GeometryMismatch);
        }
        let tenth = superblock.blocks / 10;
        if superblock.inode_blocks != tenth && superblock.inode_blocks != tenth + 1 {
            return Err(FsError::GeometryMismatch);
        }

        // Superblock and inode table are never available for data
        let mut bitmap = FreeBitmap::new_all_free(superblock.blocks);
        for index in 0..=superblock.inode_blocks {
            bitmap.mark_used(index);
        }

        for table_block in 1..=superblock.inode_blocks {
            device.read_block(table_block as u64, &mut block).await?;

            for slot in 0..INODES_PER_BLOCK {
                let inode = Inode::read_slot(&block, slot)?;
                if !inode.is_valid() {
                    continue;
                }

                for &pointer in &inode.direct {
                    if pointer != 0 {
                        claim(&mut bitmap, &superblock, pointer)?;
                    }
                }

                if inode.indirect != 0 {
                    claim(&mut bitmap, &superblock, inode.indirect)?;

                    let mut indirect = vec![0u8; BLOCK_SIZE];
                    device.read_block(inode.indirect as u64, &mut indirect).await?;
                    for pointer in read_pointers(&indirect)? {
                        if pointer != 0 {
                            claim(&mut bitmap, &superblock, pointer)?;
                        }
                    }
                }
            }
        }

        log::info!(
            "mounted: {} blocks, {} inodes, {} blocks free",
            superblock.blocks,
            superblock.inodes,
            bitmap.free_count()
        );
        self.mounted = Some(Mounted {
            device,
            superblock,
            bitmap,
        });
        Ok(())
    }

    /// Detach from the device, dropping the bitmap.
    ///
    /// Nothing is flushed here: every mutation already reached the disk
    /// when its operation returned.
    pub fn unmount(&mut self) -> Result<()> {
        let state = self.mounted.take().ok_or(FsError::NotMounted)?;
        log::info!("unmounted: {} blocks", state.superblock.blocks);
        Ok(())
    }

    /// Allocate the lowest-numbered free inode.
    ///
    /// The new inode starts with size zero and no data blocks. Returns
    /// its global inode number.
    pub async fn create(&mut self) -> Result<u32> {
        let state = self.mounted_mut()?;

        let mut block = vec![0u8; BLOCK_SIZE];
        for table_block in 1..=state.superblock.inode_blocks {
            state.device.read_block(table_block as u64, &mut block).await?;

            for slot in 0..INODES_PER_BLOCK {
                if Inode::read_slot(&block, slot)?.is_valid() {
                    continue;
                }

                let fresh = Inode {
                    valid: 1,
                    ..Inode::default()
                };
                fresh.write_slot(&mut block, slot)?;
                state.device.write_block(table_block as u64, &block).await?;

                let inode_number = (table_block - 1) * INODES_PER_BLOCK as u32 + slot as u32;
                log::debug!("created inode {}", inode_number);
                return Ok(inode_number);
            }
        }

        Err(FsError::NoFreeInodes)
    }

    /// Remove an inode, releasing every data and indirect block it
    /// references back to the allocator.
    ///
    /// Releases are bitmap-only: freed blocks keep their bytes on disk
    /// until the next write reuses them.
    pub async fn remove(&mut self, inode_number: u32) -> Result<()> {
        let state = self.mounted_mut()?;
        let inode = state.load_inode(inode_number).await?;
        if !inode.is_valid() {
            return Err(FsError::InvalidInode);
        }

        for &pointer in &inode.direct {
            if pointer != 0 {
                state.bitmap.release(pointer);
            }
        }

        if inode.indirect != 0 {
            let mut block = vec![0u8; BLOCK_SIZE];
            state.device.read_block(inode.indirect as u64, &mut block).await?;
            for pointer in read_pointers(&block)? {
                if pointer != 0 {
                    state.bitmap.release(pointer);
                }
            }
            state.bitmap.release(inode.indirect);
        }

        state.store_inode(inode_number, &Inode::default()).await?;
        log::debug!("removed inode {}", inode_number);
        Ok(())
    }

    /// Size in bytes of a valid inode
    pub async fn stat(&self, inode_number: u32) -> Result<u32> {
        let state = self.mounted()?;
        let inode = state.load_inode(inode_number).await?;
        if !inode.is_valid() {
            return Err(FsError::InvalidInode);
        }
        Ok(inode.size)
    }

    /// Read up to `buf.len()` bytes starting at byte `offset` of the
    /// file, returning how many were copied.
    ///
    /// Requests past end-of-file are clamped; an offset at or beyond the
    /// file size reads nothing. A zero pointer inside the file (a hole
    /// left by a sparse write) reads as zeros.
    pub async fn read(&self, inode_number: u32, buf: &mut [u8], offset: u64) -> Result<usize> {
        let state = self.mounted()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let inode = state.load_inode(inode_number).await?;
        if !inode.is_valid() {
            return Err(FsError::InvalidInode);
        }

        let size = u64::from(inode.size);
        if offset >= size {
            return Ok(0);
        }
        let length = buf.len().min((size - offset) as usize);

        let mut copied = 0usize;
        let mut block = vec![0u8; BLOCK_SIZE];
        while copied < length {
            let position = offset + copied as u64;
            let logical = (position / BLOCK_SIZE as u64) as usize;
            let in_block = (position % BLOCK_SIZE as u64) as usize;
            let chunk = (length - copied).min(BLOCK_SIZE - in_block);

            let pointer = state.file_block(&inode, logical).await?;
            if pointer == 0 {
                buf[copied..copied + chunk].fill(0);
            } else {
                state.device.read_block(pointer as u64, &mut block).await?;
                buf[copied..copied + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
            }
            copied += chunk;
        }

        Ok(copied)
    }

    /// Write `data` at byte `offset` of the file, allocating data blocks
    /// and the indirect block on demand.
    ///
    /// Returns the number of bytes actually stored. The count is short of
    /// `data.len()` when the request crosses the maximum file size or the
    /// disk runs out of free blocks; blocks allocated before exhaustion
    /// stay allocated and are counted. On return the inode size is the
    /// high-water mark `max(old_size, offset + written)`.
    pub async fn write(&mut self, inode_number: u32, data: &[u8], offset: u64) -> Result<usize> {
        let state = self.mounted_mut()?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut inode = state.load_inode(inode_number).await?;
        if !inode.is_valid() {
            return Err(FsError::InvalidInode);
        }

        let length = if offset >= MAX_FILE_SIZE {
            0
        } else {
            data.len().min((MAX_FILE_SIZE - offset) as usize)
        };
        if length == 0 {
            return Ok(0);
        }

        let mut written = 0usize;
        let mut block = vec![0u8; BLOCK_SIZE];
        while written < length {
            let position = offset + written as u64;
            let logical = (position / BLOCK_SIZE as u64) as usize;
            let in_block = (position % BLOCK_SIZE as u64) as usize;
            let chunk = (length - written).min(BLOCK_SIZE - in_block);

            let pointer = match state.ensure_file_block(&mut inode, inode_number, logical).await? {
                Some(pointer) => pointer,
                // Out of space: report what made it to disk
                None => break,
            };

            if chunk < BLOCK_SIZE {
                state.device.read_block(pointer as u64, &mut block).await?;
            } else {
                block.fill(0);
            }
            block[in_block..in_block + chunk].copy_from_slice(&data[written..written + chunk]);
            state.device.write_block(pointer as u64, &block).await?;

            written += chunk;
        }

        let end = offset + written as u64;
        if end > u64::from(inode.size) {
            inode.size = end as u32;
            state.store_inode(inode_number, &inode).await?;
        }

        Ok(written)
    }

    /// Render the report for the filesystem on `device`: the superblock
    /// summary followed by one entry per valid inode, in ascending inode
    /// order.
    ///
    /// Works on any device, mounted or not. When the magic number is
    /// invalid the geometry fields cannot be trusted, so the report stops
    /// after the superblock section.
    pub async fn debug(device: &dyn BlockDevice) -> Result<String> {
        let mut block = vec![0u8; BLOCK_SIZE];
        device.read_block(0, &mut block).await?;
        let superblock = Superblock::read_from(&mut Cursor::new(&block[..]))?;

        let mut report = String::new();
        let valid = superblock.magic_number == MAGIC;
        let _ = writeln!(report, "SuperBlock:");
        let _ = writeln!(
            report,
            "    magic number is {}",
            if valid { "valid" } else { "invalid" }
        );
        let _ = writeln!(report, "    {} blocks", superblock.blocks);
        let _ = writeln!(report, "    {} inode blocks", superblock.inode_blocks);
        let _ = writeln!(report, "    {} inodes", superblock.inodes);
        if !valid {
            return Ok(report);
        }

        for table_block in 1..=superblock.inode_blocks {
            device.read_block(table_block as u64, &mut block).await?;

            for slot in 0..INODES_PER_BLOCK {
                let inode = Inode::read_slot(&block, slot)?;
                if !inode.is_valid() {
                    continue;
                }

                let inode_number = (table_block - 1) * INODES_PER_BLOCK as u32 + slot as u32;
                let _ = writeln!(report, "Inode {}:", inode_number);
                let _ = writeln!(report, "    size: {} bytes", inode.size);

                let _ = write!(report, "    direct blocks:");
                for &pointer in inode.direct.iter().filter(|&&p| p != 0) {
                    let _ = write!(report, " {}", pointer);
                }
                report.push('\n');

                if inode.indirect != 0 {
                    let _ = writeln!(report, "    indirect block: {}", inode.indirect);

                    let mut indirect = vec![0u8; BLOCK_SIZE];
                    device.read_block(inode.indirect as u64, &mut indirect).await?;
                    let _ = write!(report, "    indirect data blocks:");
                    for pointer in read_pointers(&indirect)?.into_iter().filter(|&p| p != 0) {
                        let _ = write!(report, " {}", pointer);
                    }
                    report.push('\n');
                }
            }
        }

        Ok(report)
    }
}

/// Record a live inode's block reference in the bitmap, rejecting
/// references outside the device
fn claim(bitmap: &mut FreeBitmap, superblock: &Superblock, pointer: u32) -> Result<()> {
    if pointer >= superblock.blocks {
        return Err(FsError::CorruptFs);
    }
    bitmap.mark_used(pointer);
    Ok(())
}
