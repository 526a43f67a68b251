//! SimpleFS on-disk format
//!
//! Everything stored on disk is little-endian. Block 0 holds the
//! superblock, blocks `1..=inode_blocks` hold the packed inode table,
//! and the rest of the device is data and indirect blocks.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

use crate::blockdev::BLOCK_SIZE;

/// Magic number identifying a SimpleFS superblock
pub const MAGIC: u32 = 0xf0f0_3410;

/// Direct data-block pointers per inode
pub const POINTERS_PER_INODE: usize = 5;

/// Data-block pointers held by one indirect block
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Size of one packed inode in bytes
pub const INODE_SIZE: usize = 32;

/// Inode slots per inode-table block
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Largest file an inode can address: five direct blocks plus one
/// indirect block of pointers.
pub const MAX_FILE_SIZE: u64 = ((POINTERS_PER_INODE + POINTERS_PER_BLOCK) * BLOCK_SIZE) as u64;

/// Error type for on-disk codec operations
#[derive(Error, Debug)]
pub enum FormatError {
    /// Underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Buffer too short for the requested record
    #[error("Truncated block buffer")]
    Truncated,
}

/// Filesystem identity and geometry, stored in block 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Magic number ([`MAGIC`] on a valid filesystem)
    pub magic_number: u32,
    /// Total blocks on the device
    pub blocks: u32,
    /// Blocks reserved for the inode table
    pub inode_blocks: u32,
    /// Inode slots across the whole table
    pub inodes: u32,
}

impl Superblock {
    /// Read a superblock from the start of a block.
    ///
    /// The magic number is not validated here; the mount path decides
    /// what to do with a mismatch and the debug report prints it either
    /// way.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let magic_number = reader.read_u32::<LittleEndian>()?;
        let blocks = reader.read_u32::<LittleEndian>()?;
        let inode_blocks = reader.read_u32::<LittleEndian>()?;
        let inodes = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            magic_number,
            blocks,
            inode_blocks,
            inodes,
        })
    }

    /// Write the four superblock fields; the rest of the block stays as
    /// the caller provided it (format hands in a zeroed buffer).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.magic_number)?;
        writer.write_u32::<LittleEndian>(self.blocks)?;
        writer.write_u32::<LittleEndian>(self.inode_blocks)?;
        writer.write_u32::<LittleEndian>(self.inodes)?;
        Ok(())
    }
}

/// One file descriptor slot in the inode table (32 bytes packed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inode {
    /// 1 when the slot is in use, 0 when free
    pub valid: u32,
    /// File length in bytes
    pub size: u32,
    /// Direct data-block pointers (0 = unused)
    pub direct: [u32; POINTERS_PER_INODE],
    /// Block index of the indirect pointer block (0 = none)
    pub indirect: u32,
}

impl Inode {
    /// Whether this slot describes a live file
    pub fn is_valid(&self) -> bool {
        self.valid == 1
    }

    /// Read one packed inode
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let valid = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        let mut direct = [0u32; POINTERS_PER_INODE];
        for slot in direct.iter_mut() {
            *slot = reader.read_u32::<LittleEndian>()?;
        }
        let indirect = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            valid,
            size,
            direct,
            indirect,
        })
    }

    /// Write one packed inode (exactly [`INODE_SIZE`] bytes)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.valid)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        for &slot in &self.direct {
            writer.write_u32::<LittleEndian>(slot)?;
        }
        writer.write_u32::<LittleEndian>(self.indirect)?;
        Ok(())
    }

    /// Decode the inode at `slot` inside an inode-table block
    pub fn read_slot(block: &[u8], slot: usize) -> Result<Self, FormatError> {
        let start = slot * INODE_SIZE;
        let end = start + INODE_SIZE;
        if end > block.len() {
            return Err(FormatError::Truncated);
        }
        Self::read_from(&mut Cursor::new(&block[start..end]))
    }

    /// Encode the inode into `slot` of an inode-table block
    pub fn write_slot(&self, block: &mut [u8], slot: usize) -> Result<(), FormatError> {
        let start = slot * INODE_SIZE;
        let end = start + INODE_SIZE;
        if end > block.len() {
            return Err(FormatError::Truncated);
        }
        self.write_to(&mut Cursor::new(&mut block[start..end]))?;
        Ok(())
    }
}

/// Decode the 1024 data-block pointers of an indirect block
pub fn read_pointers(block: &[u8]) -> Result<Vec<u32>, FormatError> {
    if block.len() < BLOCK_SIZE {
        return Err(FormatError::Truncated);
    }
    let mut cursor = Cursor::new(block);
    let mut pointers = Vec::with_capacity(POINTERS_PER_BLOCK);
    for _ in 0..POINTERS_PER_BLOCK {
        pointers.push(cursor.read_u32::<LittleEndian>()?);
    }
    Ok(pointers)
}

/// Encode data-block pointers back into an indirect block buffer
pub fn write_pointers(pointers: &[u32], block: &mut [u8]) -> Result<(), FormatError> {
    if block.len() < BLOCK_SIZE || pointers.len() != POINTERS_PER_BLOCK {
        return Err(FormatError::Truncated);
    }
    let mut cursor = Cursor::new(block);
    for &pointer in pointers {
        cursor.write_u32::<LittleEndian>(pointer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let sb = Superblock {
            magic_number: MAGIC,
            blocks: 100,
            inode_blocks: 10,
            inodes: 1280,
        };

        let mut block = vec![0u8; BLOCK_SIZE];
        sb.write_to(&mut Cursor::new(&mut block[..])).unwrap();

        // Bytes past the four fields stay zero
        assert!(block[16..].iter().all(|&b| b == 0));

        let sb2 = Superblock::read_from(&mut Cursor::new(&block[..])).unwrap();
        assert_eq!(sb, sb2);
    }

    #[test]
    fn test_inode_packing() {
        let inode = Inode {
            valid: 1,
            size: 24576,
            direct: [11, 12, 13, 14, 15],
            indirect: 16,
        };

        let mut buf = Vec::new();
        inode.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), INODE_SIZE);

        let inode2 = Inode::read_from(&mut Cursor::new(&buf[..])).unwrap();
        assert_eq!(inode, inode2);
    }

    #[test]
    fn test_inode_slot_addressing() {
        let mut block = vec![0u8; BLOCK_SIZE];
        let inode = Inode {
            valid: 1,
            size: 42,
            direct: [7, 0, 0, 0, 0],
            indirect: 0,
        };

        inode.write_slot(&mut block, 127).unwrap();

        // Slot 0 is untouched, slot 127 round-trips
        let empty = Inode::read_slot(&block, 0).unwrap();
        assert!(!empty.is_valid());
        let back = Inode::read_slot(&block, 127).unwrap();
        assert_eq!(back, inode);

        assert!(matches!(
            Inode::read_slot(&block, 128),
            Err(FormatError::Truncated)
        ));
    }

    #[test]
    fn test_pointer_block_roundtrip() {
        let mut pointers = vec![0u32; POINTERS_PER_BLOCK];
        pointers[0] = 17;
        pointers[5] = 99;
        pointers[1023] = 200;

        let mut block = vec![0u8; BLOCK_SIZE];
        write_pointers(&pointers, &mut block).unwrap();
        let back = read_pointers(&block).unwrap();
        assert_eq!(pointers, back);
    }
}
