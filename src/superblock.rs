//! On-disk superblock and volume layout.
//!
//! Disk layout:
//! [ superblock | FAT blocks | directory block | data blocks ]
//!
//! `mkfs` computes the superblock once from the constants below; a mount
//! re-reads it and refuses anything that does not describe this exact
//! geometry. `dir_len` is the only field that changes over the life of a
//! volume: it tracks the number of in-use directory entries.

use std::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use crate::disk::BlockData;
use crate::error::FsError;
use crate::param::{BLOCK_SIZE, DISK_BLOCKS, MAX_FILES};

/// Size of one persisted FAT entry (signed 32-bit).
pub(crate) const FAT_ENTRY_SIZE: usize = mem::size_of::<i32>();

/// Block number of the superblock.
pub(crate) const SUPERBLOCK_START: u32 = 0;

/// First block of the FAT.
pub(crate) const FAT_START: u32 = 1;

/// Number of blocks the FAT occupies; covers one entry per disk block.
pub(crate) const FAT_BLOCKS: usize =
    (DISK_BLOCKS * FAT_ENTRY_SIZE + BLOCK_SIZE - 1) / BLOCK_SIZE;

/// Block number of the directory.
pub(crate) const DIR_START: u32 = FAT_START + FAT_BLOCKS as u32;

/// First data block. Blocks below this are never handed out by allocation.
pub(crate) const DATA_START: u32 = DIR_START + 1;

// The whole FAT byte array must round-trip through its block window.
const_assert!(FAT_BLOCKS * BLOCK_SIZE >= DISK_BLOCKS * FAT_ENTRY_SIZE);
// Metadata must leave a non-empty data region.
const_assert!((DATA_START as usize) < DISK_BLOCKS);

#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes)]
pub(crate) struct Superblock {
    /// First block of the FAT.
    fat_idx: i32,

    /// Length of the FAT in blocks.
    fat_len: i32,

    /// Block number of the directory.
    dir_idx: i32,

    /// Number of in-use directory entries.
    dir_len: i32,

    /// First block of file data.
    data_idx: i32,
}

const_assert!(mem::size_of::<Superblock>() <= BLOCK_SIZE);
const_assert!(mem::align_of::<BlockData>() % mem::align_of::<Superblock>() == 0);

impl Superblock {
    /// Superblock of a freshly formatted, empty volume.
    pub(crate) fn new() -> Self {
        Self {
            fat_idx: FAT_START as i32,
            fat_len: FAT_BLOCKS as i32,
            dir_idx: DIR_START as i32,
            dir_len: 0,
            data_idx: DATA_START as i32,
        }
    }

    /// Decode the superblock from block 0 and check it describes this
    /// volume geometry. Persisted fields are little-endian.
    pub(crate) fn load(block: &BlockData) -> Result<Self, FsError> {
        let record = LayoutVerified::<&[u8], Superblock>::new(
            &block[..mem::size_of::<Superblock>()],
        )
        .ok_or(FsError::NotFormatted)?;
        let sb = Superblock {
            fat_idx: i32::from_le(record.fat_idx),
            fat_len: i32::from_le(record.fat_len),
            dir_idx: i32::from_le(record.dir_idx),
            dir_len: i32::from_le(record.dir_len),
            data_idx: i32::from_le(record.data_idx),
        };
        sb.validate()?;
        Ok(sb)
    }

    /// Encode the superblock into a block buffer, little-endian.
    pub(crate) fn store(&self, block: &mut BlockData) {
        let le = Superblock {
            fat_idx: self.fat_idx.to_le(),
            fat_len: self.fat_len.to_le(),
            dir_idx: self.dir_idx.to_le(),
            dir_len: self.dir_len.to_le(),
            data_idx: self.data_idx.to_le(),
        };
        block.fill(0);
        block[..mem::size_of::<Superblock>()].copy_from_slice(le.as_bytes());
    }

    fn validate(&self) -> Result<(), FsError> {
        if self.fat_idx != FAT_START as i32
            || self.fat_len != FAT_BLOCKS as i32
            || self.dir_idx != DIR_START as i32
            || self.data_idx != DATA_START as i32
            || self.dir_len < 0
            || self.dir_len > MAX_FILES as i32
        {
            return Err(FsError::NotFormatted);
        }
        Ok(())
    }

    pub(crate) fn dir_len(&self) -> usize {
        self.dir_len as usize
    }

    pub(crate) fn inc_dir_len(&mut self) {
        debug_assert!(self.dir_len < MAX_FILES as i32);
        self.dir_len += 1;
    }

    pub(crate) fn dec_dir_len(&mut self) {
        debug_assert!(self.dir_len > 0);
        self.dir_len -= 1;
    }
}
