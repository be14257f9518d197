//! File allocation table.
//!
//! The FAT is a flat array with one entry per disk block. An entry is
//! either `Free`, `End` (last block of a chain), or `Next(n)` (the chain
//! continues at block `n`). A file's data blocks form a chain from its
//! directory entry's head to the first `End`.
//!
//! Entries persist as little-endian signed 32-bit integers: `-1` for
//! `Free`, `-2` for `End`, a block number otherwise. Blocks below
//! `DATA_START` are metadata and never enter any chain, so a persisted
//! successor outside the data region is corruption, not a chain.

use std::convert::TryInto;

use static_assertions::const_assert;

use crate::disk::BlockData;
use crate::error::FsError;
use crate::param::{BLOCK_SIZE, DISK_BLOCKS};
use crate::superblock::{DATA_START, FAT_BLOCKS, FAT_ENTRY_SIZE};

const FREE_RAW: i32 = -1;
const END_RAW: i32 = -2;

/// FAT entries per FAT block.
pub(crate) const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / FAT_ENTRY_SIZE;

const_assert!(FAT_BLOCKS * ENTRIES_PER_BLOCK >= DISK_BLOCKS);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FatEntry {
    /// Block is unallocated.
    Free,

    /// Block is the last in its chain.
    End,

    /// Chain continues at this block.
    Next(u32),
}

impl FatEntry {
    fn from_raw(raw: i32) -> Result<Self, FsError> {
        match raw {
            FREE_RAW => Ok(FatEntry::Free),
            END_RAW => Ok(FatEntry::End),
            n if (DATA_START as i32..DISK_BLOCKS as i32).contains(&n) => {
                Ok(FatEntry::Next(n as u32))
            }
            _ => Err(FsError::Corrupt("fat entry outside data region")),
        }
    }

    fn to_raw(self) -> i32 {
        match self {
            FatEntry::Free => FREE_RAW,
            FatEntry::End => END_RAW,
            FatEntry::Next(n) => n as i32,
        }
    }
}

/// In-memory mirror of the FAT, authoritative while mounted.
#[derive(Debug)]
pub(crate) struct Fat {
    entries: Vec<FatEntry>,
}

impl Fat {
    /// FAT of a freshly formatted volume: every block free.
    pub(crate) fn new() -> Self {
        Self {
            entries: vec![FatEntry::Free; DISK_BLOCKS],
        }
    }

    pub(crate) fn entry(&self, block: u32) -> FatEntry {
        self.entries[block as usize]
    }

    fn set(&mut self, block: u32, entry: FatEntry) {
        self.entries[block as usize] = entry;
    }

    /// Allocate one block: the lowest-numbered free entry in the data
    /// region, marked `End`.
    pub(crate) fn alloc(&mut self) -> Result<u32, FsError> {
        for block in DATA_START..DISK_BLOCKS as u32 {
            if self.entry(block) == FatEntry::Free {
                self.set(block, FatEntry::End);
                return Ok(block);
            }
        }
        log::debug!("fat: no free data blocks");
        Err(FsError::DiskFull)
    }

    /// Grow the chain by one block past `last`, which must currently be the
    /// chain's end.
    pub(crate) fn extend(&mut self, last: u32) -> Result<u32, FsError> {
        debug_assert_eq!(self.entry(last), FatEntry::End);
        let new = self.alloc()?;
        self.set(last, FatEntry::Next(new));
        Ok(new)
    }

    /// Follow the chain `nblocks` links past `head`.
    ///
    /// The caller must know the chain is long enough; running off its end
    /// means the directory entry and the FAT disagree.
    pub(crate) fn walk(&self, head: u32, nblocks: usize) -> Result<u32, FsError> {
        let mut block = head;
        for _ in 0..nblocks {
            block = match self.entry(block) {
                FatEntry::Next(next) => next,
                _ => return Err(FsError::Corrupt("chain shorter than file size")),
            };
        }
        Ok(block)
    }

    /// Free every block of the chain starting at `head`, including `head`.
    pub(crate) fn free_chain(&mut self, head: u32) -> Result<(), FsError> {
        let mut block = head;
        for _ in 0..DISK_BLOCKS {
            let next = self.entry(block);
            self.set(block, FatEntry::Free);
            match next {
                FatEntry::End => return Ok(()),
                FatEntry::Next(n) => block = n,
                FatEntry::Free => return Err(FsError::Corrupt("free block inside chain")),
            }
        }
        Err(FsError::Corrupt("cycle in fat chain"))
    }

    /// Make `last` the final block of its chain, freeing the former tail.
    pub(crate) fn truncate_after(&mut self, last: u32) -> Result<(), FsError> {
        match self.entry(last) {
            FatEntry::End => Ok(()),
            FatEntry::Next(tail) => {
                self.set(last, FatEntry::End);
                self.free_chain(tail)
            }
            FatEntry::Free => Err(FsError::Corrupt("free block inside chain")),
        }
    }

    /// Number of blocks in the chain starting at `head`.
    pub(crate) fn chain_len(&self, head: u32) -> Result<usize, FsError> {
        let mut block = head;
        for len in 1..=DISK_BLOCKS {
            match self.entry(block) {
                FatEntry::End => return Ok(len),
                FatEntry::Next(n) => block = n,
                FatEntry::Free => return Err(FsError::Corrupt("free block inside chain")),
            }
        }
        Err(FsError::Corrupt("cycle in fat chain"))
    }

    /// Number of free blocks left in the data region.
    pub(crate) fn free_blocks(&self) -> usize {
        self.entries[DATA_START as usize..]
            .iter()
            .filter(|&&e| e == FatEntry::Free)
            .count()
    }

    /// Decode the `index`-th FAT block.
    pub(crate) fn load_block(&mut self, index: usize, block: &BlockData) -> Result<(), FsError> {
        debug_assert!(index < FAT_BLOCKS);
        for (slot, raw) in block.chunks_exact(FAT_ENTRY_SIZE).enumerate() {
            let entry_idx = index * ENTRIES_PER_BLOCK + slot;
            if entry_idx >= DISK_BLOCKS {
                break;
            }
            let raw = i32::from_le_bytes(raw.try_into().unwrap());
            self.entries[entry_idx] = FatEntry::from_raw(raw)?;
        }
        Ok(())
    }

    /// Encode the `index`-th FAT block.
    pub(crate) fn store_block(&self, index: usize, block: &mut BlockData) {
        debug_assert!(index < FAT_BLOCKS);
        block.fill(0);
        for (slot, raw) in block.chunks_exact_mut(FAT_ENTRY_SIZE).enumerate() {
            let entry_idx = index * ENTRIES_PER_BLOCK + slot;
            if entry_idx >= DISK_BLOCKS {
                break;
            }
            raw.copy_from_slice(&self.entries[entry_idx].to_raw().to_le_bytes());
        }
    }
}
