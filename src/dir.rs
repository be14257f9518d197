//! Flat directory table.
//!
//! The directory is a single block of `MAX_FILES` fixed-size entries. An
//! entry binds a file name to the head block of its FAT chain, its logical
//! size, and a reference count of open descriptors. The reference count is
//! persisted for layout stability but carries no meaning across mounts; it
//! is reset to zero when the directory is loaded.

use std::mem;
use std::str;

use array_macro::array;
use arrayvec::ArrayString;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use crate::disk::BlockData;
use crate::error::FsError;
use crate::param::{BLOCK_SIZE, DISK_BLOCKS, MAX_FILES, MAX_FILE_SIZE, MAX_NAME};
use crate::superblock::DATA_START;

/// A validated file name: 1..=`MAX_NAME` bytes, no NUL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileName(ArrayString<MAX_NAME>);

impl FileName {
    pub(crate) fn new(name: &str) -> Result<Self, FsError> {
        if name.is_empty() || name.bytes().any(|b| b == 0) {
            return Err(FsError::BadName);
        }
        ArrayString::from(name)
            .map(FileName)
            .map_err(|_| FsError::TooLong)
    }

    pub(crate) fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// dirent size
pub(crate) const DIRENT_SIZE: usize = mem::size_of::<DiskDirEnt>();

/// On-disk directory entry.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DiskDirEnt {
    /// 1 if this slot is in use, 0 otherwise.
    used: i32,

    /// NUL-terminated name; all-zero when unused.
    name: [u8; MAX_NAME + 1],

    /// File size in bytes.
    size: i32,

    /// First data block of the file's chain.
    head: i32,

    /// Open-descriptor count; meaningless across mounts.
    ref_cnt: i32,
}

const_assert!(DIRENT_SIZE == 32);
const_assert!(MAX_FILES * DIRENT_SIZE <= BLOCK_SIZE);
const_assert!(mem::align_of::<BlockData>() % mem::align_of::<DiskDirEnt>() == 0);

/// In-memory directory entry of a live file.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DirEnt {
    pub(crate) name: FileName,
    pub(crate) size: u32,
    pub(crate) head: u32,
    pub(crate) ref_cnt: u32,
}

/// In-memory mirror of the directory block, authoritative while mounted.
#[derive(Debug)]
pub(crate) struct Directory {
    slots: [Option<DirEnt>; MAX_FILES],
}

impl Directory {
    /// Directory of a freshly formatted volume: every slot free.
    pub(crate) fn new() -> Self {
        Self {
            slots: array![_ => None; MAX_FILES],
        }
    }

    /// Slot index of the first used entry named `name`.
    pub(crate) fn lookup(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(ent) if ent.name.as_str() == name))
    }

    /// First used entry named `name`, with its slot index.
    pub(crate) fn find(&self, name: &str) -> Option<(usize, &DirEnt)> {
        self.slots.iter().enumerate().find_map(|(slot, ent)| {
            ent.as_ref()
                .filter(|ent| ent.name.as_str() == name)
                .map(|ent| (slot, ent))
        })
    }

    /// Lowest-indexed free slot.
    pub(crate) fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&DirEnt> {
        self.slots.get(slot)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut DirEnt> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub(crate) fn insert(&mut self, slot: usize, ent: DirEnt) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(ent);
    }

    pub(crate) fn remove(&mut self, slot: usize) -> Option<DirEnt> {
        self.slots[slot].take()
    }

    pub(crate) fn used_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Names of all files in slot order.
    pub(crate) fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|ent| ent.name.as_str()))
    }

    /// Decode the directory block. Persisted fields are little-endian.
    /// Reference counts do not survive a mount and are reset to zero here.
    pub(crate) fn load(block: &BlockData) -> Result<Self, FsError> {
        let mut dir = Directory::new();
        for slot in 0..MAX_FILES {
            let bytes = &block[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE];
            let raw = LayoutVerified::<&[u8], DiskDirEnt>::new(bytes)
                .ok_or(FsError::Corrupt("directory entry layout"))?;
            match i32::from_le(raw.used) {
                0 => continue,
                1 => {}
                _ => return Err(FsError::Corrupt("directory used flag")),
            }

            let len = raw
                .name
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(raw.name.len());
            if len > MAX_NAME {
                return Err(FsError::Corrupt("unterminated directory name"));
            }
            let name = str::from_utf8(&raw.name[..len])
                .map_err(|_| FsError::Corrupt("directory name encoding"))?;
            let name = FileName::new(name).map_err(|_| FsError::Corrupt("directory name"))?;
            if dir.lookup(name.as_str()).is_some() {
                return Err(FsError::Corrupt("duplicate directory name"));
            }

            let head = i32::from_le(raw.head);
            if !(DATA_START as i32..DISK_BLOCKS as i32).contains(&head) {
                return Err(FsError::Corrupt("directory head outside data region"));
            }
            let size = i32::from_le(raw.size);
            if size < 0 || size as u32 > MAX_FILE_SIZE {
                return Err(FsError::Corrupt("directory size out of range"));
            }

            dir.insert(
                slot,
                DirEnt {
                    name,
                    size: size as u32,
                    head: head as u32,
                    ref_cnt: 0,
                },
            );
        }
        Ok(dir)
    }

    /// Encode the directory into a block buffer, little-endian.
    pub(crate) fn store(&self, block: &mut BlockData) {
        block.fill(0);
        for (slot, ent) in self.slots.iter().enumerate() {
            let ent = match ent {
                Some(ent) => ent,
                None => continue,
            };
            let mut raw = DiskDirEnt {
                used: 1i32.to_le(),
                name: [0; MAX_NAME + 1],
                size: (ent.size as i32).to_le(),
                head: (ent.head as i32).to_le(),
                ref_cnt: (ent.ref_cnt as i32).to_le(),
            };
            let name = ent.name.as_str().as_bytes();
            raw.name[..name.len()].copy_from_slice(name);
            block[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE].copy_from_slice(raw.as_bytes());
        }
    }
}
