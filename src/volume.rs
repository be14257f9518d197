//! Mount session and byte-level file I/O.
//!
//! A `Volume` owns the open disk image plus in-memory mirrors of the
//! superblock, the FAT, and the directory. Between mount and unmount the
//! mirrors are authoritative and the on-disk metadata may be stale; file
//! data blocks are written through as writes happen. Unmount flushes the
//! mirrors back to their fixed blocks and consumes the session, so every
//! descriptor handle dies with it.
//!
//! Reads and writes map a byte range onto whole-block transfers: a partial
//! first block, whole blocks, and a partial last block. Writes read the
//! target block before overwriting it so the bytes around an unaligned
//! range survive.

use std::cmp;
use std::io;
use std::path::Path;

use scopeguard::ScopeGuard;

use crate::dir::{DirEnt, Directory, FileName};
use crate::disk::{BlockData, Disk};
use crate::error::FsError;
use crate::fat::{Fat, FatEntry};
use crate::fd::{Fd, FdTable};
use crate::param::{BLOCK_SIZE, DISK_BLOCKS, MAX_FILES, MAX_FILE_SIZE};
use crate::superblock::{
    Superblock, DATA_START, DIR_START, FAT_BLOCKS, FAT_START, SUPERBLOCK_START,
};

/// Format a fresh, empty volume at `path`, truncating any previous image.
///
/// The image is created at its full size, every data block is marked free,
/// and the metadata blocks are written out. The image is closed afterwards;
/// mount it to use it.
pub fn mkfs<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let path = path.as_ref();
    Disk::create(path)?;
    let disk = Disk::open(path)?;
    let mut disk = scopeguard::guard(disk, |disk| {
        let _ = disk.close();
    });

    let mut block = BlockData::zeroed();
    Superblock::new().store(&mut block);
    disk.write_block(SUPERBLOCK_START, &block)?;

    let fat = Fat::new();
    for i in 0..FAT_BLOCKS {
        fat.store_block(i, &mut block);
        disk.write_block(FAT_START + i as u32, &block)?;
    }

    Directory::new().store(&mut block);
    disk.write_block(DIR_START, &block)?;

    ScopeGuard::into_inner(disk).close()?;
    log::debug!("mkfs: formatted {}", path.display());
    Ok(())
}

/// A mounted volume.
///
/// All file operations live here. The value is the mount session: there is
/// no unmounted-but-alive state, and [`Volume::unmount`] consumes the
/// session together with every open descriptor.
#[derive(Debug)]
pub struct Volume {
    disk: Disk,
    superblock: Superblock,
    fat: Fat,
    dir: Directory,
    fds: FdTable,
}

impl Volume {
    /// Mount the volume at `path`: load the superblock, FAT, and directory
    /// into memory and start a fresh descriptor table.
    ///
    /// Fails with [`FsError::NotFormatted`] when the image is missing, has
    /// the wrong size, or does not carry this volume geometry.
    pub fn mount<P: AsRef<Path>>(path: P) -> Result<Volume, FsError> {
        let path = path.as_ref();
        let disk = match Disk::open(path) {
            Ok(disk) => disk,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsError::NotFormatted)
            }
            Err(err) => return Err(err.into()),
        };
        let mut disk = scopeguard::guard(disk, |disk| {
            let _ = disk.close();
        });
        if disk.size()? != (DISK_BLOCKS * BLOCK_SIZE) as u64 {
            return Err(FsError::NotFormatted);
        }

        let mut block = BlockData::zeroed();
        disk.read_block(SUPERBLOCK_START, &mut block)?;
        let superblock = Superblock::load(&block)?;

        let mut fat = Fat::new();
        for i in 0..FAT_BLOCKS {
            disk.read_block(FAT_START + i as u32, &mut block)?;
            fat.load_block(i, &block)?;
        }

        disk.read_block(DIR_START, &mut block)?;
        let dir = Directory::load(&block)?;
        if dir.used_count() != superblock.dir_len() {
            return Err(FsError::Corrupt("dir_len does not match directory"));
        }

        log::debug!(
            "mount: {} with {} file(s)",
            path.display(),
            dir.used_count()
        );
        Ok(Volume {
            disk: ScopeGuard::into_inner(disk),
            superblock,
            fat,
            dir,
            fds: FdTable::new(),
        })
    }

    /// Flush the in-memory superblock, FAT, and directory back to disk and
    /// close the image. Every descriptor handle is dead afterwards.
    pub fn unmount(mut self) -> Result<(), FsError> {
        let mut block = BlockData::zeroed();
        self.superblock.store(&mut block);
        self.disk.write_block(SUPERBLOCK_START, &block)?;

        for i in 0..FAT_BLOCKS {
            self.fat.store_block(i, &mut block);
            self.disk.write_block(FAT_START + i as u32, &block)?;
        }

        self.dir.store(&mut block);
        self.disk.write_block(DIR_START, &block)?;

        self.disk.close()?;
        log::debug!("unmount: metadata flushed");
        Ok(())
    }

    /// Create an empty file. A new file owns one data block from the start;
    /// size zero means the block holds no valid bytes yet.
    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        let name = FileName::new(name)?;
        if self.dir.lookup(name.as_str()).is_some() {
            return Err(FsError::AlreadyExists);
        }
        if self.dir.used_count() >= MAX_FILES {
            return Err(FsError::DirectoryFull);
        }
        let slot = self.dir.first_free().ok_or(FsError::DirectoryFull)?;
        let head = self.fat.alloc()?;
        self.dir.insert(
            slot,
            DirEnt {
                name,
                size: 0,
                head,
                ref_cnt: 0,
            },
        );
        self.superblock.inc_dir_len();
        Ok(())
    }

    /// Delete a file and free its whole chain, head included. Refused while
    /// any descriptor still refers to the file.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let name = FileName::new(name)?;
        let (slot, ent) = self.dir.find(name.as_str()).ok_or(FsError::NotFound)?;
        if ent.ref_cnt > 0 {
            return Err(FsError::FileBusy);
        }
        let head = ent.head;
        self.fat.free_chain(head)?;
        self.dir.remove(slot);
        self.superblock.dec_dir_len();
        Ok(())
    }

    /// Open a file, claiming the lowest-indexed free descriptor with the
    /// offset at zero. A file may be open any number of times at once.
    pub fn open(&mut self, name: &str) -> Result<Fd, FsError> {
        let name = FileName::new(name)?;
        let (slot, _) = self.dir.find(name.as_str()).ok_or(FsError::NotFound)?;
        let fd = self.fds.alloc(slot)?;
        let ent = self
            .dir
            .get_mut(slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;
        ent.ref_cnt += 1;
        Ok(fd)
    }

    /// Close a descriptor. Other descriptors on the same file are not
    /// disturbed; closing twice fails the second time.
    pub fn close(&mut self, fd: Fd) -> Result<(), FsError> {
        let desc = self.fds.release(fd)?;
        let ent = self
            .dir
            .get_mut(desc.slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;
        debug_assert!(ent.ref_cnt > 0);
        ent.ref_cnt -= 1;
        Ok(())
    }

    /// Current size in bytes of the file `fd` refers to.
    pub fn file_size(&self, fd: Fd) -> Result<u32, FsError> {
        Ok(self.file_ent(fd)?.1.size)
    }

    /// Number of data blocks allocated to the file `fd` refers to.
    pub fn allocated_blocks(&self, fd: Fd) -> Result<usize, FsError> {
        let (_, ent) = self.file_ent(fd)?;
        self.fat.chain_len(ent.head)
    }

    /// Number of free data blocks left on the volume.
    pub fn free_blocks(&self) -> usize {
        self.fat.free_blocks()
    }

    /// Set the descriptor's offset. The target must lie inside the file;
    /// growing a file takes a write, not a seek.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<(), FsError> {
        let (_, ent) = self.file_ent(fd)?;
        if offset > ent.size {
            return Err(FsError::OffsetOutOfRange);
        }
        self.fds.get_mut(fd)?.offset = offset;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the descriptor's offset, advancing
    /// it by the bytes returned. Short counts happen only at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, FsError> {
        let desc = *self.fds.get(fd)?;
        let ent = *self
            .dir
            .get(desc.slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;

        // A stale offset past end of file (possible after someone else's
        // truncate) reads zero bytes.
        let n = cmp::min(
            buf.len() as u64,
            u64::from(ent.size.saturating_sub(desc.offset)),
        ) as usize;
        if n == 0 {
            return Ok(0);
        }

        let mut block = self.fat.walk(ent.head, desc.offset as usize / BLOCK_SIZE)?;
        let mut off = desc.offset as usize % BLOCK_SIZE;
        let mut data = BlockData::zeroed();
        let mut tot = 0;
        while tot < n {
            self.disk.read_block(block, &mut data)?;
            let m = cmp::min(n - tot, BLOCK_SIZE - off);
            buf[tot..tot + m].copy_from_slice(&data[off..off + m]);
            tot += m;
            off = 0;
            if tot < n {
                block = match self.fat.entry(block) {
                    FatEntry::Next(next) => next,
                    _ => return Err(FsError::Corrupt("chain shorter than file size")),
                };
            }
        }

        self.fds.get_mut(fd)?.offset = desc.offset + tot as u32;
        Ok(tot)
    }

    /// Write `buf` at the descriptor's offset, extending the chain on
    /// demand and growing the file size when the write ends past it.
    ///
    /// The request is clamped to the file size cap; when the disk runs out
    /// of blocks mid-write, the bytes that fit are written and their count
    /// returned. Only a write that cannot store a single byte reports
    /// [`FsError::DiskFull`].
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, FsError> {
        let desc = *self.fds.get(fd)?;
        let ent = *self
            .dir
            .get(desc.slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;

        let n = cmp::min(buf.len() as u64, u64::from(MAX_FILE_SIZE - desc.offset)) as usize;
        if n == 0 {
            return Ok(0);
        }

        // Walk to the block containing the offset. The offset may sit just
        // past the chain's end (exactly block-aligned end of file, or a
        // stale offset after a truncate); the chain is extended on the way.
        let mut block = ent.head;
        for _ in 0..desc.offset as usize / BLOCK_SIZE {
            block = match self.fat.entry(block) {
                FatEntry::Next(next) => next,
                FatEntry::End => self.fat.extend(block)?,
                FatEntry::Free => return Err(FsError::Corrupt("free block inside chain")),
            };
        }

        let mut off = desc.offset as usize % BLOCK_SIZE;
        let mut data = BlockData::zeroed();
        let mut tot = 0;
        while tot < n {
            let m = cmp::min(n - tot, BLOCK_SIZE - off);
            // Read-modify-write keeps the bytes before and after the
            // written range intact in partial blocks.
            self.disk.read_block(block, &mut data)?;
            data[off..off + m].copy_from_slice(&buf[tot..tot + m]);
            self.disk.write_block(block, &data)?;
            tot += m;
            off = 0;
            if tot < n {
                block = match self.fat.entry(block) {
                    FatEntry::Next(next) => next,
                    FatEntry::End => match self.fat.extend(block) {
                        Ok(next) => next,
                        Err(FsError::DiskFull) => break,
                        Err(err) => return Err(err),
                    },
                    FatEntry::Free => {
                        return Err(FsError::Corrupt("free block inside chain"))
                    }
                };
            }
        }

        let new_offset = desc.offset + tot as u32;
        self.fds.get_mut(fd)?.offset = new_offset;
        if new_offset > ent.size {
            if let Some(ent) = self.dir.get_mut(desc.slot) {
                ent.size = new_offset;
            }
        }
        Ok(tot)
    }

    /// Shrink the file to `length` bytes, freeing every chain block past
    /// the new last block. Growing is not supported.
    ///
    /// Only the truncating descriptor has its offset clamped; other
    /// descriptors on the same file keep theirs, and a stale offset simply
    /// reads zero bytes until it is moved.
    pub fn truncate(&mut self, fd: Fd, length: u32) -> Result<(), FsError> {
        let desc = *self.fds.get(fd)?;
        let ent = *self
            .dir
            .get(desc.slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;

        if length > ent.size {
            return Err(FsError::OffsetOutOfRange);
        }
        if length == ent.size {
            return Ok(());
        }

        if desc.offset > length {
            self.fds.get_mut(fd)?.offset = length;
        }

        let last_index = if length == 0 {
            0
        } else {
            (length as usize - 1) / BLOCK_SIZE
        };
        let last = self.fat.walk(ent.head, last_index)?;
        self.fat.truncate_after(last)?;
        if let Some(ent) = self.dir.get_mut(desc.slot) {
            ent.size = length;
        }
        Ok(())
    }

    /// Names of all files in directory slot order. The borrowed names stay
    /// valid until the next mutating call.
    pub fn list_files(&self) -> Vec<&str> {
        self.dir.names().collect()
    }

    /// Verify the structural invariants of the mounted volume: every file's
    /// chain is finite, disjoint from all others, made of data blocks, and
    /// ends with an end marker; sizes fit their chains; reference counts
    /// match the descriptor table; names are unique.
    pub fn check(&self) -> Result<(), FsError> {
        let mut owned = vec![false; DISK_BLOCKS];
        for slot in 0..MAX_FILES {
            let ent = match self.dir.get(slot) {
                Some(ent) => ent,
                None => continue,
            };

            let mut block = ent.head;
            let mut chain_blocks = 0usize;
            loop {
                if !(DATA_START..DISK_BLOCKS as u32).contains(&block) {
                    return Err(FsError::Corrupt("chain block outside data region"));
                }
                if owned[block as usize] {
                    return Err(FsError::Corrupt("block owned by two chains"));
                }
                owned[block as usize] = true;
                chain_blocks += 1;
                match self.fat.entry(block) {
                    FatEntry::End => break,
                    FatEntry::Next(next) => block = next,
                    FatEntry::Free => return Err(FsError::Corrupt("free block inside chain")),
                }
            }

            if ent.size as usize > chain_blocks * BLOCK_SIZE {
                return Err(FsError::Corrupt("size exceeds chain capacity"));
            }

            let open = self.fds.iter().filter(|desc| desc.slot == slot).count();
            if ent.ref_cnt as usize != open {
                return Err(FsError::Corrupt("stale reference count"));
            }
        }

        for desc in self.fds.iter() {
            if self.dir.get(desc.slot).is_none() {
                return Err(FsError::Corrupt("descriptor on a free slot"));
            }
        }

        let names: Vec<&str> = self.dir.names().collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(FsError::Corrupt("duplicate directory name"));
            }
        }

        if self.superblock.dir_len() != self.dir.used_count() {
            return Err(FsError::Corrupt("dir_len does not match directory"));
        }
        Ok(())
    }

    fn file_ent(&self, fd: Fd) -> Result<(usize, &DirEnt), FsError> {
        let desc = self.fds.get(fd)?;
        let ent = self
            .dir
            .get(desc.slot)
            .ok_or(FsError::Corrupt("descriptor slot"))?;
        Ok((desc.slot, ent))
    }
}
