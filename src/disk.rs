//! File-backed virtual disk.
//!
//! The disk is a regular file of exactly `DISK_BLOCKS * BLOCK_SIZE` bytes,
//! read and written one whole block at a time. This is the only module that
//! touches the image file; everything above it deals in block numbers.
//!
//! Interface:
//! * `Disk::create` makes a zero-filled image.
//! * `Disk::open` attaches to an existing image.
//! * `read_block` / `write_block` transfer exactly one block.
//! * `close` flushes the image to stable storage.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::param::{BLOCK_SIZE, DISK_BLOCKS};

/// One block worth of bytes.
///
/// On-disk records are decoded in place from these buffers; the align(8)
/// modifier keeps every 4-byte-aligned record cast valid.
#[repr(align(8))]
pub struct BlockData {
    inner: [u8; BLOCK_SIZE],
}

impl BlockData {
    pub fn zeroed() -> Self {
        Self {
            inner: [0; BLOCK_SIZE],
        }
    }
}

impl Deref for BlockData {
    type Target = [u8; BLOCK_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BlockData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Handle on an open disk image.
#[derive(Debug)]
pub struct Disk {
    image: File,
}

impl Disk {
    /// Create a zero-filled image of `DISK_BLOCKS * BLOCK_SIZE` bytes,
    /// truncating any previous file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<()> {
        let image = File::create(path)?;
        image.set_len((DISK_BLOCKS * BLOCK_SIZE) as u64)?;
        image.sync_all()
    }

    /// Open an existing image for block I/O.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Disk> {
        let image = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Disk { image })
    }

    /// Size of the image in bytes.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.image.metadata()?.len())
    }

    /// Read block `blockno` into `data`.
    pub fn read_block(&mut self, blockno: u32, data: &mut BlockData) -> io::Result<()> {
        debug_assert!((blockno as usize) < DISK_BLOCKS);
        self.image
            .seek(SeekFrom::Start(blockno as u64 * BLOCK_SIZE as u64))?;
        self.image.read_exact(&mut data.inner)
    }

    /// Write `data` to block `blockno`.
    pub fn write_block(&mut self, blockno: u32, data: &BlockData) -> io::Result<()> {
        debug_assert!((blockno as usize) < DISK_BLOCKS);
        self.image
            .seek(SeekFrom::Start(blockno as u64 * BLOCK_SIZE as u64))?;
        self.image.write_all(&data.inner)
    }

    /// Flush the image to stable storage and detach.
    pub fn close(self) -> io::Result<()> {
        self.image.sync_all()
    }
}
