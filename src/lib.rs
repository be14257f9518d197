//! flatfs: a single-volume flat file system on a file-backed virtual disk.
//!
//! Five layers, bottom to top:
//!   + Disk: block-granular I/O on a fixed-size image file.
//!   + FAT: allocator and chain algebra for data blocks.
//!   + Directory: one flat table binding names to chains.
//!   + Descriptors: open-file handles carrying byte offsets.
//!   + Volume: the mount session tying the layers together and mapping
//!     byte-level reads and writes onto whole-block transfers.
//!
//! A volume is formatted once with [`mkfs`] and then used through mount
//! sessions: [`Volume::mount`] loads the metadata into memory,
//! the `Volume` methods mutate it there (file data is written through),
//! and [`Volume::unmount`] flushes it back and closes the image. Nothing
//! else persists metadata, so a session that is dropped instead of
//! unmounted loses its metadata changes, exactly like a crash.

#![deny(keyword_idents)]
#![deny(non_ascii_idents)]

pub mod disk;
pub mod error;
pub mod param;

mod dir;
mod fat;
mod fd;
mod superblock;
mod volume;

pub use crate::error::FsError;
pub use crate::fd::Fd;
pub use crate::volume::{mkfs, Volume};
