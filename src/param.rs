//! Fixed parameters of the volume format.
//!
//! Everything here is a compile-time constant; the on-disk superblock
//! repeats the layout-relevant values so that a mount can check it is
//! looking at a volume built with the same geometry.

/// Block size in bytes, the unit of all disk I/O.
pub const BLOCK_SIZE: usize = 4096;

/// Total number of blocks on the virtual disk (32 MiB raw).
pub const DISK_BLOCKS: usize = 8192;

/// Maximum number of files that may exist at any time.
pub const MAX_FILES: usize = 64;

/// Maximum file name length in bytes, exclusive of any terminator.
pub const MAX_NAME: usize = 15;

/// Maximum number of simultaneously open file descriptors.
pub const MAX_FDS: usize = 32;

/// Maximum number of data blocks a single file may span.
pub const MAX_FILE_BLOCKS: usize = 4096;

/// Logical cap on file size in bytes (16 MiB).
pub const MAX_FILE_SIZE: u32 = (MAX_FILE_BLOCKS * BLOCK_SIZE) as u32;
