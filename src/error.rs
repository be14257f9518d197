//! Error taxonomy of the file system.
//!
//! Every fallible operation returns [`FsError`]. Callers that want the
//! classic C surface can collapse any `Err` to `-1`; the variants exist so
//! that tests and embedding code can tell a full directory from a bad name
//! without string matching.

use std::io;

use thiserror::Error;

use crate::param::MAX_NAME;

#[derive(Debug, Error)]
pub enum FsError {
    /// Descriptor index out of range or not open.
    #[error("bad file descriptor")]
    BadDescriptor,

    /// File name is empty or contains a NUL byte.
    #[error("invalid file name")]
    BadName,

    /// File name exceeds [`MAX_NAME`] bytes.
    #[error("file name longer than {} bytes", MAX_NAME)]
    TooLong,

    /// Seek or truncate target outside the permitted range.
    #[error("offset out of range")]
    OffsetOutOfRange,

    /// The image is missing, the wrong size, or was never formatted.
    #[error("not a formatted volume")]
    NotFormatted,

    /// All [`crate::param::MAX_FILES`] directory slots are in use.
    #[error("directory is full")]
    DirectoryFull,

    /// All [`crate::param::MAX_FDS`] descriptor slots are in use.
    #[error("descriptor table is full")]
    FdTableFull,

    /// The FAT has no free data block left.
    #[error("no free data blocks")]
    DiskFull,

    /// The file is open; deletion requires every descriptor to be closed.
    #[error("file is currently open")]
    FileBusy,

    /// A file with this name already exists.
    #[error("file already exists")]
    AlreadyExists,

    /// No file with this name exists.
    #[error("no such file")]
    NotFound,

    /// On-disk metadata violates a structural invariant.
    #[error("corrupt volume metadata: {0}")]
    Corrupt(&'static str),

    /// Error from the underlying disk image.
    #[error("disk i/o failed: {0}")]
    Io(#[from] io::Error),
}
