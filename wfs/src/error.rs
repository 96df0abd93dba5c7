//! Error taxonomy (spec §7). Recoverable variants are returned from
//! operation callbacks and convert to negative `errno` values at the FUSE
//! boundary; `Fatal` is reserved for conditions the spec says should abort
//! the process (out-of-range logical block, superblock mismatch, failed
//! disk open/map at startup).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WfsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("file already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("no space left on device")]
    NoSpace,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl WfsError {
    /// Maps a recoverable error to the negative `errno` a FUSE-style
    /// callback returns. Panics on `Fatal`, which callers must have already
    /// handled by exiting the process before reaching the FUSE boundary.
    pub fn to_errno(&self) -> i32 {
        match self {
            WfsError::NotFound => -libc::ENOENT,
            WfsError::NotADirectory => -libc::ENOTDIR,
            WfsError::IsADirectory => -libc::EISDIR,
            WfsError::AlreadyExists => -libc::EEXIST,
            WfsError::NotEmpty => -libc::ENOTEMPTY,
            WfsError::NoSpace => -libc::ENOSPC,
            WfsError::Io(_) => -libc::EIO,
            WfsError::InvalidArgument(_) => -libc::EINVAL,
            WfsError::Fatal(msg) => panic!("fatal filesystem error reached operation boundary: {msg}"),
        }
    }
}
