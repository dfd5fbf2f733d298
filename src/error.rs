use std::ffi::OsString;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridFuseError>;

#[derive(Error, Debug)]
pub enum GridFuseError {
    /// Unknown filename, inode, or object id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation outside the supported set. The namespace is flat and
    /// objects are immutable-versioned blobs, so most of POSIX is out.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// A handle was referenced but no session is bound to it. This is a
    /// caller protocol violation: open/create must precede read/write/flush.
    #[error("No active session for handle {0}")]
    StaleHandle(u64),

    /// Backing-store failure. Not classified or retried here.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filenames are stored as UTF-8 strings; non-UTF-8 names are rejected.
    #[error("Invalid filename: {0:?}")]
    InvalidName(OsString),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GridFuseError {
    /// Project this error onto the single error-code contract the kernel
    /// expects from a FUSE reply.
    pub fn errno(&self) -> libc::c_int {
        match self {
            GridFuseError::NotFound(_) => libc::ENOENT,
            GridFuseError::NotSupported(_) => libc::ENOSYS,
            GridFuseError::StaleHandle(_) => libc::EBADF,
            GridFuseError::Storage(_) => libc::EIO,
            GridFuseError::InvalidName(_) => libc::EINVAL,
            GridFuseError::Config(_) => libc::EINVAL,
            GridFuseError::Mount(_) => libc::EIO,
            GridFuseError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<serde_json::Error> for GridFuseError {
    fn from(err: serde_json::Error) -> Self {
        GridFuseError::Storage(err.to_string())
    }
}
