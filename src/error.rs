//! Error types for filesystem operations.

use objfs_store::StoreError;
use thiserror::Error;

/// Every public filesystem operation fails with one of these.
#[derive(Error, Debug)]
pub enum FsError {
    /// Object or prefix absent (after any listing fallback).
    #[error("No such file or directory: {0}")]
    NotFound(String),

    /// Malformed arguments, rejected before any backend call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Source and destination resolve to different buckets.
    #[error("Cannot copy across buckets: '{src}' is in '{src_bucket}', '{dst}' is in '{dst_bucket}'")]
    BucketMismatch {
        src: String,
        src_bucket: String,
        dst: String,
        dst_bucket: String,
    },

    /// Read, write or flush on a closed file.
    #[error("I/O operation on closed file: {0}")]
    UseAfterClose(String),

    /// A URL-form path names a different protocol than the filesystem.
    #[error("Expected protocol '{expected}', got '{found}' in path: {path}")]
    ProtocolMismatch {
        expected: String,
        found: String,
        path: String,
    },

    /// Create-mode put collided with an existing object.
    #[error("File exists: {0}")]
    AlreadyExists(String),

    /// `open` was called with a mode other than `rb` or `wb`.
    #[error("Only 'rb' and 'wb' modes are supported, got: '{0}'")]
    UnsupportedMode(String),

    /// A streaming write failed part way; its upload was discarded.
    #[error("Write to '{0}' failed and its upload was aborted")]
    WriteAborted(String),

    /// Backend failure outside the conditions above.
    #[error(transparent)]
    Store(StoreError),

    /// Local file IO during `put_file` / `get_file`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { path } => FsError::NotFound(path),
            StoreError::AlreadyExists { path } => FsError::AlreadyExists(path),
            other => FsError::Store(other),
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        use std::io::ErrorKind;
        match err {
            FsError::Io(e) => e,
            FsError::NotFound(_) => std::io::Error::new(ErrorKind::NotFound, err),
            FsError::AlreadyExists(_) => std::io::Error::new(ErrorKind::AlreadyExists, err),
            FsError::InvalidArgument(_)
            | FsError::UnsupportedMode(_)
            | FsError::UseAfterClose(_)
            | FsError::ProtocolMismatch { .. }
            | FsError::BucketMismatch { .. } => std::io::Error::new(ErrorKind::InvalidInput, err),
            FsError::WriteAborted(_) | FsError::Store(_) => std::io::Error::other(err),
        }
    }
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}


pub type Result<T> = std::result::Result<T, FsError>;
