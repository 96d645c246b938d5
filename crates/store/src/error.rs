//! Error type shared by every backend.

use thiserror::Error;

/// Errors reported by an [`ObjectBackend`](crate::ObjectBackend).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist.
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// A create-mode put hit an existing object.
    #[error("Object already exists: {path}")]
    AlreadyExists { path: String },

    /// The backend cannot perform this operation.
    #[error("{store} does not support {operation}")]
    NotSupported {
        store: &'static str,
        operation: &'static str,
    },

    /// No backend is available for this protocol.
    #[error("No backend available for protocol: {0}")]
    UnknownProtocol(String),

    /// The key or URL could not be used by the backend.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure reported by the backend client.
    #[error("{store} error: {source}")]
    Generic {
        store: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StoreError {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        StoreError::NotFound { path: path.into() }
    }

    pub fn generic<E>(store: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Generic {
            store,
            source: Box::new(source),
        }
    }

    /// Map an IO error, turning `NotFound` into [`StoreError::NotFound`] for `path`.
    pub(crate) fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::not_found(path),
            std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists {
                path: path.to_string(),
            },
            _ => StoreError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
