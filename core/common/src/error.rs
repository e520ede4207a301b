//! Common error types for uniblob.

use thiserror::Error;

/// Top-level error type for uniblob operations.
#[derive(Debug, Error)]
pub enum Error {
    /// URI could not be split into adapter, bucket and key.
    #[error("Key parse error: {0}")]
    KeyParse(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A disk key resolved to a path outside the configured base directory.
    #[error("Path escapes base directory: {0}")]
    OutsideBaseDirectory(String),

    /// Adapter name is not registered.
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not offered by this adapter.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote store rejected the credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Remote store denied access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend is in an unusable state.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this error means the addressed object is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error is caused by the caller's arguments rather than the backend.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::KeyParse(_) | Error::InvalidInput(_) | Error::OutsideBaseDirectory(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
