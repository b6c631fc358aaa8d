//! Error types for vodvault-storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage operations.
///
/// Argument errors are raised synchronously at the edge of an operation;
/// OS errors surface from the backend after submission.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid argument; the operation was never submitted.
    #[error("Invalid argument: {0}")]
    ArgError(String),

    /// Data-shape failure such as a path or buffer overflow.
    #[error("Data error: {0}")]
    DataError(String),

    /// The backend reported an OS-level failure.
    #[error("OS error: {0}")]
    Os(#[from] io::Error),
}

impl StorageError {
    pub fn arg(msg: impl Into<String>) -> Self {
        Self::ArgError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::DataError(msg.into())
    }

    /// True when the underlying failure is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Os(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
