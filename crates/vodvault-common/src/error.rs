//! Cross-cutting error type for the vodvault crates.
//!
//! The leaf crates with a narrow failure surface carry their own enums
//! (`vodvault-storage` distinguishes argument/data/OS failures,
//! `vodvault-media` playlist/key/cipher failures). This type covers what
//! the database layer, the identifier validation and the pipeline report
//! upward to the API edge, where it is translated to an HTTP status.

/// What went wrong, from the perspective of the API edge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A row or stored object the request referred to does not exist.
    #[error("no such record: {0}")]
    NotFound(String),

    /// A database statement failed; details stay in the log, the caller
    /// sees 503.
    #[error("database failure: {0}")]
    Database(String),

    /// Every pooled connection is in use; retried on the client side,
    /// surfaced as 503.
    #[error("all database connections busy")]
    PoolBusy,

    /// An identifier or request field failed validation; surfaced as 400
    /// with a field-tagged reason.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O failure outside the storage abstraction.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A pipeline or serialization invariant broke.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn database(cause: impl Into<String>) -> Self {
        Error::Database(cause.into())
    }

    pub fn invalid_input(cause: impl Into<String>) -> Self {
        Error::InvalidInput(cause.into())
    }

    pub fn internal(cause: impl Into<String>) -> Self {
        Error::Internal(cause.into())
    }

    /// True when the failure is transient on the database side and maps
    /// to 503 at the API edge.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::PoolBusy)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
