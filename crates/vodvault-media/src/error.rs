//! Error types for vodvault-media.

use thiserror::Error;

/// Result type for vodvault-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vodvault-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A playlist failed structural validation.
    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// A required playlist tag is missing.
    #[error("Missing required playlist tag: {0}")]
    MissingTag(&'static str),

    /// The referenced key id is not present in the key store.
    #[error("Crypto key not found: {0}")]
    KeyNotFound(String),

    /// Key or IV material does not decode to the declared length.
    #[error("Key material length mismatch: declared {declared} bytes, decoded {decoded}")]
    MaterialLength { declared: usize, decoded: usize },

    /// Cipher setup or use failed.
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_playlist(msg: impl Into<String>) -> Self {
        Self::InvalidPlaylist(msg.into())
    }
}
