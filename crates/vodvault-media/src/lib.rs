//! Vodvault-Media: HLS playlist engines, crypto-key store, and segment
//! encryption.
//!
//! Everything here is sans-I/O: the engines operate on byte buffers and
//! resumable state, and the drivers in the server crate feed them from
//! storage. This keeps the rewrite/crypto semantics unit-testable without
//! a filesystem.
//!
//! # Modules
//!
//! - `keystore` - the `crypto_key.json` model and per-variant metadata
//! - `hls` - master-playlist merging, media-playlist rewriting, and the
//!   AES-CBC segment encryptor

pub mod error;
pub mod hls;
pub mod keystore;

pub use error::{Error, Result};
pub use hls::{MasterPlaylistMerger, MediaPlaylistRewriter, SegmentEncryptor, StreamUrl};
pub use keystore::{KeyEntry, KeyMaterial, KeyStore, VersionMetadata};
