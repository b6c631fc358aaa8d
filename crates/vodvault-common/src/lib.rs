//! Vodvault-Common: shared types used throughout vodvault.
//!
//! This crate provides the unified error type, typed identifiers for users,
//! upload requests, resources and encoded versions, the per-request error
//! report accumulated by the media pipeline, and the on-disk resource layout
//! helpers shared by the upload, transcode and streaming paths.

pub mod error;
pub mod ids;
pub mod layout;
pub mod report;

pub use error::{Error, Result};
pub use ids::{ReqSeq, ResourceId, UserId, VersionId};
pub use report::ErrorReport;
