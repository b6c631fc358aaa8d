//! Database query operations.

pub mod acl;
pub mod auth_tokens;
pub mod filechunks;
pub mod resources;
pub mod upload_requests;
