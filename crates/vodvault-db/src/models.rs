//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vodvault_common::{ReqSeq, UserId};

/// One upload workspace row.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub usr_id: UserId,
    pub req_seq: ReqSeq,
    pub time_created: DateTime<Utc>,
    pub time_committed: Option<DateTime<Utc>>,
}

impl UploadRequest {
    /// An upload request counts as active until commit stamps it.
    pub fn is_active(&self) -> bool {
        self.time_committed.is_none()
    }
}

/// One received chunk of an upload request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChunk {
    pub usr_id: UserId,
    pub req_seq: ReqSeq,
    pub part: u16,
    /// Lowercase hex SHA-1 of the chunk body.
    pub checksum: String,
    pub size_bytes: u64,
}

/// A committed media file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub resource_id: String,
    pub owner_usr_id: UserId,
    pub last_upld_req: ReqSeq,
    pub media_type: String,
    pub time_committed: DateTime<Utc>,
}

/// Per-user capabilities on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AclCapability {
    pub transcode: bool,
    pub edit_acl: bool,
}

/// One user-level ACL row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub usr_id: u32,
    #[serde(rename = "access_control")]
    pub capability: AclCapability,
}
