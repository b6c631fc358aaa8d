//! Attribute-based access control for resource reads.
//!
//! The enforcement point decodes the document id, verifies the resource
//! row, then decides: publicly visible resources are granted to anyone
//! (and marked cacheable); otherwise the caller must be authenticated and
//! be the owner or hold a user-level ACL row on the file. A row fetched
//! from the database implicitly means read access.

use axum::http::StatusCode;
// URL-safe alphabet: doc ids travel in query strings and rewritten
// playlist URLs, where `+` and `/` would not survive form decoding
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine as _;
use vodvault_common::report::section;
use vodvault_common::{ReqSeq, ResourceId, UserId};
use vodvault_db::pool::{get_conn, DbPool};
use vodvault_db::queries::{acl, resources};

use crate::api::ApiError;

/// Attributes of a granted read, consumed by the streaming handlers.
#[derive(Debug, Clone)]
pub struct ResourceGrant {
    pub resource_id: ResourceId,
    pub owner_usr_id: UserId,
    pub last_upld_req: ReqSeq,
    pub media_type: String,
    /// True when the resource is publicly visible and responses may be
    /// cached by intermediaries.
    pub cacheable: bool,
}

/// Decode a base64 document id into the resource id it names.
pub fn decode_doc_id(doc_id: &str) -> Result<ResourceId, ApiError> {
    let raw = BASE64
        .decode(doc_id.as_bytes())
        .map_err(|_| ApiError::bad_request(section::REASON, "doc id is not valid base64"))?;
    let text = String::from_utf8(raw)
        .map_err(|_| ApiError::bad_request(section::REASON, "doc id decodes to non-text"))?;
    ResourceId::parse(text)
        .map_err(|e| ApiError::bad_request(section::RESOURCE_ID, e.to_string()))
}

/// Encode a resource id as the document id handed to streaming clients.
pub fn encode_doc_id(resource_id: &ResourceId) -> String {
    BASE64.encode(resource_id.as_str().as_bytes())
}

/// Authorize `user` to read `resource_id`. Returns the grant or the
/// translated HTTP error (404 unknown id, 409 duplicated rows, 401
/// missing credentials, 403 denied, 503 database failure).
pub fn authorize_resource_read(
    db: &DbPool,
    resource_id: &ResourceId,
    user: Option<UserId>,
) -> Result<ResourceGrant, ApiError> {
    let conn = get_conn(db)?;
    let check = resources::verify_resource_id(&conn, resource_id, true)?;
    if let Some(code) = check.status_hint() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(ApiError::new(
            status,
            section::RESOURCE_ID,
            match code {
                404 => "resource does not exist",
                _ => "resource id maps to conflicting rows",
            },
        ));
    }

    let grant = ResourceGrant {
        resource_id: resource_id.clone(),
        owner_usr_id: UserId::new(check.owner_usr_id),
        last_upld_req: ReqSeq::new(check.last_upld_req)
            .map_err(|e| ApiError::internal(e.to_string()))?,
        media_type: check.media_type.clone(),
        cacheable: check.acl_exists && check.acl_visible,
    };

    if grant.cacheable {
        return Ok(grant);
    }

    // limited to authorized users from here on
    let Some(usr_id) = user else {
        return Err(ApiError::unauthorized());
    };
    if usr_id == grant.owner_usr_id {
        return Ok(grant);
    }
    let rows = acl::load_resource_acl(&conn, resource_id, Some(usr_id.as_u32()))?;
    if rows.len() == 1 {
        Ok(grant)
    } else {
        Err(ApiError::forbidden(section::USR_ID, "operation denied"))
    }
}
