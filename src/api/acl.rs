//! Access-control endpoints: read/replace the user-level ACL, toggle the
//! file-level visibility flag.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use vodvault_common::report::section;
use vodvault_common::{ResourceId, UserId};
use vodvault_db::models::AclEntry;
use vodvault_db::pool::get_conn;
use vodvault_db::queries::{acl, resources};

use crate::api::error::{ApiError, ApiResult};
use crate::server::auth::CurrentUser;
use crate::server::AppContext;

#[derive(Deserialize)]
pub struct IdQuery {
    pub id: String,
}

fn parse_resource_id(raw: &str) -> Result<ResourceId, ApiError> {
    ResourceId::parse(raw).map_err(|e| ApiError::bad_request(section::RESOURCE_ID, e.to_string()))
}

fn verified_resource(
    conn: &rusqlite::Connection,
    resource_id: &ResourceId,
) -> Result<resources::ResourceCheck, ApiError> {
    let check = resources::verify_resource_id(conn, resource_id, false)?;
    if let Some(code) = check.status_hint() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(ApiError::new(
            status,
            section::RESOURCE_ID,
            "resource lookup failed",
        ));
    }
    Ok(check)
}

/// Owner or a user holding `edit_acl` may change access control.
fn require_acl_editor(
    conn: &rusqlite::Connection,
    resource_id: &ResourceId,
    check: &resources::ResourceCheck,
    usr_id: UserId,
) -> Result<(), ApiError> {
    if check.owner_usr_id == usr_id.as_u32() {
        return Ok(());
    }
    let rows = acl::load_resource_acl(conn, resource_id, Some(usr_id.as_u32()))?;
    match rows.first() {
        Some(entry) if entry.capability.edit_acl => Ok(()),
        _ => Err(ApiError::forbidden(section::USR_ID, "operation denied")),
    }
}

/// GET `/file/acl/usr?id=<resource_id>`
pub async fn read_usr_acl(
    State(ctx): State<AppContext>,
    CurrentUser(_usr_id): CurrentUser,
    Query(query): Query<IdQuery>,
) -> ApiResult<Response> {
    let resource_id = parse_resource_id(&query.id)?;
    let conn = get_conn(&ctx.db)?;
    verified_resource(&conn, &resource_id)?;
    let entries = acl::load_resource_acl(&conn, &resource_id, None)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "size": entries.len(), "data": entries })),
    )
        .into_response())
}

/// PATCH `/file/acl/usr?id=<resource_id>`
///
/// Replaces the user-level ACL with the request body; the stored set is
/// diffed and changed in one transaction.
pub async fn edit_usr_acl(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Query(query): Query<IdQuery>,
    Json(requested): Json<Vec<AclEntry>>,
) -> ApiResult<Response> {
    let resource_id = parse_resource_id(&query.id)?;
    {
        let requested_ids: std::collections::HashSet<u32> =
            requested.iter().map(|e| e.usr_id).collect();
        if requested_ids.len() != requested.len() {
            return Err(ApiError::bad_request(
                section::BODY,
                "duplicate usr_id in requested ACL",
            ));
        }
    }

    let mut conn = get_conn(&ctx.db)?;
    let check = verified_resource(&conn, &resource_id)?;
    require_acl_editor(&conn, &resource_id, &check, usr_id)?;

    let mut existing = acl::load_resource_acl(&conn, &resource_id, None)?;
    let diff = acl::save_user_level_acl(&mut conn, &resource_id, &mut existing, &requested)?;
    tracing::info!(
        resource = %resource_id,
        inserts = diff.inserts.len(),
        updates = diff.update_idx.len(),
        deletes = diff.delete_idx.len(),
        "user-level ACL replaced"
    );

    let entries = acl::load_resource_acl(&conn, &resource_id, None)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "size": entries.len(), "data": entries })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct VisibilityBody {
    pub visible: bool,
}

/// PATCH `/file/acl/flvl?id=<resource_id>`
pub async fn edit_file_acl(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Query(query): Query<IdQuery>,
    Json(body): Json<VisibilityBody>,
) -> ApiResult<Response> {
    let resource_id = parse_resource_id(&query.id)?;
    let conn = get_conn(&ctx.db)?;
    let check = verified_resource(&conn, &resource_id)?;
    if check.owner_usr_id != usr_id.as_u32() {
        return Err(ApiError::forbidden(section::USR_ID, "operation denied"));
    }
    let changed = acl::set_visibility(&conn, &resource_id, body.visible)?;
    if !changed {
        return Err(ApiError::bad_request(
            section::BODY,
            "visibility flag unchanged",
        ));
    }
    Ok((StatusCode::OK, Json(json!({ "visible": body.visible }))).into_response())
}
