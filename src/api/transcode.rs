//! Transcode-job endpoints: start a pipeline run, discard an ongoing
//! job.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use vodvault_common::report::section;
use vodvault_common::{ReqSeq, ResourceId, UserId, VersionId};
use vodvault_db::pool::get_conn;
use vodvault_db::queries::{acl, filechunks, resources};
use vodvault_storage::LocalFsStorage;

use crate::api::error::{ApiError, ApiResult};
use crate::server::auth::CurrentUser;
use crate::server::AppContext;
use crate::transcode::source::ChunkSource;
use crate::transcode::{
    create_processor, Direction, MediaKind, StorageMap, TranscodeJobSpec,
};

#[derive(Deserialize)]
pub struct TranscodeBody {
    pub resource_id: String,
    pub version: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Owner or a user holding the `transcode` capability may start a run.
fn require_transcoder(
    conn: &rusqlite::Connection,
    resource_id: &ResourceId,
    owner: u32,
    usr_id: UserId,
) -> Result<(), ApiError> {
    if owner == usr_id.as_u32() {
        return Ok(());
    }
    let rows = acl::load_resource_acl(conn, resource_id, Some(usr_id.as_u32()))?;
    match rows.first() {
        Some(entry) if entry.capability.transcode => Ok(()),
        _ => Err(ApiError::forbidden(section::USR_ID, "operation denied")),
    }
}

/// POST /file/transcode
pub async fn start_transcode(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Json(body): Json<TranscodeBody>,
) -> ApiResult<Response> {
    let resource_id = ResourceId::parse(body.resource_id)
        .map_err(|e| ApiError::bad_request(section::RESOURCE_ID, e.to_string()))?;
    let version = VersionId::parse(body.version)
        .map_err(|e| ApiError::bad_request(section::REASON, e.to_string()))?;

    let (owner, req_seq, kind, chunks) = {
        let conn = get_conn(&ctx.db)?;
        let check = resources::verify_resource_id(&conn, &resource_id, false)?;
        if let Some(code) = check.status_hint() {
            let status =
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(ApiError::new(
                status,
                section::RESOURCE_ID,
                "resource lookup failed",
            ));
        }
        require_transcoder(&conn, &resource_id, check.owner_usr_id, usr_id)?;
        let kind = MediaKind::parse(&check.media_type)
            .map_err(|e| ApiError::bad_request(section::TYPE, e.to_string()))?;
        let owner = UserId::new(check.owner_usr_id);
        let req_seq = ReqSeq::new(check.last_upld_req)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let chunks = filechunks::list_parts(&conn, owner, req_seq)?;
        (owner, req_seq, kind, chunks)
    };
    if chunks.is_empty() {
        return Err(ApiError::bad_request(
            section::BODY,
            "resource has no uploaded chunks",
        ));
    }

    let scratch = tempfile::tempdir()
        .map_err(|e| ApiError::internal(format!("scratch dir setup: {e}")))?;
    let local = LocalFsStorage::new(scratch.path())
        .map_err(|e| ApiError::internal(format!("scratch storage setup: {e}")))?;
    let map = StorageMap {
        source: ChunkSource::new(ctx.storage.clone(), owner, req_seq, &chunks),
        remote: ctx.storage.clone(),
        local: Arc::new(local),
    };
    let job = TranscodeJobSpec {
        resource_id: resource_id.clone(),
        usr_id: owner,
        req_seq,
        version: version.clone(),
        width: body.width.unwrap_or(1280),
        height: body.height.unwrap_or(720),
    };
    let processor = create_processor(
        kind,
        Direction::Transcode,
        job,
        map,
        ctx.config.transcode.clone(),
    )
    .map_err(|e| ApiError::bad_request(section::REASON, e.to_string()))?;

    let job_id = ctx.jobs.start(
        processor,
        owner,
        req_seq,
        version,
        ctx.storage.clone(),
        Arc::new(scratch),
    );
    tracing::info!(resource = %resource_id, job = %job_id, "transcode job accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
}

#[derive(Deserialize)]
pub struct DiscardQuery {
    pub id: Option<String>,
}

/// DELETE `/file/transcode?id=<job>`
///
/// Responds 204 whether or not the job exists; only the presence of the
/// `id` parameter is validated.
pub async fn discard_transcode(
    State(ctx): State<AppContext>,
    CurrentUser(_usr_id): CurrentUser,
    Query(query): Query<DiscardQuery>,
) -> ApiResult<Response> {
    let Some(job_id) = query.id else {
        return Err(ApiError::bad_request(section::REASON, "missing job id"));
    };
    ctx.jobs.discard(&job_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}
