//! Multipart-upload endpoints: initiate, upload-part, complete, abort.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use vodvault_common::report::section;
use vodvault_common::{layout, ReqSeq, ResourceId};
use vodvault_db::pool::get_conn;
use vodvault_db::queries::{filechunks, resources, upload_requests};
use vodvault_storage::OpenFlags;

use crate::api::error::{ApiError, ApiResult};
use crate::server::auth::CurrentUser;
use crate::server::AppContext;
use crate::upload::{find_boundary, receive_part};

/// POST /upload/multipart/initiate
pub async fn initiate(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
) -> ApiResult<Response> {
    let mut conn = get_conn(&ctx.db)?;
    match upload_requests::create_request(&mut conn, usr_id)? {
        upload_requests::CreateRequestOutcome::Created(req_seq) => {
            tracing::info!(%usr_id, %req_seq, "upload request created");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "usr_id": usr_id, "req_seq": req_seq.as_u32() })),
            )
                .into_response())
        }
        upload_requests::CreateRequestOutcome::LimitExceeded {
            num_active,
            max_limit,
        } => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "num_active": num_active, "max_limit": max_limit })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
pub struct PartQuery {
    pub req_seq: String,
    pub part: u16,
}

/// POST `/upload/multipart/part?req_seq=<hex>&part=<n>`
pub async fn upload_part(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Query(query): Query<PartQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let req_seq = ReqSeq::from_hex(&query.req_seq)
        .map_err(|e| ApiError::bad_request(section::REQ_SEQ, e.to_string()))?;
    if query.part == 0 {
        return Err(ApiError::bad_request(
            section::REASON,
            "part numbers start at 1",
        ));
    }
    let boundary = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(find_boundary)
        .ok_or_else(|| {
            ApiError::bad_request(section::BODY, "missing boundary in multipart/form-data")
        })?
        .to_string();

    {
        let conn = get_conn(&ctx.db)?;
        let request = upload_requests::fetch_request(&conn, usr_id, req_seq)?
            .ok_or_else(|| ApiError::not_found(section::REQ_SEQ, "unknown upload request"))?;
        if !request.is_active() {
            return Err(ApiError::bad_request(
                section::REQ_SEQ,
                "upload request is already committed",
            ));
        }
        let used = filechunks::total_bytes_for_user(&conn, usr_id)?;
        if used + body.len() as u64 > ctx.config.upload.user_quota_bytes {
            return Err(ApiError::forbidden(
                section::USR_ID,
                "user storage quota exceeded",
            ));
        }
    }

    let chunk_path = layout::chunk_file(usr_id, req_seq, query.part);
    ctx.storage
        .mkdir(&layout::request_dir(usr_id, req_seq), None, true)
        .await
        .map_err(|e| ApiError::internal(format!("chunk dir setup: {e}")))?;
    let mut file = ctx
        .storage
        .open(&chunk_path, OpenFlags::write_create())
        .await
        .map_err(|e| ApiError::internal(format!("chunk open: {e}")))?;

    let outcome = receive_part(
        &body,
        &boundary,
        &mut file,
        ctx.config.upload.parse_step_bytes,
        ctx.config.upload.write_buf_bytes,
    )
    .await;
    file.close()
        .await
        .map_err(|e| ApiError::internal(format!("chunk close: {e}")))?;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            // a malformed body leaves no chunk behind
            let _ = ctx.storage.unlink(&chunk_path).await;
            return Err(ApiError::from_report(e.into_report(), StatusCode::BAD_REQUEST));
        }
    };

    let conn = get_conn(&ctx.db)?;
    filechunks::upsert_chunk(
        &conn,
        usr_id,
        req_seq,
        query.part,
        &outcome.checksum,
        outcome.size_bytes,
    )?;
    tracing::debug!(%usr_id, %req_seq, part = query.part, bytes = outcome.size_bytes, "chunk stored");

    Ok((
        StatusCode::OK,
        Json(json!({
            "checksum": outcome.checksum,
            "alg": "sha1",
            "part": query.part,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub resource_id: String,
    pub req_seq: u32,
    #[serde(rename = "type")]
    pub media_type: String,
}

/// PATCH /upload/multipart/complete
pub async fn complete(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Response> {
    let resource_id = ResourceId::parse(body.resource_id.clone())
        .map_err(|e| ApiError::bad_request(section::RESOURCE_ID, e.to_string()))?;
    if body.media_type != "video" && body.media_type != "image" {
        return Err(ApiError::bad_request(
            section::TYPE,
            "type must be video or image",
        ));
    }
    let req_seq = ReqSeq::new(body.req_seq)
        .map_err(|e| ApiError::bad_request(section::REQ_SEQ, e.to_string()))?;

    let mut conn = get_conn(&ctx.db)?;
    let tx = conn
        .transaction()
        .map_err(|e| ApiError::from(vodvault_common::Error::database(e.to_string())))?;

    let request = upload_requests::fetch_request(&tx, usr_id, req_seq)?
        .ok_or_else(|| ApiError::not_found(section::REQ_SEQ, "unknown upload request"))?;
    if !request.is_active() {
        return Err(ApiError::bad_request(
            section::REQ_SEQ,
            "upload request is already committed",
        ));
    }
    let chunks = filechunks::list_parts(&tx, usr_id, req_seq)?;
    let num_parts = filechunks::validate_dense(&chunks)
        .map_err(|reason| ApiError::bad_request(section::BODY, reason))?;

    let now = Utc::now();
    let outcome =
        resources::commit_resource(&tx, &resource_id, usr_id, req_seq, &body.media_type, now)?;
    if outcome == resources::CommitOutcome::NotOwner {
        // dropping the transaction rolls the insert back
        return Err(ApiError::forbidden(
            section::RESOURCE_ID,
            "NOT allowed to use the ID",
        ));
    }
    upload_requests::mark_committed(&tx, usr_id, req_seq, now)?;
    tx.commit()
        .map_err(|e| ApiError::from(vodvault_common::Error::database(e.to_string())))?;

    let status = match outcome {
        resources::CommitOutcome::Created => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    tracing::info!(%usr_id, %req_seq, resource = %resource_id, parts = num_parts, "upload committed");
    Ok((
        status,
        Json(json!({
            "resource_id": resource_id.as_str(),
            "req_seq": req_seq.as_u32(),
            "usr_id": usr_id,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct AbortQuery {
    pub req_seq: String,
}

/// DELETE `/upload/multipart?req_seq=<hex>`
pub async fn abort(
    State(ctx): State<AppContext>,
    CurrentUser(usr_id): CurrentUser,
    Query(query): Query<AbortQuery>,
) -> ApiResult<Response> {
    let req_seq = ReqSeq::from_hex(&query.req_seq)
        .map_err(|e| ApiError::bad_request(section::REQ_SEQ, e.to_string()))?;

    let parts = {
        let mut conn = get_conn(&ctx.db)?;
        let request = upload_requests::fetch_request(&conn, usr_id, req_seq)?;
        match request {
            Some(r) if r.is_active() => {
                let parts = filechunks::list_parts(&conn, usr_id, req_seq)?;
                upload_requests::delete_request(&mut conn, usr_id, req_seq)?;
                parts
            }
            _ => Vec::new(),
        }
    };
    for chunk in &parts {
        let _ = ctx
            .storage
            .unlink(&layout::chunk_file(usr_id, req_seq, chunk.part))
            .await;
    }
    if !parts.is_empty() {
        let _ = ctx
            .storage
            .rmdir(&layout::request_dir(usr_id, req_seq))
            .await;
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
