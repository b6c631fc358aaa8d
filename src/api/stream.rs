//! Streaming endpoints: stream initiation, element fetch, and the
//! non-stream whole-file fetch.
//!
//! Every element request passes the same enforcement point, the crypto
//! key included: whoever may read the segments may read the key, nobody
//! else.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use vodvault_common::report::section;
use vodvault_common::{layout, ResourceId};
use vodvault_media::StreamUrl;

use crate::abac::{authorize_resource_read, decode_doc_id, encode_doc_id, ResourceGrant};
use crate::api::error::{ApiError, ApiResult};
use crate::server::auth::MaybeUser;
use crate::server::{AppContext, STREAM_SEEK_PATH};
use crate::streaming::{self, StreamDetail, StreamError};

fn map_stream_err(e: StreamError) -> ApiError {
    match e {
        StreamError::NotFound(msg) => ApiError::not_found(section::STORAGE, msg),
        StreamError::Invalid(msg) => ApiError::bad_request(section::REASON, msg),
        StreamError::Storage(e) => {
            tracing::error!("storage failure on stream path: {e}");
            ApiError::internal("storage failure")
        }
        StreamError::Media(vodvault_media::Error::KeyNotFound(id)) => {
            ApiError::not_found(section::STORAGE, format!("crypto key {id} not found"))
        }
        StreamError::Media(e) => {
            tracing::error!("media engine failure on stream path: {e}");
            ApiError::internal("stored media data is corrupt")
        }
    }
}

fn request_host(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(section::REASON, "missing Host header"))
}

fn cache_control_value(ctx: &AppContext, grant: &ResourceGrant) -> String {
    if grant.cacheable {
        format!("max-age={}", ctx.config.streaming.cache_max_age_secs)
    } else {
        "private,no-cache".to_string()
    }
}

fn octet_stream_response(
    body: Body,
    cache_control: String,
) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CACHE_CONTROL, cache_control)
        .body(body)
        .map_err(|e| ApiError::internal(e.to_string()))
}

fn chunks_body(chunks: Vec<Bytes>) -> Body {
    Body::from_stream(futures::stream::iter(
        chunks.into_iter().map(Ok::<_, std::io::Error>),
    ))
}

#[derive(Deserialize)]
pub struct InitStreamBody {
    pub resource_id: String,
}

/// POST /file/stream/init
///
/// Authorizes the caller and hands back the descriptor a player needs to
/// request stream elements.
pub async fn init_stream(
    State(ctx): State<AppContext>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    Json(body): Json<InitStreamBody>,
) -> ApiResult<Response> {
    let resource_id = ResourceId::parse(body.resource_id)
        .map_err(|e| ApiError::bad_request(section::RESOURCE_ID, e.to_string()))?;
    let grant = authorize_resource_read(&ctx.db, &resource_id, user)?;
    if grant.media_type != "video" {
        return Err(ApiError::bad_request(
            section::TYPE,
            "resource is not a streamable video",
        ));
    }
    let host = request_host(&headers)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "type": "hls",
            "doc_id": encode_doc_id(&grant.resource_id),
            "host": host,
            "seek_path": STREAM_SEEK_PATH,
            "query_param_label": {
                "doc_id": ctx.config.streaming.doc_id_label,
                "detail": ctx.config.streaming.detail_label,
            },
            "update_interval": { "keyfile": ctx.config.streaming.cache_max_age_secs },
        })),
    )
        .into_response())
}

/// GET `/file/stream/seek?<doc_qp>=<base64>&<detail_qp>=<keyword>`
pub async fn seek(
    State(ctx): State<AppContext>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let labels = &ctx.config.streaming;
    let doc_id = params
        .get(&labels.doc_id_label)
        .ok_or_else(|| ApiError::bad_request(section::REASON, "missing document id"))?;
    let detail_raw = params
        .get(&labels.detail_label)
        .ok_or_else(|| ApiError::bad_request(section::REASON, "missing element detail"))?;

    let resource_id = decode_doc_id(doc_id)?;
    let grant = authorize_resource_read(&ctx.db, &resource_id, user)?;
    if grant.media_type != "video" {
        return Err(ApiError::bad_request(
            section::TYPE,
            "resource is not a streamable video",
        ));
    }
    let detail = streaming::parse_detail(detail_raw).map_err(map_stream_err)?;

    let url = StreamUrl {
        host: request_host(&headers)?,
        path: STREAM_SEEK_PATH.to_string(),
        doc_label: labels.doc_id_label.clone(),
        detail_label: labels.detail_label.clone(),
        doc_id: doc_id.clone(),
    };
    let usr_id = grant.owner_usr_id;
    let req_seq = grant.last_upld_req;
    let read_buf = labels.read_buf_bytes;
    let cache_control = cache_control_value(&ctx, &grant);

    let body = match detail {
        StreamDetail::MasterPlaylist => {
            let chunks = streaming::master_playlist_chunks(
                &ctx.storage,
                usr_id,
                req_seq,
                url,
                read_buf,
            )
            .await
            .map_err(map_stream_err)?;
            chunks_body(chunks)
        }
        StreamDetail::MediaPlaylist(version) => {
            let chunks = streaming::media_playlist_chunks(
                &ctx.storage,
                usr_id,
                req_seq,
                &version,
                url,
                read_buf,
                labels.playlist_out_buf_bytes,
            )
            .await
            .map_err(map_stream_err)?;
            chunks_body(chunks)
        }
        StreamDetail::Segment(version, name) => {
            let key_entry = streaming::variant_key_entry(
                &ctx.storage,
                usr_id,
                req_seq,
                &version,
                read_buf,
            )
            .await
            .map_err(map_stream_err)?;
            streaming::encrypted_segment_body(
                ctx.storage.clone(),
                usr_id,
                req_seq,
                &version,
                &name,
                &key_entry,
                read_buf,
            )
            .await
            .map_err(map_stream_err)?
        }
        StreamDetail::InitMap(version) => {
            let path = layout::committed_dir(usr_id, req_seq, &version)
                .join(layout::INIT_MAP_FILENAME);
            streaming::raw_file_body(ctx.storage.clone(), path, read_buf)
                .await
                .map_err(map_stream_err)?
        }
        StreamDetail::CryptoKey(version) => {
            let key =
                streaming::crypto_key_bytes(&ctx.storage, usr_id, req_seq, &version, read_buf)
                    .await
                    .map_err(map_stream_err)?;
            Body::from(key)
        }
    };
    octet_stream_response(body, cache_control)
}

/// GET `/file/nonstream?<doc_qp>=<base64>&<detail_qp>=<ver>/<file>`
///
/// Serves a committed file of a non-stream resource (image variants and
/// the like) without transformation.
pub async fn nonstream_fetch(
    State(ctx): State<AppContext>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let labels = &ctx.config.streaming;
    let doc_id = params
        .get(&labels.doc_id_label)
        .ok_or_else(|| ApiError::bad_request(section::REASON, "missing document id"))?;
    let detail = params
        .get(&labels.detail_label)
        .ok_or_else(|| ApiError::bad_request(section::REASON, "missing element detail"))?;

    let resource_id = decode_doc_id(doc_id)?;
    let grant = authorize_resource_read(&ctx.db, &resource_id, user)?;

    let (ver, name) = detail
        .split_once('/')
        .ok_or_else(|| ApiError::bad_request(section::REASON, "detail must be <version>/<file>"))?;
    let version = vodvault_common::VersionId::parse(ver)
        .map_err(|e| ApiError::bad_request(section::REASON, e.to_string()))?;
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(ApiError::bad_request(section::REASON, "invalid file name"));
    }

    let path = layout::committed_dir(grant.owner_usr_id, grant.last_upld_req, &version).join(name);
    let body = streaming::raw_file_body(ctx.storage.clone(), path, labels.read_buf_bytes)
        .await
        .map_err(map_stream_err)?;
    octet_stream_response(body, cache_control_value(&ctx, &grant))
}
