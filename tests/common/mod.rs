#![allow(dead_code)]
//! Shared test harness for integration tests.
//!
//! Builds a full [`AppContext`] over an in-memory database and a
//! temporary storage directory, and drives the router directly with
//! `tower::ServiceExt::oneshot` so no socket is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use vodvault::config::Config;
use vodvault::server::{build_router, AppContext};
use vodvault::transcode::manager::TranscodeJobRegistry;
use vodvault_common::UserId;
use vodvault_db::pool::{get_conn, init_memory_pool, DbPool};
use vodvault_db::queries::auth_tokens;
use vodvault_storage::LocalFsStorage;

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database and a temp storage tree.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub router: Router,
    pub storage_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new harness with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let storage_dir = tempfile::tempdir().expect("failed to create storage dir");
        let storage =
            LocalFsStorage::new(storage_dir.path()).expect("failed to create storage backend");

        let ctx = AppContext {
            db: db.clone(),
            storage: Arc::new(storage),
            config: Arc::new(config),
            jobs: Arc::new(TranscodeJobRegistry::new()),
        };
        let router = build_router(ctx.clone());
        Self {
            ctx,
            db,
            router,
            storage_dir,
        }
    }

    /// Issue and return a bearer token authenticating as `usr_id`.
    pub fn token_for(&self, usr_id: u32) -> String {
        let token = format!("test-token-{usr_id}");
        let conn = get_conn(&self.db).unwrap();
        // idempotent across calls within one test
        if auth_tokens::lookup_token(&conn, &token).unwrap().is_none() {
            auth_tokens::issue_token(&conn, UserId::new(usr_id), &token, Some("test")).unwrap();
        }
        token
    }

    /// Send a request and return status, headers, and raw body bytes.
    pub async fn send_full(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "media.test");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let request = builder.body(Body::from(body)).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes.to_vec())
    }

    /// Send a request and return status plus raw body bytes.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> (StatusCode, Vec<u8>) {
        let (status, _, bytes) = self
            .send_full(method, uri, token, content_type, body)
            .await;
        (status, bytes)
    }

    /// Send a JSON request and parse the JSON response.
    pub async fn send_json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let raw = body.map(|v| v.to_string().into_bytes()).unwrap_or_default();
        let content_type = if raw.is_empty() {
            None
        } else {
            Some("application/json")
        };
        let (status, bytes) = self.send(method, uri, token, content_type, raw).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

/// Build a single-part multipart/form-data entity.
pub fn multipart_entity(boundary: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(b"content-disposition: form-data; name=\"chunk\"\r\n\r\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    out
}

/// Upload one part through the API, asserting success, and return the
/// reported checksum.
pub async fn upload_part_ok(
    harness: &TestHarness,
    token: &str,
    req_seq_hex: &str,
    part: u16,
    payload: &[u8],
) -> String {
    let boundary = "testbnd1234";
    let body = multipart_entity(boundary, payload);
    let (status, bytes) = harness
        .send(
            Method::POST,
            &format!("/upload/multipart/part?req_seq={req_seq_hex}&part={part}"),
            Some(token),
            Some(&format!("multipart/form-data; boundary={boundary}")),
            body,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "upload part {part} failed");
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["alg"], "sha1");
    assert_eq!(value["part"], part);
    value["checksum"].as_str().unwrap().to_string()
}
