//! Upload flow integration tests: initiate, part upload, commit, abort,
//! and the active-request limit.

mod common;

use axum::http::{Method, StatusCode};
use common::{upload_part_ok, TestHarness};
use serde_json::json;
use sha1::{Digest, Sha1};

async fn initiate(harness: &TestHarness, token: &str) -> (u32, String) {
    let (status, body) = harness
        .send_json(Method::POST, "/upload/multipart/initiate", Some(token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let req_seq = body["req_seq"].as_u64().unwrap() as u32;
    (req_seq, format!("{req_seq:08x}"))
}

#[tokio::test]
async fn test_upload_commit_flow() {
    let harness = TestHarness::new();
    let token = harness.token_for(426);

    let (req_seq, seq_hex) = initiate(&harness, &token).await;

    // three parts with known bodies
    for (part, payload) in [(1u16, &b"AAA"[..]), (2, b"BBBB"), (3, b"CC")] {
        let checksum = upload_part_ok(&harness, &token, &seq_hex, part, payload).await;
        assert_eq!(checksum, hex::encode(Sha1::digest(payload)));
        // the chunk landed at <usr>/<req_seq>/<part>
        let stored = std::fs::read(
            harness
                .storage_dir
                .path()
                .join(format!("426/{seq_hex}/{part}")),
        )
        .unwrap();
        assert_eq!(stored, payload);
    }

    let (status, body) = harness
        .send_json(
            Method::PATCH,
            "/upload/multipart/complete",
            Some(&token),
            Some(json!({ "resource_id": "r8fj3Il", "req_seq": req_seq, "type": "image" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["resource_id"], "r8fj3Il");
    assert_eq!(body["req_seq"], req_seq);
    assert_eq!(body["usr_id"], 426);

    // the owner reads an empty user-level ACL afterwards
    let (status, body) = harness
        .send_json(Method::GET, "/file/acl/usr?id=r8fj3Il", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], 0);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_duplicate_commit_by_other_user_rejected() {
    let harness = TestHarness::new();
    let owner = harness.token_for(426);
    let intruder = harness.token_for(427);

    let (req_seq, seq_hex) = initiate(&harness, &owner).await;
    upload_part_ok(&harness, &owner, &seq_hex, 1, b"AAA").await;
    let (status, _) = harness
        .send_json(
            Method::PATCH,
            "/upload/multipart/complete",
            Some(&owner),
            Some(json!({ "resource_id": "r8fj3Il", "req_seq": req_seq, "type": "image" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // a different user committing the same resource id is denied
    let (req_seq2, seq_hex2) = initiate(&harness, &intruder).await;
    upload_part_ok(&harness, &intruder, &seq_hex2, 1, b"XXX").await;
    let (status, body) = harness
        .send_json(
            Method::PATCH,
            "/upload/multipart/complete",
            Some(&intruder),
            Some(json!({ "resource_id": "r8fj3Il", "req_seq": req_seq2, "type": "image" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["resource_id"], "NOT allowed to use the ID");
}

#[tokio::test]
async fn test_commit_rejects_part_gaps() {
    let harness = TestHarness::new();
    let token = harness.token_for(7);

    let (req_seq, seq_hex) = initiate(&harness, &token).await;
    upload_part_ok(&harness, &token, &seq_hex, 1, b"AAA").await;
    upload_part_ok(&harness, &token, &seq_hex, 3, b"CCC").await;

    let (status, _) = harness
        .send_json(
            Method::PATCH,
            "/upload/multipart/complete",
            Some(&token),
            Some(json!({ "resource_id": "gapped", "req_seq": req_seq, "type": "image" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_active_request_limit() {
    let harness = TestHarness::new();
    let token = harness.token_for(9);

    for _ in 0..3 {
        initiate(&harness, &token).await;
    }
    let (status, body) = harness
        .send_json(Method::POST, "/upload/multipart/initiate", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["num_active"], 3);
    assert_eq!(body["max_limit"], 3);
}

#[tokio::test]
async fn test_abort_removes_request() {
    let harness = TestHarness::new();
    let token = harness.token_for(12);

    let (_req_seq, seq_hex) = initiate(&harness, &token).await;
    upload_part_ok(&harness, &token, &seq_hex, 1, b"payload").await;
    let chunk_path = harness.storage_dir.path().join(format!("12/{seq_hex}/1"));
    assert!(chunk_path.is_file());

    let (status, _) = harness
        .send_json(
            Method::DELETE,
            &format!("/upload/multipart?req_seq={seq_hex}"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!chunk_path.exists());

    // further parts against the aborted request are rejected
    let boundary = "bnd";
    let body = common::multipart_entity(boundary, b"more");
    let (status, _) = harness
        .send(
            Method::POST,
            &format!("/upload/multipart/part?req_seq={seq_hex}&part=2"),
            Some(&token),
            Some(&format!("multipart/form-data; boundary={boundary}")),
            body,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unauthenticated_upload_rejected() {
    let harness = TestHarness::new();
    let (status, _) = harness
        .send_json(Method::POST, "/upload/multipart/initiate", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_quota_exceeded_is_forbidden() {
    let mut config = vodvault::config::Config::default();
    // generous enough for the first small entity, too small for the next
    config.upload.user_quota_bytes = 150;
    let harness = TestHarness::with_config(config);
    let token = harness.token_for(30);

    let (_req_seq, seq_hex) = initiate(&harness, &token).await;
    upload_part_ok(&harness, &token, &seq_hex, 1, b"12345678").await;

    let boundary = "bnd";
    let body = common::multipart_entity(boundary, &[0x41u8; 200]);
    let (status, _) = harness
        .send(
            Method::POST,
            &format!("/upload/multipart/part?req_seq={seq_hex}&part=2"),
            Some(&token),
            Some(&format!("multipart/form-data; boundary={boundary}")),
            body,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
