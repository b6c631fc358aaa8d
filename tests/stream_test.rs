//! Streaming integration tests: master-playlist merge, media-playlist
//! rewrite, crypto-key serving, and on-the-fly segment encryption, all
//! gated by the ACL enforcement point.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::TestHarness;
use serde_json::json;
use vodvault::abac::encode_doc_id;
use vodvault_common::{ReqSeq, ResourceId, UserId};
use vodvault_db::pool::get_conn;
use vodvault_db::queries::{acl, resources};
use vodvault_media::{KeyStore, SegmentEncryptor};

const OWNER: u32 = 426;
const REQ_SEQ: u32 = 0x99;

const KEY_HEX: &str = "00112233445566778899AABBCCDDEEFF";
const IV_HEX: &str = "5D4A38331751A390296F986F0B7531A9";

// the "De" variant carries its own key entry
const KEY2_HEX: &str = "FFEEDDCCBBAA99887766554433221100";
const IV2_HEX: &str = "296F986F0B7531A95D4A38331751A390";

const SEGMENT_PLAINTEXT: &[u8] = b"fake fmp4 segment payload, deliberately not block aligned.";

struct Seeded {
    harness: TestHarness,
    doc_id: String,
}

fn write(harness: &TestHarness, rel: &str, data: &[u8]) {
    let path = harness.storage_dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// Seed one committed video resource with two HLS variants and a
/// 128-bit crypto key.
fn seed_video(resource: &str) -> Seeded {
    let harness = TestHarness::new();
    let res_id = ResourceId::parse(resource).unwrap();
    {
        let conn = get_conn(&harness.db).unwrap();
        resources::commit_resource(
            &conn,
            &res_id,
            UserId::new(OWNER),
            ReqSeq::new(REQ_SEQ).unwrap(),
            "video",
            Utc::now(),
        )
        .unwrap();
    }
    let base = format!("{OWNER}/{:08x}", REQ_SEQ);

    let keystore = format!(
        "{{\"8134EADF\":{{\"key\":{{\"nbytes\":16,\"data\":\"{KEY_HEX}\"}},\
         \"iv\":{{\"nbytes\":16,\"data\":\"{IV_HEX}\"}},\"alg\":\"aes\"}},\
         \"77BEEF01\":{{\"key\":{{\"nbytes\":16,\"data\":\"{KEY2_HEX}\"}},\
         \"iv\":{{\"nbytes\":16,\"data\":\"{IV2_HEX}\"}},\"alg\":\"aes\"}}}}"
    );
    write(&harness, &format!("{base}/crypto_key.json"), keystore.as_bytes());

    for (ver, bandwidth, key_id) in [("Id", 123456u32, "8134EADF"), ("De", 765432, "77BEEF01")] {
        let dir = format!("{base}/committed/{ver}");
        write(
            &harness,
            &format!("{dir}/mst_plist.m3u8"),
            format!(
                "#EXTM3U\n#EXT-X-VERSION:7\n\
                 #EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION=160x120\n\
                 mdia_plist.m3u8\n"
            )
            .as_bytes(),
        );
        write(
            &harness,
            &format!("{dir}/mdia_plist.m3u8"),
            "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:13\n\
             #EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n\
             #EXT-X-MAP:URI=\"init_map.mp4\"\n\
             #EXTINF:12.270570,\ndataseg_0000004\n\
             #EXT-X-ENDLIST\n"
                .as_bytes(),
        );
        write(
            &harness,
            &format!("{dir}/metadata.json"),
            format!("{{\"key_id\":\"{key_id}\"}}").as_bytes(),
        );
        write(&harness, &format!("{dir}/init_map.mp4"), b"init-map-bytes");
        write(&harness, &format!("{dir}/dataseg_0000004"), SEGMENT_PLAINTEXT);
    }

    let doc_id = encode_doc_id(&res_id);
    Seeded { harness, doc_id }
}

async fn seek(
    seeded: &Seeded,
    token: Option<&str>,
    detail: &str,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    seeded
        .harness
        .send_full(
            Method::GET,
            &format!(
                "/file/stream/seek?doc_id={}&detail={detail}",
                seeded.doc_id
            ),
            token,
            None,
            Vec::new(),
        )
        .await
}

#[tokio::test]
async fn test_master_playlist_merges_versions() {
    let seeded = seed_video("r8fj3Il");
    let token = seeded.harness.token_for(OWNER);

    let (status, _, body) = seek(&seeded, Some(&token), "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();

    assert!(text.starts_with("#EXTM3U\n#EXT-X-VERSION:7\n"));
    assert_eq!(text.matches("#EXT-X-STREAM-INF:").count(), 2);
    for ver in ["Id", "De"] {
        let expected = format!(
            "https://media.test/file/stream/seek?doc_id={}&detail={ver}/mdia_plist.m3u8",
            seeded.doc_id
        );
        assert!(text.contains(&expected), "missing rewritten URL for {ver}");
    }
}

#[tokio::test]
async fn test_media_playlist_rewrite_carries_key_and_map() {
    let seeded = seed_video("vidmp");
    let token = seeded.harness.token_for(OWNER);

    let (status, _, body) = seek(&seeded, Some(&token), "Id/mdia_plist.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();

    assert!(text.contains("#EXT-X-KEY:METHOD=AES-128,URI=\"https://media.test"));
    assert!(text.contains("detail=Id/crypto_key"));
    assert!(text.contains(&format!("IV=0x{IV_HEX}")));
    assert!(text.contains(&format!(
        "#EXT-X-MAP:URI=\"https://media.test/file/stream/seek?doc_id={}&detail=Id/init_map.mp4\"",
        seeded.doc_id
    )));
    assert!(text.contains(&format!(
        "#EXTINF:12.270570,\nhttps://media.test/file/stream/seek?doc_id={}&detail=Id/dataseg_0000004",
        seeded.doc_id
    )));
    assert!(text.trim_end().ends_with("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn test_crypto_key_resolves_per_variant() {
    let seeded = seed_video("vidkey");
    let token = seeded.harness.token_for(OWNER);

    let (status, headers, body) = seek(&seeded, Some(&token), "Id/crypto_key").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(body, hex::decode(KEY_HEX).unwrap());

    // the other variant serves its own key, not the first one's
    let (status, _, body) = seek(&seeded, Some(&token), "De/crypto_key").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, hex::decode(KEY2_HEX).unwrap());
}

#[tokio::test]
async fn test_crypto_key_with_short_material() {
    // an 8-byte key entry serves exactly those 8 bytes
    let seeded = seed_video("vidshort");
    let base = format!("{OWNER}/{:08x}", REQ_SEQ);
    write(
        &seeded.harness,
        &format!("{base}/crypto_key.json"),
        br#"{"8134EADF":{"key":{"nbytes":8,"data":"5D4AF8331751A309"},"iv":{"nbytes":8,"data":"296F986F0B7531A9"},"alg":"aes"}}"#,
    );
    let token = seeded.harness.token_for(OWNER);

    let (status, _, body) = seek(&seeded, Some(&token), "Id/crypto_key").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, vec![0x5D, 0x4A, 0xF8, 0x33, 0x17, 0x51, 0xA3, 0x09]);
}

#[tokio::test]
async fn test_segment_encrypted_on_the_fly() {
    let seeded = seed_video("vidseg");
    let token = seeded.harness.token_for(OWNER);

    let (status, _, body) = seek(&seeded, Some(&token), "Id/dataseg_0000004").await;
    assert_eq!(status, StatusCode::OK);

    // ciphertext length is the plaintext length rounded up to the next
    // 16-byte boundary
    let expected_len = (SEGMENT_PLAINTEXT.len() / 16 + 1) * 16;
    assert_eq!(body.len(), expected_len);

    // identical cipher parameters produce identical ciphertext
    let key = hex::decode(KEY_HEX).unwrap();
    let iv = hex::decode(IV_HEX).unwrap();
    let mut enc = SegmentEncryptor::new(&key, &iv).unwrap();
    let mut expected = enc.update(SEGMENT_PLAINTEXT);
    expected.extend_from_slice(&enc.finalize());
    assert_eq!(body, expected);
}

#[tokio::test]
async fn test_missing_key_id_is_404() {
    let seeded = seed_video("vidnokey");
    let base = format!("{OWNER}/{:08x}", REQ_SEQ);
    write(
        &seeded.harness,
        &format!("{base}/committed/Id/metadata.json"),
        br#"{"key_id":"DEADBEEF"}"#,
    );
    let token = seeded.harness.token_for(OWNER);

    let (status, _, _) = seek(&seeded, Some(&token), "Id/mdia_plist.m3u8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_gate_and_cache_control() {
    let seeded = seed_video("vidgate");

    // private resource: anonymous 401, stranger 403, owner 200 private
    let (status, _, _) = seek(&seeded, None, "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stranger = seeded.harness.token_for(999);
    let (status, _, _) = seek(&seeded, Some(&stranger), "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let owner = seeded.harness.token_for(OWNER);
    let (status, headers, _) = seek(&seeded, Some(&owner), "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("cache-control").unwrap(), "private,no-cache");

    // the crypto key passes the same gate
    let (status, _, _) = seek(&seeded, None, "Id/crypto_key").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // a user-level row grants read
    {
        let mut conn = get_conn(&seeded.harness.db).unwrap();
        let res_id = ResourceId::parse("vidgate").unwrap();
        let mut existing = Vec::new();
        acl::save_user_level_acl(
            &mut conn,
            &res_id,
            &mut existing,
            &[vodvault_db::models::AclEntry {
                usr_id: 999,
                capability: Default::default(),
            }],
        )
        .unwrap();
    }
    let (status, _, _) = seek(&seeded, Some(&stranger), "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::OK);

    // public visibility: anonymous 200 and cacheable
    {
        let conn = get_conn(&seeded.harness.db).unwrap();
        acl::set_visibility(&conn, &ResourceId::parse("vidgate").unwrap(), true).unwrap();
    }
    let (status, headers, _) = seek(&seeded, None, "mst_plist.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("cache-control").unwrap(), "max-age=300");
}

#[tokio::test]
async fn test_stream_init_descriptor() {
    let seeded = seed_video("vidinit");
    let token = seeded.harness.token_for(OWNER);

    let (status, body) = seeded
        .harness
        .send_json(
            Method::POST,
            "/file/stream/init",
            Some(&token),
            Some(json!({ "resource_id": "vidinit" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "hls");
    assert_eq!(body["doc_id"], seeded.doc_id);
    assert_eq!(body["host"], "media.test");
    assert_eq!(body["query_param_label"]["doc_id"], "doc_id");
}

#[tokio::test]
async fn test_invalid_detail_is_400() {
    let seeded = seed_video("vidbad");
    let token = seeded.harness.token_for(OWNER);

    let (status, _, _) = seek(&seeded, Some(&token), "no_such_detail").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = seek(&seeded, Some(&token), "Id/dataseg_12").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_doc_id_is_404() {
    let harness = TestHarness::new();
    let token = harness.token_for(1);
    let doc_id = encode_doc_id(&ResourceId::parse("ghost").unwrap());
    let (status, _) = harness
        .send(
            Method::GET,
            &format!("/file/stream/seek?doc_id={doc_id}&detail=mst_plist.m3u8"),
            Some(&token),
            None,
            Vec::new(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_keystore_parses_seeded_document() {
    // guard: the seeded keystore document matches the model
    let seeded = seed_video("vidparse");
    let base = format!("{OWNER}/{:08x}", REQ_SEQ);
    let raw = std::fs::read(
        seeded
            .harness
            .storage_dir
            .path()
            .join(format!("{base}/crypto_key.json")),
    )
    .unwrap();
    let store = KeyStore::from_json(&raw).unwrap();
    let entry = store.get("8134EADF").unwrap();
    assert_eq!(entry.key.decode().unwrap(), hex::decode(KEY_HEX).unwrap());
}
