//! On-disk resource layout shared by the upload, transcode and streaming
//! paths.
//!
//! All paths here are relative to a storage `base_path`:
//!
//! ```text
//! <usr_id>/<req_seq>/<part_num>              in-flight chunks
//! <usr_id>/<req_seq>/transcoding/<ver>/...   scratch while a pipeline runs
//! <usr_id>/<req_seq>/committed/<ver>/...     durable outputs
//! <usr_id>/<req_seq>/discarding/<ver>/...    tombstones
//! <usr_id>/<req_seq>/crypto_key.json         per-request key store
//! ```

use std::path::PathBuf;

use crate::ids::{ReqSeq, UserId, VersionId};

/// Master playlist filename inside a committed version directory.
pub const MASTER_PLAYLIST_FILENAME: &str = "mst_plist.m3u8";

/// Media (level-2) playlist filename inside a committed version directory.
pub const MEDIA_PLAYLIST_FILENAME: &str = "mdia_plist.m3u8";

/// fMP4 initialization map filename.
pub const INIT_MAP_FILENAME: &str = "init_map.mp4";

/// Per-version metadata document (references the crypto key id).
pub const VERSION_METADATA_FILENAME: &str = "metadata.json";

/// Manifest of flush-time digests written next to the segments.
pub const FLUSH_MANIFEST_FILENAME: &str = "flush_manifest.json";

/// Crypto key store filename at the upload-request level.
pub const CRYPTO_KEY_FILENAME: &str = "crypto_key.json";

/// Prefix of media segment filenames.
pub const SEGMENT_FILENAME_PREFIX: &str = "dataseg_";

/// Number of zero-padded digits in a segment filename suffix.
pub const SEGMENT_NUM_DIGITS: usize = 7;

/// Subdirectory names of the version lifecycle areas.
pub const TRANSCODING_DIR: &str = "transcoding";
pub const COMMITTED_DIR: &str = "committed";
pub const DISCARDING_DIR: &str = "discarding";

/// Root directory of one upload request.
pub fn request_dir(usr_id: UserId, req_seq: ReqSeq) -> PathBuf {
    PathBuf::from(usr_id.to_string()).join(req_seq.to_hex())
}

/// Path of one uploaded chunk, numbered from 1.
pub fn chunk_file(usr_id: UserId, req_seq: ReqSeq, part: u16) -> PathBuf {
    request_dir(usr_id, req_seq).join(part.to_string())
}

pub fn transcoding_root(usr_id: UserId, req_seq: ReqSeq) -> PathBuf {
    request_dir(usr_id, req_seq).join(TRANSCODING_DIR)
}

pub fn committed_root(usr_id: UserId, req_seq: ReqSeq) -> PathBuf {
    request_dir(usr_id, req_seq).join(COMMITTED_DIR)
}

pub fn discarding_root(usr_id: UserId, req_seq: ReqSeq) -> PathBuf {
    request_dir(usr_id, req_seq).join(DISCARDING_DIR)
}

pub fn transcoding_dir(usr_id: UserId, req_seq: ReqSeq, version: &VersionId) -> PathBuf {
    transcoding_root(usr_id, req_seq).join(version.as_str())
}

pub fn committed_dir(usr_id: UserId, req_seq: ReqSeq, version: &VersionId) -> PathBuf {
    committed_root(usr_id, req_seq).join(version.as_str())
}

pub fn discarding_dir(usr_id: UserId, req_seq: ReqSeq, version: &VersionId) -> PathBuf {
    discarding_root(usr_id, req_seq).join(version.as_str())
}

pub fn crypto_key_file(usr_id: UserId, req_seq: ReqSeq) -> PathBuf {
    request_dir(usr_id, req_seq).join(CRYPTO_KEY_FILENAME)
}

/// Render the filename of segment `idx`: `dataseg_` + zero-padded index.
pub fn segment_filename(idx: u32) -> String {
    format!(
        "{SEGMENT_FILENAME_PREFIX}{idx:0width$}",
        width = SEGMENT_NUM_DIGITS
    )
}

/// Parse a segment filename back into its index. Returns `None` for names
/// that do not carry the prefix and an all-digit suffix of the expected
/// width.
pub fn parse_segment_filename(name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(SEGMENT_FILENAME_PREFIX)?;
    if suffix.len() != SEGMENT_NUM_DIGITS || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
