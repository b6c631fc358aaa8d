//! Stream-element serving.
//!
//! Every request names an element of a committed resource through the
//! `detail` query parameter: the merged master playlist, one variant's
//! rewritten media playlist, one encrypted segment, the variant init map,
//! or the crypto key. This module drives the sans-I/O engines in
//! `vodvault-media` over storage reads and produces response bodies.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;
use vodvault_common::{layout, ReqSeq, UserId, VersionId};
use vodvault_media::keystore::VersionMetadata;
use vodvault_media::{
    KeyEntry, KeyStore, MasterPlaylistMerger, MediaPlaylistRewriter, SegmentEncryptor, StreamUrl,
};
use vodvault_storage::{read_to_vec, AsyncStorage, EntryType, OpenFlags, StorageError};

/// Errors on the stream-element path, translated to HTTP by the handler.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("storage failure: {0}")]
    Storage(StorageError),
    #[error(transparent)]
    Media(#[from] vodvault_media::Error),
}

impl From<StorageError> for StreamError {
    fn from(e: StorageError) -> Self {
        if e.is_not_found() {
            Self::NotFound(e.to_string())
        } else {
            Self::Storage(e)
        }
    }
}

/// One parsed `detail` keyword. Every per-variant element carries its
/// version, the crypto key included: rewritten playlists name the variant
/// in the key URI so the endpoint can serve that variant's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDetail {
    MasterPlaylist,
    MediaPlaylist(VersionId),
    InitMap(VersionId),
    Segment(VersionId, String),
    CryptoKey(VersionId),
}

/// Parse the `detail` query parameter into an element selector.
pub fn parse_detail(raw: &str) -> Result<StreamDetail, StreamError> {
    if raw == layout::MASTER_PLAYLIST_FILENAME {
        return Ok(StreamDetail::MasterPlaylist);
    }
    let (ver, name) = raw
        .split_once('/')
        .ok_or_else(|| StreamError::Invalid(format!("unknown stream detail: {raw}")))?;
    let version = VersionId::parse(ver)
        .map_err(|e| StreamError::Invalid(format!("bad version in detail: {e}")))?;
    if name == layout::MEDIA_PLAYLIST_FILENAME {
        Ok(StreamDetail::MediaPlaylist(version))
    } else if name == layout::INIT_MAP_FILENAME {
        Ok(StreamDetail::InitMap(version))
    } else if name == "crypto_key" {
        Ok(StreamDetail::CryptoKey(version))
    } else if layout::parse_segment_filename(name).is_some() {
        Ok(StreamDetail::Segment(version, name.to_string()))
    } else {
        Err(StreamError::Invalid(format!("unknown stream detail: {raw}")))
    }
}

/// Committed version directories of one upload request, in name order.
async fn committed_versions(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
) -> Result<Vec<VersionId>, StreamError> {
    let root = layout::committed_root(usr_id, req_seq);
    let mut cursor = storage
        .scandir(&root)
        .await
        .map_err(|e| match StreamError::from(e) {
            StreamError::NotFound(_) => {
                StreamError::NotFound("resource has no committed versions".into())
            }
            other => other,
        })?;
    let mut versions = Vec::new();
    while let Some(entry) = cursor.next() {
        if entry.entry_type != EntryType::Dir {
            continue;
        }
        if let Ok(version) = VersionId::parse(entry.name.clone()) {
            versions.push(version);
        }
    }
    Ok(versions)
}

/// Build the merged master playlist as a sequence of body chunks.
pub async fn master_playlist_chunks(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    url: StreamUrl,
    read_buf: usize,
) -> Result<Vec<Bytes>, StreamError> {
    let versions = committed_versions(storage, usr_id, req_seq).await?;
    if versions.is_empty() {
        return Err(StreamError::NotFound(
            "resource has no committed versions".into(),
        ));
    }
    let mut merger = MasterPlaylistMerger::new(url);
    let mut chunks = Vec::new();
    for version in &versions {
        let path = layout::committed_dir(usr_id, req_seq, version)
            .join(layout::MASTER_PLAYLIST_FILENAME);
        let fragment = read_to_vec(storage.as_ref(), &path, read_buf).await?;
        let fragment = String::from_utf8(fragment)
            .map_err(|_| StreamError::Invalid("master playlist fragment is not UTF-8".into()))?;
        let chunk = merger.merge_fragment(&fragment, version)?;
        chunks.push(Bytes::from(chunk));
    }
    Ok(chunks)
}

/// Load the key store of one upload request.
async fn load_key_store(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    read_buf: usize,
) -> Result<KeyStore, StreamError> {
    let path = layout::crypto_key_file(usr_id, req_seq);
    let bytes = read_to_vec(storage.as_ref(), &path, read_buf).await?;
    Ok(KeyStore::from_json(&bytes)?)
}

/// Load one variant's metadata document.
async fn load_version_metadata(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: &VersionId,
    read_buf: usize,
) -> Result<VersionMetadata, StreamError> {
    let path = layout::committed_dir(usr_id, req_seq, version)
        .join(layout::VERSION_METADATA_FILENAME);
    let bytes = read_to_vec(storage.as_ref(), &path, read_buf).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StreamError::Invalid(format!("corrupt version metadata: {e}")))
}

/// Resolve the key entry one variant references.
pub async fn variant_key_entry(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: &VersionId,
    read_buf: usize,
) -> Result<KeyEntry, StreamError> {
    let metadata = load_version_metadata(storage, usr_id, req_seq, version, read_buf).await?;
    let store = load_key_store(storage, usr_id, req_seq, read_buf).await?;
    store
        .get(&metadata.key_id)
        .cloned()
        .ok_or(StreamError::NotFound(format!(
            "key id {} absent from key store",
            metadata.key_id
        )))
}

/// Build the rewritten media playlist as a sequence of body chunks.
pub async fn media_playlist_chunks(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: &VersionId,
    url: StreamUrl,
    read_buf: usize,
    out_buf: usize,
) -> Result<Vec<Bytes>, StreamError> {
    let path =
        layout::committed_dir(usr_id, req_seq, version).join(layout::MEDIA_PLAYLIST_FILENAME);
    let src = read_to_vec(storage.as_ref(), &path, read_buf).await?;
    let src = String::from_utf8(src)
        .map_err(|_| StreamError::Invalid("media playlist is not UTF-8".into()))?;
    let key_entry = variant_key_entry(storage, usr_id, req_seq, version, read_buf).await?;

    let mut rewriter = MediaPlaylistRewriter::new(&src, &url, version, &key_entry, out_buf)?;
    let mut chunks = Vec::new();
    while let Some(chunk) = rewriter.next_chunk() {
        chunks.push(Bytes::from(chunk));
    }
    Ok(chunks)
}

/// Raw key bytes served by the crypto-key element, resolved through the
/// named variant's own metadata.
pub async fn crypto_key_bytes(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: &VersionId,
    read_buf: usize,
) -> Result<Vec<u8>, StreamError> {
    let entry = variant_key_entry(storage, usr_id, req_seq, version, read_buf).await?;
    Ok(entry.key.decode()?)
}

fn stream_io_error(e: StorageError) -> io::Error {
    match e {
        StorageError::Os(inner) => inner,
        other => io::Error::other(other.to_string()),
    }
}

/// Open a committed segment and stream it back encrypted with the
/// variant key. The file and cipher are set up before the response
/// starts so setup failures still map to an HTTP status.
pub async fn encrypted_segment_body(
    storage: Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: &VersionId,
    segment_name: &str,
    key_entry: &KeyEntry,
    read_buf: usize,
) -> Result<Body, StreamError> {
    let path = layout::committed_dir(usr_id, req_seq, version).join(segment_name);
    let mut file = storage.open(&path, OpenFlags::read_only()).await?;
    let mut encryptor = SegmentEncryptor::from_entry(key_entry)?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(4);
    let read_buf = read_buf.max(1);
    tokio::spawn(async move {
        let mut buf = vec![0u8; read_buf];
        loop {
            match file.read_at(None, &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let out = encryptor.update(&buf[..n]);
                    if !out.is_empty() && tx.send(Ok(Bytes::from(out))).await.is_err() {
                        // receiver went away; stop reading
                        let _ = file.close().await;
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(stream_io_error(e))).await;
                    let _ = file.close().await;
                    return;
                }
            }
        }
        // trailing padded block carries the final frame
        let final_block = encryptor.finalize();
        let _ = tx.send(Ok(Bytes::from(final_block))).await;
        if let Err(e) = file.close().await {
            tracing::warn!("segment close after stream: {e}");
        }
    });
    Ok(Body::from_stream(ReceiverStream::new(rx)))
}

/// Stream a committed file back without transformation (init maps and
/// non-stream fetches).
pub async fn raw_file_body(
    storage: Arc<dyn AsyncStorage>,
    path: PathBuf,
    read_buf: usize,
) -> Result<Body, StreamError> {
    let mut fetch =
        crate::transcode::fetch::FileFetchProcessor::new(storage, path, read_buf);
    fetch.init().await?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(4);
    tokio::spawn(async move {
        loop {
            match fetch.read_next().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(stream_io_error(e))).await;
                    break;
                }
            }
        }
        if let Err(e) = fetch.deinit().await {
            tracing::warn!("fetch close after stream: {e}");
        }
    });
    Ok(Body::from_stream(ReceiverStream::new(rx)))
}
