//! Removal of version trees across the lifecycle areas.
//!
//! A half-completed transcode leaves a scratch directory in
//! `transcoding/`; replacement and deletion park trees in `discarding/`.
//! The sweep walks `transcoding/` and `discarding/` (and `committed/`
//! when the resource itself is being removed) and deletes every entry
//! matching the active version.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vodvault_common::{layout, ReqSeq, UserId, VersionId};
use vodvault_storage::{AsyncStorage, EntryType, StorageError};

/// Depth-first removal of a directory tree. The storage `rmdir` is
/// non-recursive, so the tree is walked with scandir cursors first.
pub async fn remove_tree(
    storage: &Arc<dyn AsyncStorage>,
    dir: &Path,
) -> Result<(), StorageError> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    let mut to_rmdir: Vec<PathBuf> = Vec::new();

    while let Some(current) = pending.pop() {
        let mut cursor = match storage.scandir(&current).await {
            Ok(cursor) => cursor,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        to_rmdir.push(current.clone());
        while let Some(entry) = cursor.next() {
            let child = current.join(&entry.name);
            match entry.entry_type {
                EntryType::Dir => pending.push(child),
                _ => storage.unlink(&child).await?,
            }
        }
    }
    // children first
    for dir in to_rmdir.into_iter().rev() {
        storage.rmdir(&dir).await?;
    }
    Ok(())
}

/// Sweep the lifecycle areas of one upload request, removing trees that
/// match `version` (or every version when `None`). `committed/` is only
/// touched when `include_committed` is set, i.e. when the resource itself
/// is being discarded.
pub async fn discard_transcoded(
    storage: &Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: Option<&VersionId>,
    include_committed: bool,
) -> Result<(), StorageError> {
    let mut areas = vec![
        layout::transcoding_root(usr_id, req_seq),
        layout::discarding_root(usr_id, req_seq),
    ];
    if include_committed {
        areas.push(layout::committed_root(usr_id, req_seq));
    }
    for area in areas {
        let mut cursor = match storage.scandir(&area).await {
            Ok(cursor) => cursor,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        let mut matched = Vec::new();
        while let Some(entry) = cursor.next() {
            if entry.entry_type != EntryType::Dir {
                continue;
            }
            let hit = match version {
                Some(v) => entry.name == v.as_str(),
                None => true,
            };
            if hit {
                matched.push(area.join(&entry.name));
            }
        }
        for dir in matched {
            tracing::debug!(dir = %dir.display(), "discarding version tree");
            remove_tree(storage, &dir).await?;
        }
    }
    Ok(())
}
