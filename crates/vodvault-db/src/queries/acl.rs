//! Access-control queries: user-level ACL load, diff-based replacement,
//! and the file-level visibility flag.

use rusqlite::{Connection, OptionalExtension};
use vodvault_common::{Error, ResourceId, Result};

use crate::models::{AclCapability, AclEntry};

/// Change set produced by [`build_update_lists`].
///
/// `update_idx` and `delete_idx` index into the existing set; updated
/// entries are mutated in place so the new capabilities are visible to the
/// caller after a save without re-reading.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AclDiff {
    pub inserts: Vec<AclEntry>,
    pub update_idx: Vec<usize>,
    pub delete_idx: Vec<usize>,
}

/// Compute the insert/update/delete lists turning `existing` into
/// `requested`.
///
/// Entries present in both sets are updated in place inside `existing`;
/// entries only in `requested` are inserted; entries only in `existing`
/// are deleted. For unique user ids this guarantees
/// `inserts.len() + update_idx.len() == requested.len()` and
/// `update_idx.len() + delete_idx.len() == existing.len()`.
pub fn build_update_lists(existing: &mut [AclEntry], requested: &[AclEntry]) -> AclDiff {
    let mut diff = AclDiff::default();
    let mut matched = vec![false; requested.len()];

    for (idx, origin) in existing.iter_mut().enumerate() {
        let mut found = false;
        for (jdx, req) in requested.iter().enumerate() {
            if req.usr_id == origin.usr_id {
                origin.capability = req.capability;
                matched[jdx] = true;
                diff.update_idx.push(idx);
                found = true;
                break;
            }
        }
        if !found {
            diff.delete_idx.push(idx);
        }
    }
    for (jdx, req) in requested.iter().enumerate() {
        if !matched[jdx] {
            diff.inserts.push(*req);
        }
    }
    diff
}

/// Load the user-level ACL rows of a resource, optionally restricted to
/// one user.
pub fn load_resource_acl(
    conn: &Connection,
    resource_id: &ResourceId,
    usr_id: Option<u32>,
) -> Result<Vec<AclEntry>> {
    let sql = match usr_id {
        None => {
            "SELECT usr_id, transcode_flg, edit_acl_flg FROM file_access_control
             WHERE file_id = :file_id ORDER BY usr_id"
        }
        Some(_) => {
            "SELECT usr_id, transcode_flg, edit_acl_flg FROM file_access_control
             WHERE file_id = :file_id AND usr_id = :usr_id ORDER BY usr_id"
        }
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(e.to_string()))?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(AclEntry {
            usr_id: row.get(0)?,
            capability: AclCapability {
                transcode: row.get::<_, i64>(1)? != 0,
                edit_acl: row.get::<_, i64>(2)? != 0,
            },
        })
    };
    let rows = match usr_id {
        None => stmt.query_map(
            rusqlite::named_params! { ":file_id": resource_id.as_str() },
            map_row,
        ),
        Some(uid) => stmt.query_map(
            rusqlite::named_params! { ":file_id": resource_id.as_str(), ":usr_id": uid },
            map_row,
        ),
    }
    .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Replace the user-level ACL of a resource in a single transaction.
///
/// Computes the diff against `existing` (mutating matched entries in
/// place) and applies the inserts, updates, and deletes atomically.
pub fn save_user_level_acl(
    conn: &mut Connection,
    resource_id: &ResourceId,
    existing: &mut Vec<AclEntry>,
    requested: &[AclEntry],
) -> Result<AclDiff> {
    let diff = build_update_lists(existing, requested);

    let tx = conn
        .transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    for entry in &diff.inserts {
        tx.execute(
            "INSERT INTO file_access_control
                 (file_id, usr_id, transcode_flg, edit_acl_flg)
             VALUES (:file_id, :usr_id, :transcode, :edit_acl)",
            rusqlite::named_params! {
                ":file_id": resource_id.as_str(),
                ":usr_id": entry.usr_id,
                ":transcode": entry.capability.transcode as i64,
                ":edit_acl": entry.capability.edit_acl as i64,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    for &idx in &diff.update_idx {
        let entry = &existing[idx];
        tx.execute(
            "UPDATE file_access_control
             SET transcode_flg = :transcode, edit_acl_flg = :edit_acl
             WHERE file_id = :file_id AND usr_id = :usr_id",
            rusqlite::named_params! {
                ":transcode": entry.capability.transcode as i64,
                ":edit_acl": entry.capability.edit_acl as i64,
                ":file_id": resource_id.as_str(),
                ":usr_id": entry.usr_id,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    for &idx in &diff.delete_idx {
        let entry = &existing[idx];
        tx.execute(
            "DELETE FROM file_access_control
             WHERE file_id = :file_id AND usr_id = :usr_id",
            rusqlite::named_params! {
                ":file_id": resource_id.as_str(),
                ":usr_id": entry.usr_id,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(diff)
}

/// Read the file-level visibility flag. `None` when no row exists.
pub fn get_visibility(conn: &Connection, resource_id: &ResourceId) -> Result<Option<bool>> {
    conn.query_row(
        "SELECT visible_flg FROM file_level_acl WHERE file_id = :file_id",
        rusqlite::named_params! { ":file_id": resource_id.as_str() },
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.map(|n| n != 0))
    .map_err(|e| Error::database(e.to_string()))
}

/// Upsert the file-level visibility flag. Returns whether the stored value
/// changed.
pub fn set_visibility(conn: &Connection, resource_id: &ResourceId, visible: bool) -> Result<bool> {
    let current = get_visibility(conn, resource_id)?;
    if current == Some(visible) {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO file_level_acl (file_id, visible_flg)
         VALUES (:file_id, :visible)
         ON CONFLICT(file_id) DO UPDATE SET visible_flg = excluded.visible_flg",
        rusqlite::named_params! {
            ":file_id": resource_id.as_str(),
            ":visible": visible as i64,
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}
