//! Committed-resource queries: id verification and the commit
//! insert-or-update.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use vodvault_common::{Error, ReqSeq, ResourceId, Result, UserId};

/// Result of [`verify_resource_id`].
#[derive(Debug, Clone, Default)]
pub struct ResourceCheck {
    pub exists: bool,
    /// More than one row matched the id; the lookup and ownership data
    /// disagree and the resource is unusable until repaired.
    pub dup: bool,
    pub owner_usr_id: u32,
    pub last_upld_req: u32,
    pub media_type: String,
    /// A file-level ACL row exists for the resource.
    pub acl_exists: bool,
    /// The file-level ACL marks the resource public.
    pub acl_visible: bool,
}

impl ResourceCheck {
    /// HTTP status the front-end adapters derive from the flags, when the
    /// flags alone decide the outcome.
    pub fn status_hint(&self) -> Option<u16> {
        if !self.exists {
            Some(404)
        } else if self.dup {
            Some(409)
        } else {
            None
        }
    }
}

/// Look up the uploaded-file row for a resource id, optionally joining the
/// file-level ACL.
pub fn verify_resource_id(
    conn: &Connection,
    resource_id: &ResourceId,
    fetch_acl: bool,
) -> Result<ResourceCheck> {
    let mut stmt = conn
        .prepare(
            "SELECT f.owner_usr_id, f.last_upld_req, f.media_type, a.visible_flg
             FROM uploaded_file f
             LEFT JOIN file_level_acl a ON a.file_id = f.resource_id
             WHERE f.resource_id = :resource_id",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::named_params! { ":resource_id": resource_id.as_str() },
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut check = ResourceCheck {
        exists: !rows.is_empty(),
        dup: rows.len() > 1,
        ..ResourceCheck::default()
    };
    if let Some((owner, upld_req, media_type, visible)) = rows.into_iter().next() {
        check.owner_usr_id = owner;
        check.last_upld_req = upld_req;
        check.media_type = media_type;
        if fetch_acl {
            check.acl_exists = visible.is_some();
            check.acl_visible = visible.unwrap_or(0) != 0;
        }
    }
    Ok(check)
}

/// Outcome of [`commit_resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The resource id was new; a row was inserted.
    Created,
    /// The caller re-committed their own resource; the row now points at
    /// the new upload request.
    Updated,
    /// The id belongs to a different owner.
    NotOwner,
}

/// Insert-or-update the uploaded-file row to point at `req_seq`. Part of
/// the commit transaction; ownership of an existing id is never
/// transferred.
pub fn commit_resource(
    conn: &Connection,
    resource_id: &ResourceId,
    usr_id: UserId,
    req_seq: ReqSeq,
    media_type: &str,
    when: DateTime<Utc>,
) -> Result<CommitOutcome> {
    let existing = verify_resource_id(conn, resource_id, false)?;
    if existing.exists {
        if existing.owner_usr_id != usr_id.as_u32() {
            return Ok(CommitOutcome::NotOwner);
        }
        conn.execute(
            "UPDATE uploaded_file
             SET last_upld_req = :req_seq, media_type = :media_type,
                 time_committed = :when
             WHERE resource_id = :resource_id",
            rusqlite::named_params! {
                ":req_seq": req_seq.as_u32(),
                ":media_type": media_type,
                ":when": when.to_rfc3339(),
                ":resource_id": resource_id.as_str(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
        return Ok(CommitOutcome::Updated);
    }
    conn.execute(
        "INSERT INTO uploaded_file
             (resource_id, owner_usr_id, last_upld_req, media_type, time_committed)
         VALUES (:resource_id, :owner, :req_seq, :media_type, :when)",
        rusqlite::named_params! {
            ":resource_id": resource_id.as_str(),
            ":owner": usr_id.as_u32(),
            ":req_seq": req_seq.as_u32(),
            ":media_type": media_type,
            ":when": when.to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(CommitOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    #[test]
    fn test_commit_then_verify() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let res_id = ResourceId::parse("r8fj3Il").unwrap();
        let usr = UserId::new(426);
        let seq = ReqSeq::new(0x55).unwrap();

        let missing = verify_resource_id(&conn, &res_id, true).unwrap();
        assert!(!missing.exists);
        assert_eq!(missing.status_hint(), Some(404));

        let outcome =
            commit_resource(&conn, &res_id, usr, seq, "image", Utc::now()).unwrap();
        assert_eq!(outcome, CommitOutcome::Created);

        let check = verify_resource_id(&conn, &res_id, true).unwrap();
        assert!(check.exists);
        assert!(!check.dup);
        assert_eq!(check.owner_usr_id, 426);
        assert_eq!(check.last_upld_req, 0x55);
        assert_eq!(check.media_type, "image");
        assert!(!check.acl_exists);
        assert_eq!(check.status_hint(), None);
    }

    #[test]
    fn test_recommit_by_owner_updates() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let res_id = ResourceId::parse("vid001").unwrap();
        let usr = UserId::new(1);

        commit_resource(
            &conn,
            &res_id,
            usr,
            ReqSeq::new(10).unwrap(),
            "video",
            Utc::now(),
        )
        .unwrap();
        let outcome = commit_resource(
            &conn,
            &res_id,
            usr,
            ReqSeq::new(20).unwrap(),
            "video",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
        let check = verify_resource_id(&conn, &res_id, false).unwrap();
        assert_eq!(check.last_upld_req, 20);
    }

    #[test]
    fn test_commit_by_other_user_rejected() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let res_id = ResourceId::parse("r8fj3Il").unwrap();

        commit_resource(
            &conn,
            &res_id,
            UserId::new(1),
            ReqSeq::new(10).unwrap(),
            "image",
            Utc::now(),
        )
        .unwrap();
        let outcome = commit_resource(
            &conn,
            &res_id,
            UserId::new(2),
            ReqSeq::new(11).unwrap(),
            "image",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome, CommitOutcome::NotOwner);
        // ownership unchanged
        let check = verify_resource_id(&conn, &res_id, false).unwrap();
        assert_eq!(check.owner_usr_id, 1);
        assert_eq!(check.last_upld_req, 10);
    }
}
