//! Upload-request queries.
//!
//! Creation enforces the per-user active-request limit inside a single
//! transaction; the outcome mirrors the three result codes of the original
//! flow (ok / limit exceeded / database error).

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use vodvault_common::{Error, ReqSeq, Result, UserId};

use crate::models::UploadRequest;

/// A user may hold at most this many uncommitted upload requests.
pub const MAX_NUM_ACTIVE_UPLOAD_REQUESTS: u32 = 3;

/// Outcome of [`create_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateRequestOutcome {
    Created(ReqSeq),
    LimitExceeded { num_active: u32, max_limit: u32 },
}

/// Create a new upload request for `usr_id` under a transaction.
///
/// Counts the user's active (uncommitted) requests; when below the limit a
/// row with a fresh random sequence is inserted, otherwise the current
/// count is reported back.
pub fn create_request(conn: &mut Connection, usr_id: UserId) -> Result<CreateRequestOutcome> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let num_active: u32 = tx
        .query_row(
            "SELECT COUNT(req_seq) FROM upload_request
             WHERE usr_id = :usr_id AND time_committed IS NULL",
            rusqlite::named_params! { ":usr_id": usr_id.as_u32() },
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if num_active >= MAX_NUM_ACTIVE_UPLOAD_REQUESTS {
        return Ok(CreateRequestOutcome::LimitExceeded {
            num_active,
            max_limit: MAX_NUM_ACTIVE_UPLOAD_REQUESTS,
        });
    }

    let mut rng = rand::thread_rng();
    let now = Utc::now().to_rfc3339();
    // retry on the unlikely sequence collision with an existing row
    for _ in 0..8 {
        let req_seq = ReqSeq::random(&mut rng);
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO upload_request (usr_id, req_seq, time_created)
             VALUES (:usr_id, :req_seq, :time_created)",
            rusqlite::named_params! {
                ":usr_id": usr_id.as_u32(),
                ":req_seq": req_seq.as_u32(),
                ":time_created": now,
            },
        );
        match inserted {
            Ok(1) => {
                tx.commit().map_err(|e| Error::database(e.to_string()))?;
                return Ok(CreateRequestOutcome::Created(req_seq));
            }
            Ok(_) => continue,
            Err(e) => return Err(Error::database(e.to_string())),
        }
    }
    Err(Error::database("exhausted req_seq candidates"))
}

/// Fetch one upload request.
pub fn fetch_request(
    conn: &Connection,
    usr_id: UserId,
    req_seq: ReqSeq,
) -> Result<Option<UploadRequest>> {
    conn.query_row(
        "SELECT time_created, time_committed FROM upload_request
         WHERE usr_id = :usr_id AND req_seq = :req_seq",
        rusqlite::named_params! {
            ":usr_id": usr_id.as_u32(),
            ":req_seq": req_seq.as_u32(),
        },
        |row| {
            let created: String = row.get(0)?;
            let committed: Option<String> = row.get(1)?;
            Ok((created, committed))
        },
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))?
    .map(|(created, committed)| {
        let time_created = parse_ts(&created)?;
        let time_committed = committed.as_deref().map(parse_ts).transpose()?;
        Ok(UploadRequest {
            usr_id,
            req_seq,
            time_created,
            time_committed,
        })
    })
    .transpose()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::database(format!("bad timestamp in upload_request: {e}")))
}

/// Stamp an upload request as committed. Used inside the commit
/// transaction.
pub fn mark_committed(
    conn: &Connection,
    usr_id: UserId,
    req_seq: ReqSeq,
    when: DateTime<Utc>,
) -> Result<()> {
    let n = conn
        .execute(
            "UPDATE upload_request SET time_committed = :when
             WHERE usr_id = :usr_id AND req_seq = :req_seq",
            rusqlite::named_params! {
                ":when": when.to_rfc3339(),
                ":usr_id": usr_id.as_u32(),
                ":req_seq": req_seq.as_u32(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    if n == 0 {
        return Err(Error::not_found("upload request"));
    }
    Ok(())
}

/// Number of uncommitted requests a user currently holds.
pub fn count_active(conn: &Connection, usr_id: UserId) -> Result<u32> {
    conn.query_row(
        "SELECT COUNT(req_seq) FROM upload_request
         WHERE usr_id = :usr_id AND time_committed IS NULL",
        rusqlite::named_params! { ":usr_id": usr_id.as_u32() },
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Drop an upload request together with its chunk records (abort path).
pub fn delete_request(conn: &mut Connection, usr_id: UserId, req_seq: ReqSeq) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    tx.execute(
        "DELETE FROM upload_filechunk WHERE usr_id = :usr_id AND req_seq = :req_seq",
        rusqlite::named_params! {
            ":usr_id": usr_id.as_u32(),
            ":req_seq": req_seq.as_u32(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    tx.execute(
        "DELETE FROM upload_request WHERE usr_id = :usr_id AND req_seq = :req_seq",
        rusqlite::named_params! {
            ":usr_id": usr_id.as_u32(),
            ":req_seq": req_seq.as_u32(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    tx.commit().map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    #[test]
    fn test_create_request_until_limit() {
        let pool = init_memory_pool().unwrap();
        let mut conn = pool.get().unwrap();
        let usr = UserId::new(426);

        for _ in 0..MAX_NUM_ACTIVE_UPLOAD_REQUESTS {
            let outcome = create_request(&mut conn, usr).unwrap();
            assert!(matches!(outcome, CreateRequestOutcome::Created(_)));
        }
        assert_eq!(count_active(&conn, usr).unwrap(), 3);

        let outcome = create_request(&mut conn, usr).unwrap();
        assert_eq!(
            outcome,
            CreateRequestOutcome::LimitExceeded {
                num_active: 3,
                max_limit: 3
            }
        );
    }

    #[test]
    fn test_commit_frees_a_slot() {
        let pool = init_memory_pool().unwrap();
        let mut conn = pool.get().unwrap();
        let usr = UserId::new(7);

        let mut seqs = Vec::new();
        for _ in 0..3 {
            match create_request(&mut conn, usr).unwrap() {
                CreateRequestOutcome::Created(seq) => seqs.push(seq),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        mark_committed(&conn, usr, seqs[0], Utc::now()).unwrap();
        assert_eq!(count_active(&conn, usr).unwrap(), 2);
        assert!(matches!(
            create_request(&mut conn, usr).unwrap(),
            CreateRequestOutcome::Created(_)
        ));

        let req = fetch_request(&conn, usr, seqs[0]).unwrap().unwrap();
        assert!(!req.is_active());
    }

    #[test]
    fn test_delete_request_removes_chunks() {
        let pool = init_memory_pool().unwrap();
        let mut conn = pool.get().unwrap();
        let usr = UserId::new(7);
        let seq = match create_request(&mut conn, usr).unwrap() {
            CreateRequestOutcome::Created(seq) => seq,
            other => panic!("unexpected outcome {other:?}"),
        };
        crate::queries::filechunks::upsert_chunk(&conn, usr, seq, 1, "ab", 3).unwrap();

        delete_request(&mut conn, usr, seq).unwrap();
        assert!(fetch_request(&conn, usr, seq).unwrap().is_none());
        assert!(crate::queries::filechunks::list_parts(&conn, usr, seq)
            .unwrap()
            .is_empty());
    }
}
