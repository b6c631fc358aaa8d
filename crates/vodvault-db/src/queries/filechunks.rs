//! File-chunk queries and part-number validation.

use rusqlite::Connection;
use vodvault_common::{Error, ReqSeq, Result, UserId};

use crate::models::FileChunk;

/// Record a received chunk. Re-uploading the same part number replaces the
/// previous record.
pub fn upsert_chunk(
    conn: &Connection,
    usr_id: UserId,
    req_seq: ReqSeq,
    part: u16,
    checksum: &str,
    size_bytes: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO upload_filechunk (usr_id, req_seq, part, checksum, size_bytes)
         VALUES (:usr_id, :req_seq, :part, :checksum, :size_bytes)
         ON CONFLICT(usr_id, req_seq, part)
         DO UPDATE SET checksum = excluded.checksum, size_bytes = excluded.size_bytes",
        rusqlite::named_params! {
            ":usr_id": usr_id.as_u32(),
            ":req_seq": req_seq.as_u32(),
            ":part": part,
            ":checksum": checksum,
            ":size_bytes": size_bytes as i64,
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// List the chunks of one request ordered by part number.
pub fn list_parts(conn: &Connection, usr_id: UserId, req_seq: ReqSeq) -> Result<Vec<FileChunk>> {
    let mut stmt = conn
        .prepare(
            "SELECT part, checksum, size_bytes FROM upload_filechunk
             WHERE usr_id = :usr_id AND req_seq = :req_seq
             ORDER BY part ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::named_params! {
                ":usr_id": usr_id.as_u32(),
                ":req_seq": req_seq.as_u32(),
            },
            |row| {
                Ok(FileChunk {
                    usr_id,
                    req_seq,
                    part: row.get(0)?,
                    checksum: row.get(1)?,
                    size_bytes: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Total bytes of all chunks a user currently holds, committed or not.
/// Used for quota enforcement on the upload path.
pub fn total_bytes_for_user(conn: &Connection, usr_id: UserId) -> Result<u64> {
    conn.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM upload_filechunk
         WHERE usr_id = :usr_id",
        rusqlite::named_params! { ":usr_id": usr_id.as_u32() },
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .map_err(|e| Error::database(e.to_string()))
}

/// Verify that part numbers form a dense 1..=N sequence with no gaps or
/// duplicates. The chunk list must be ordered by part number.
pub fn validate_dense(chunks: &[FileChunk]) -> std::result::Result<u16, String> {
    if chunks.is_empty() {
        return Err("upload request holds no chunks".into());
    }
    for (idx, chunk) in chunks.iter().enumerate() {
        let expected = (idx + 1) as u16;
        if chunk.part != expected {
            return Err(format!(
                "part numbers must be contiguous from 1: expected {expected}, found {}",
                chunk.part
            ));
        }
    }
    Ok(chunks.len() as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    fn chunk(part: u16) -> FileChunk {
        FileChunk {
            usr_id: UserId::new(1),
            req_seq: ReqSeq::new(9).unwrap(),
            part,
            checksum: "00".into(),
            size_bytes: 1,
        }
    }

    #[test]
    fn test_validate_dense_accepts_contiguous() {
        assert_eq!(validate_dense(&[chunk(1), chunk(2), chunk(3)]), Ok(3));
        assert_eq!(validate_dense(&[chunk(1)]), Ok(1));
    }

    #[test]
    fn test_validate_dense_rejects_gap_and_dup_and_offset() {
        assert!(validate_dense(&[chunk(1), chunk(3)]).is_err());
        assert!(validate_dense(&[chunk(1), chunk(1), chunk(2)]).is_err());
        assert!(validate_dense(&[chunk(2), chunk(3)]).is_err());
        assert!(validate_dense(&[]).is_err());
    }

    #[test]
    fn test_upsert_replaces_and_quota_sums() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let usr = UserId::new(3);
        let seq = ReqSeq::new(0xbeef).unwrap();

        upsert_chunk(&conn, usr, seq, 1, "aa", 10).unwrap();
        upsert_chunk(&conn, usr, seq, 2, "bb", 20).unwrap();
        upsert_chunk(&conn, usr, seq, 1, "cc", 5).unwrap();

        let parts = list_parts(&conn, usr, seq).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].checksum, "cc");
        assert_eq!(parts[0].size_bytes, 5);
        assert_eq!(total_bytes_for_user(&conn, usr).unwrap(), 25);
    }
}
