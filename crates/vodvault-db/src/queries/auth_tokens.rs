//! Bearer-token queries. Only the SHA-256 of a token touches the database.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use vodvault_common::{Error, Result, UserId};

/// Hex SHA-256 of a raw token string.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Store a token for a user. The raw token is hashed before insertion.
pub fn issue_token(
    conn: &Connection,
    usr_id: UserId,
    token: &str,
    label: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO auth_tokens (token_hash, usr_id, label) VALUES (:hash, :usr_id, :label)",
        rusqlite::named_params! {
            ":hash": hash_token(token),
            ":usr_id": usr_id.as_u32(),
            ":label": label,
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Resolve a raw token to its user, honoring expiry. `None` when the token
/// is unknown or expired.
pub fn lookup_token(conn: &Connection, token: &str) -> Result<Option<UserId>> {
    let row = conn
        .query_row(
            "SELECT usr_id, expires_at FROM auth_tokens WHERE token_hash = :hash",
            rusqlite::named_params! { ":hash": hash_token(token) },
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(row.and_then(|(usr_id, expires_at)| {
        if let Some(expiry) = expires_at {
            let valid = chrono::DateTime::parse_from_rfc3339(&expiry)
                .map(|dt| dt.with_timezone(&Utc) > Utc::now())
                .unwrap_or(false);
            if !valid {
                return None;
            }
        }
        Some(UserId::new(usr_id))
    }))
}
