//! Database connection pool management.
//!
//! Connection pooling for SQLite using r2d2: pool initialization,
//! per-connection setup, and migrations on first use.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use vodvault_common::{Error, Result};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Initialize a new database pool backed by a file, creating the database
/// and running pending migrations.
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });

    let pool = Pool::builder()
        .max_size(DEFAULT_POOL_SIZE)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;

    run_pool_migrations(&pool)?;
    Ok(pool)
}

/// Initialize an in-memory database pool for testing.
///
/// The pool is limited to a single shared connection: separate in-memory
/// SQLite connections would each see their own empty database.
pub fn init_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create in-memory pool: {e}")))?;

    run_pool_migrations(&pool)?;
    Ok(pool)
}

fn run_pool_migrations(pool: &DbPool) -> Result<()> {
    let conn = pool
        .get()
        .map_err(|e| Error::database(format!("Failed to get connection for migrations: {e}")))?;
    migrations::run_migrations(&conn)
        .map_err(|e| Error::database(format!("Failed to run migrations: {e}")))?;
    Ok(())
}

/// Get a connection from the pool, mapping exhaustion to [`Error::PoolBusy`].
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get().map_err(|_| Error::PoolBusy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory_pool_runs_migrations() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='upload_request'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_memory_pool_shares_state() {
        let pool = init_memory_pool().unwrap();
        {
            let conn = get_conn(&pool).unwrap();
            conn.execute(
                "INSERT INTO auth_tokens (token_hash, usr_id) VALUES (?, ?)",
                rusqlite::params!["abcd", 7],
            )
            .unwrap();
        }
        let conn = get_conn(&pool).unwrap();
        let usr: u32 = conn
            .query_row(
                "SELECT usr_id FROM auth_tokens WHERE token_hash = ?",
                ["abcd"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(usr, 7);
    }
}
