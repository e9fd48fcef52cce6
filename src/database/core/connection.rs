//! SQLite connection for the record store

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits for another process holding the file lock.
/// Ban actions of several jails may fire at the same moment.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to the cache database, tuned for small keyed reads and writes
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open (creating if needed) the database file at `path`
    pub fn open_path(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| anyhow!("Failed to open cache database '{}': {}", path, e))?;
        Self::tuned(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| anyhow!("Failed to create in-memory cache database: {}", e))?;
        Self::tuned(conn)
    }

    fn tuned(conn: Connection) -> Result<Self> {
        // WAL keeps the startup key scan from blocking concurrent record writes
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to enable WAL: {}", e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;
        conn.pragma_update(None, "temp_store", "MEMORY")
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;

        Ok(DatabaseConn { conn })
    }

    /// Number of rows in one of the store tables
    pub fn table_count(&self, table: &str) -> Result<u64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| anyhow!("Failed to count rows of {}: {}", table, e))
    }
}
