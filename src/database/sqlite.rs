//! SQLite-backed record store
//!
//! A single connection guarded by a mutex; SQLite itself serializes writers
//! across processes sharing the same file.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::database::core::{DatabaseConn, SchemaManager, SchemaStatus};
use crate::database::store::{RecordStore, StoreError};

/// Persistent record store on top of a SQLite database file
pub struct SqliteStore {
    db: Mutex<DatabaseConn>,
}

impl SqliteStore {
    /// Open the store at the specified path
    ///
    /// If the database doesn't exist, it will be created and initialized.
    /// A database written by another schema version is reset: the cached
    /// records can always be fetched again.
    pub fn open(path: &str) -> Result<Self> {
        Self::from_conn(DatabaseConn::open_path(path)?)
    }

    /// Open the store from a data directory
    ///
    /// Uses the standard database file path: `{data_dir}/cidrcache.sqlite3`
    pub fn open_in_dir(data_dir: &str) -> Result<Self> {
        let path = format!("{}/cidrcache.sqlite3", data_dir.trim_end_matches('/'));
        Self::open(&path)
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_conn(DatabaseConn::open_in_memory()?)
    }

    fn from_conn(db: DatabaseConn) -> Result<Self> {
        let schema = SchemaManager::new(&db.conn);

        match schema.check_status()? {
            SchemaStatus::Current => {
                info!("cidrcache database schema is current");
            }
            SchemaStatus::NotInitialized => {
                info!("Initializing cidrcache database schema");
                schema.initialize()?;
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                info!(
                    "cidrcache database schema incompatible (db: v{}, required: v{}), resetting",
                    database_version, required_version
                );
                schema.reset()?;
                schema.initialize()?;
            }
            SchemaStatus::Corrupted => {
                info!("cidrcache database schema corrupted, resetting");
                schema.reset()?;
                schema.initialize()?;
            }
        }

        Ok(Self { db: Mutex::new(db) })
    }

    /// Number of stored values
    pub fn value_count(&self) -> Result<u64> {
        self.lock().table_count("kv_store")
    }

    // A panic while holding the lock cannot leave SQLite half-written
    fn lock(&self) -> MutexGuard<'_, DatabaseConn> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.lock();
        let value = db
            .conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                [key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let db = self.lock();
        // Upsert keeps the rowid, so scan order stays insertion order
        db.conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix_len = prefix.chars().count() as i64;
        let db = self.lock();
        let mut stmt = db
            .conn
            .prepare("SELECT key FROM kv_store WHERE substr(key, 1, ?2) = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![prefix, prefix_len], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let db = self.lock();
        let inserted = db.conn.execute(
            "INSERT OR IGNORE INTO kv_set (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(inserted > 0)
    }

    fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let db = self.lock();
        let removed = db.conn.execute(
            "DELETE FROM kv_set WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(removed > 0)
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let db = self.lock();
        let mut stmt = db
            .conn
            .prepare("SELECT member FROM kv_set WHERE key = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for member in rows {
            members.push(member?);
        }
        Ok(members)
    }

    fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let db = self.lock();
        let tx = db.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)",
            )?;
            for (field, value) in fields {
                stmt.execute(params![key, field, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_fields(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let db = self.lock();
        let mut stmt = db
            .conn
            .prepare("SELECT field, value FROM kv_hash WHERE key = ?1 ORDER BY field")?;
        let rows = stmt.query_map([key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = Vec::new();
        for field in rows {
            fields.push(field?);
        }
        Ok(fields)
    }

    fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        let db = self.lock();
        let tx = db.conn.unchecked_transaction()?;
        let mut removed = 0;
        removed += tx.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        removed += tx.execute("DELETE FROM kv_set WHERE key = ?1", [key])?;
        removed += tx.execute("DELETE FROM kv_hash WHERE key = ?1", [key])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.get("cidr:10.0.0.0/8").unwrap(), None);

        store.set("cidr:10.0.0.0/8", b"\x00\xffbinary").unwrap();
        assert_eq!(
            store.get("cidr:10.0.0.0/8").unwrap(),
            Some(b"\x00\xffbinary".to_vec())
        );

        store.set("cidr:10.0.0.0/8", b"second").unwrap();
        assert_eq!(
            store.get("cidr:10.0.0.0/8").unwrap(),
            Some(b"second".to_vec())
        );
        assert_eq!(store.value_count().unwrap(), 1);
    }

    #[test]
    fn test_scan_keys_by_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("cidr:10.0.0.0/8", b"a").unwrap();
        store.set("other:key", b"b").unwrap();
        store.set("cidr:192.168.0.0/16", b"c").unwrap();
        store.set("cidr_like:1.1.1.0/24", b"d").unwrap();

        let keys = store.scan_keys("cidr:").unwrap();
        assert_eq!(keys, vec!["cidr:10.0.0.0/8", "cidr:192.168.0.0/16"]);
    }

    #[test]
    fn test_scan_order_survives_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("cidr:10.0.0.0/8", b"a").unwrap();
        store.set("cidr:11.0.0.0/8", b"b").unwrap();
        store.set("cidr:10.0.0.0/8", b"a2").unwrap();

        let keys = store.scan_keys("cidr:").unwrap();
        assert_eq!(keys, vec!["cidr:10.0.0.0/8", "cidr:11.0.0.0/8"]);
    }

    #[test]
    fn test_sets() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store.add_to_set("f2b:US", "abc").unwrap());
        assert!(!store.add_to_set("f2b:US", "abc").unwrap());
        assert!(store.add_to_set("f2b:US", "def").unwrap());
        assert_eq!(store.set_members("f2b:US").unwrap(), vec!["abc", "def"]);

        assert!(store.remove_from_set("f2b:US", "abc").unwrap());
        assert!(!store.remove_from_set("f2b:US", "abc").unwrap());
        assert_eq!(store.set_members("f2b:US").unwrap(), vec!["def"]);
        assert!(store.set_members("f2b:missing").unwrap().is_empty());
    }

    #[test]
    fn test_hash_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();

        store
            .set_fields(
                "f2b:abc",
                &[("jail", "sshd".to_string()), ("ip", "1.2.3.4".to_string())],
            )
            .unwrap();
        assert_eq!(
            store.get_fields("f2b:abc").unwrap(),
            vec![
                ("ip".to_string(), "1.2.3.4".to_string()),
                ("jail".to_string(), "sshd".to_string()),
            ]
        );

        assert!(store.delete_key("f2b:abc").unwrap());
        assert!(store.get_fields("f2b:abc").unwrap().is_empty());
        assert!(!store.delete_key("f2b:abc").unwrap());
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        {
            let store = SqliteStore::open_in_dir(data_dir).unwrap();
            store.set("cidr:8.8.8.0/24", b"record").unwrap();
        }

        let store = SqliteStore::open_in_dir(data_dir).unwrap();
        assert_eq!(
            store.get("cidr:8.8.8.0/24").unwrap(),
            Some(b"record".to_vec())
        );
        assert_eq!(store.scan_keys("cidr:").unwrap(), vec!["cidr:8.8.8.0/24"]);
    }
}
