//! Key-value store abstraction
//!
//! `RecordStore` is the narrow surface the cache and the ban ledger need from
//! a persistent store: opaque values, key enumeration by prefix, string sets
//! and field hashes. Every call is atomic on its own; nothing here spans
//! multiple calls.

/// Persistent key-value store used by the cache and the ban ledger
pub trait RecordStore: Send + Sync {
    /// Fetch the value stored at `key`, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` at `key`, overwriting any previous value
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Enumerate value keys starting with `prefix`
    ///
    /// The order is stable for one scan (insertion order for the bundled
    /// stores), but callers must not rely on any particular ordering.
    fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Add `member` to the set at `key`; returns `true` if it was not present
    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove `member` from the set at `key`; returns `true` if it was present
    fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of the set at `key` (empty when absent)
    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Set several fields of the hash at `key`
    fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// All fields of the hash at `key`, ordered by field name
    fn get_fields(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Delete whatever is stored at `key` (value, set or hash)
    fn delete_key(&self, key: &str) -> Result<bool, StoreError>;
}

/// Errors raised by a `RecordStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached (cannot open, locked, I/O failure)
    Unavailable(String),
    /// The store answered but the operation failed
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Backend(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull => StoreError::Unavailable(e.to_string()),
                _ => StoreError::Backend(e.to_string()),
            },
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Store unavailable: connection refused");

        let err = StoreError::Backend("constraint failed".to_string());
        assert!(err.to_string().contains("constraint failed"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StoreError::from(busy), StoreError::Unavailable(_)));

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(StoreError::from(other), StoreError::Backend(_)));
    }
}
