//! Database module
//!
//! This module provides the persistent key-value store behind the cache:
//!
//! - **core**: SQLite connection wrapper and schema management
//! - **store**: the `RecordStore` trait and its error type
//! - **sqlite**: `SqliteStore`, the on-disk implementation
//! - **memory**: `MemoryStore`, an in-process implementation
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # kv_store / kv_set / kv_hash tables
//! │
//! ├── store           # RecordStore trait, StoreError
//! ├── sqlite          # SqliteStore
//! └── memory          # MemoryStore
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use cidrcache::database::{RecordStore, SqliteStore};
//!
//! let store = SqliteStore::open_in_dir("~/.cidrcache")?;
//! store.set("cidr:8.8.8.0/24", &payload)?;
//! for key in store.scan_keys("cidr:")? {
//!     println!("{}", key);
//! }
//! ```

pub mod core;
mod memory;
mod sqlite;
mod store;

pub use core::{DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{RecordStore, StoreError};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
