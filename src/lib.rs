#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! cidrcache - a network-keyed WHOIS cache
//!
//! cidrcache answers "which country does this address belong to" for a
//! stream of addresses (typically the offenders of an intrusion-prevention
//! daemon) while calling the external WHOIS/RDAP service as rarely as
//! possible. Answers are cached per network rather than per address: once
//! `8.8.8.8` has been resolved to `8.8.8.0/24`, every other address in that
//! network is answered from the store until the record goes stale.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `cli` | The `cidrcache` binary (default) | `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! cidrcache = { version = "0.1", default-features = false }
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: persistent key-value store
//!   - `core`: SQLite connection management and schema definitions
//!   - `SqliteStore` / `MemoryStore`: `RecordStore` implementations
//!
//! - **[`lens`]**: cache logic
//!   - `record`: network record codec
//!   - `cidr`: in-memory CIDR index with first-match-wins containment
//!   - `rdap`: external WHOIS resolver
//!   - `whois`: lookup/refresh coordinator
//!   - `ban`: ban/unban ledger
//!
//! - **[`config`]**: configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cidrcache::{CidrCacheConfig, RdapResolver, SqliteStore, WhoisLens};
//! use std::sync::Arc;
//!
//! let config = CidrCacheConfig::new(&None)?;
//! let store = Arc::new(SqliteStore::open(&config.sqlite_path())?);
//! let resolver = Arc::new(RdapResolver::new(
//!     &config.rdap_url,
//!     &config.asn_api_url,
//!     config.request_timeout(),
//! ));
//!
//! let lens = WhoisLens::open(store, resolver)?
//!     .with_options(config.lookup_options())
//!     .with_staleness(config.staleness());
//!
//! // First call resolves and caches 8.8.8.0/24
//! assert_eq!(lens.resolve("8.8.8.8".parse()?), Some("US".to_string()));
//! // Second call is answered from the cache
//! assert_eq!(lens.resolve("8.8.8.9".parse()?), Some("US".to_string()));
//! ```
//!
//! ## Ban bookkeeping
//!
//! ```rust,ignore
//! use cidrcache::BanLedger;
//!
//! let ledger = BanLedger::new(Arc::new(lens));
//! let ban = ledger.ban("sshd", "203.0.113.7".parse()?, chrono::Utc::now())?;
//! println!("{} banned from {} ({})", ban.ip, ban.country, ban.id);
//! ```

pub mod config;
pub mod database;
pub mod lens;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, get_store_info, CidrCacheConfig, StoreInfo};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    DatabaseConn, MemoryStore, RecordStore, SchemaDefinitions, SchemaManager, SchemaStatus,
    SqliteStore, StoreError, SCHEMA_VERSION,
};

// =============================================================================
// Lenses
// =============================================================================

pub use lens::ban::{BanLedger, BanRecord};
pub use lens::cidr::{CidrEntry, CidrIndex, ParseError};
pub use lens::rdap::{LookupOptions, RdapResolver, ResolveError, WhoisResolver, WhoisResponse};
pub use lens::record::{DecodeError, EncodeError, NetworkRecord, RecordLookup};
pub use lens::whois::{CacheError, LensStatsSnapshot, Resolution, ResolutionSource, WhoisLens};
