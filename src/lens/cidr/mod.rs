//! CIDR index lens
//!
//! An insertion-ordered list of known networks and the storage keys their
//! records live under. Containment queries scan the list in order and return
//! the first network that contains the address, so an earlier, wider network
//! wins over a later, narrower one.
//!
//! The list only grows. Entries are never removed, replaced or reordered; a
//! refreshed record is rewritten under its existing key.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::database::{RecordStore, StoreError};

/// Namespace of network record keys in the store
pub const CIDR_KEY_PREFIX: &str = "cidr:";

// =============================================================================
// Keys and parsing
// =============================================================================

/// Storage key of a network's record, e.g. `cidr:8.8.8.0/24`
pub fn storage_key(network: &IpNet) -> String {
    format!("{}{}", CIDR_KEY_PREFIX, network)
}

/// Parse network text in prefix notation
///
/// A bare address is accepted as a host network. Host bits set below the
/// prefix length (`10.0.0.1/8`) are rejected.
pub fn parse_network(text: &str) -> Result<IpNet, ParseError> {
    let text = text.trim();

    let network = if text.contains('/') {
        IpNet::from_str(text).map_err(|e| ParseError::new(text, e.to_string()))?
    } else {
        let addr = IpAddr::from_str(text).map_err(|e| ParseError::new(text, e.to_string()))?;
        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        IpNet::new(addr, max_prefix).map_err(|e| ParseError::new(text, e.to_string()))?
    };

    if network.trunc() != network {
        return Err(ParseError::new(text, "host bits set"));
    }

    Ok(network)
}

/// Parse a `cidr:<network>` storage key back into its network
pub fn parse_storage_key(key: &str) -> Result<IpNet, ParseError> {
    match key.strip_prefix(CIDR_KEY_PREFIX) {
        Some(text) => parse_network(text),
        None => Err(ParseError::new(key, "missing 'cidr:' prefix")),
    }
}

/// Error for network text that cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

impl ParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid network '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Index
// =============================================================================

/// A known network and the key of its stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrEntry {
    pub network: IpNet,
    pub key: String,
}

/// In-memory, append-only index of cached networks
///
/// One instance is built at process start and shared by reference (usually
/// behind an `Arc`) among every caller.
///
/// # Example
///
/// ```rust,ignore
/// use cidrcache::database::SqliteStore;
/// use cidrcache::lens::cidr::CidrIndex;
///
/// let store = SqliteStore::open_in_dir("~/.cidrcache")?;
/// let index = CidrIndex::initialize(&store)?;
///
/// if let Some(key) = index.check("8.8.8.8".parse()?) {
///     println!("cached under {}", key);
/// }
/// ```
#[derive(Debug, Default)]
pub struct CidrIndex {
    entries: RwLock<Vec<CidrEntry>>,
}

impl CidrIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from every `cidr:` key currently in the store
    ///
    /// Keys are appended in the store's enumeration order. Keys that do not
    /// parse into a network are logged and skipped.
    pub fn initialize(store: &dyn RecordStore) -> Result<Self, StoreError> {
        let index = Self::new();
        let keys = store.scan_keys(CIDR_KEY_PREFIX)?;
        let scanned = keys.len();

        for key in keys {
            index.add(&key);
        }

        info!(
            "CIDR index initialized with {} networks ({} keys scanned)",
            index.size(),
            scanned
        );
        Ok(index)
    }

    /// Register a storage key
    ///
    /// Returns `false` (and logs) when the key does not parse; the index is
    /// left untouched in that case.
    pub fn add(&self, key: &str) -> bool {
        let network = match parse_storage_key(key) {
            Ok(network) => network,
            Err(e) => {
                warn!("cannot convert {} to a network: {}", key, e);
                return false;
            }
        };

        let entry = CidrEntry {
            network,
            key: key.to_string(),
        };
        self.write().push(entry);
        debug!("added {} to CIDR index", key);
        true
    }

    /// Storage key of the first indexed network containing `addr`
    pub fn check(&self, addr: IpAddr) -> Option<String> {
        let entries = self.read();
        let found = entries
            .iter()
            .find(|entry| entry.network.contains(&addr))
            .map(|entry| entry.key.clone());

        if let Some(key) = &found {
            debug!("found {} in net {}", addr, key);
        }
        found
    }

    /// Number of indexed networks
    pub fn size(&self) -> usize {
        self.read().len()
    }

    /// Whether `key` has already been registered
    pub fn contains_key(&self, key: &str) -> bool {
        self.read().iter().any(|entry| entry.key == key)
    }

    /// Snapshot of all entries in index order
    pub fn entries(&self) -> Vec<CidrEntry> {
        self.read().clone()
    }

    // Entries are only ever pushed whole, so a poisoned lock still guards a
    // consistent list.
    fn read(&self) -> RwLockReadGuard<'_, Vec<CidrEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<CidrEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use std::sync::Arc;
    use std::thread;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_network() {
        assert_eq!(
            parse_network("8.8.8.0/24").unwrap().to_string(),
            "8.8.8.0/24"
        );
        assert_eq!(parse_network("8.8.8.8").unwrap().to_string(), "8.8.8.8/32");
        assert_eq!(
            parse_network("2001:DB8::/32").unwrap().to_string(),
            "2001:db8::/32"
        );
        assert_eq!(parse_network("::1").unwrap().to_string(), "::1/128");

        assert!(parse_network("8.8.8.1/24").is_err());
        assert!(parse_network("8.8.8.0/33").is_err());
        assert!(parse_network("NA").is_err());
        assert!(parse_network("").is_err());
    }

    #[test]
    fn test_storage_key_round_trip() {
        let network = parse_network("192.0.2.0/24").unwrap();
        let key = storage_key(&network);
        assert_eq!(key, "cidr:192.0.2.0/24");
        assert_eq!(parse_storage_key(&key).unwrap(), network);

        assert!(parse_storage_key("192.0.2.0/24").is_err());
        assert!(parse_storage_key("cidr:None").is_err());
    }

    #[test]
    fn test_check_containment() {
        let index = CidrIndex::new();
        assert!(index.add("cidr:8.8.8.0/24"));
        assert!(index.add("cidr:2001:db8::/32"));

        assert_eq!(index.check(ip("8.8.8.0")), Some("cidr:8.8.8.0/24".into()));
        assert_eq!(index.check(ip("8.8.8.255")), Some("cidr:8.8.8.0/24".into()));
        assert_eq!(index.check(ip("8.8.9.0")), None);
        assert_eq!(index.check(ip("8.8.7.255")), None);

        assert_eq!(
            index.check(ip("2001:db8:ffff::1")),
            Some("cidr:2001:db8::/32".into())
        );
        assert_eq!(index.check(ip("2001:db9::1")), None);
    }

    #[test]
    fn test_check_does_not_cross_families() {
        let index = CidrIndex::new();
        index.add("cidr:0.0.0.0/0");

        assert_eq!(index.check(ip("::1")), None);
        assert_eq!(index.check(ip("1.2.3.4")), Some("cidr:0.0.0.0/0".into()));
    }

    #[test]
    fn test_first_match_wins() {
        let index = CidrIndex::new();
        index.add("cidr:10.0.0.0/8");
        index.add("cidr:10.1.0.0/16");

        // Narrower network added later does not shadow the earlier one
        assert_eq!(index.check(ip("10.1.2.3")), Some("cidr:10.0.0.0/8".into()));

        let index = CidrIndex::new();
        index.add("cidr:10.1.0.0/16");
        index.add("cidr:10.0.0.0/8");
        assert_eq!(index.check(ip("10.1.2.3")), Some("cidr:10.1.0.0/16".into()));
        assert_eq!(index.check(ip("10.2.0.1")), Some("cidr:10.0.0.0/8".into()));
    }

    #[test]
    fn test_add_invalid_key_is_noop() {
        let index = CidrIndex::new();
        index.add("cidr:8.8.8.0/24");
        assert_eq!(index.size(), 1);

        assert!(!index.add("cidr:NA"));
        assert!(!index.add("cidr:8.8.8.1/24"));
        assert!(!index.add("not-a-key"));
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_size_is_monotonic() {
        let index = CidrIndex::new();
        let keys = [
            "cidr:1.0.0.0/8",
            "garbage",
            "cidr:1.0.0.0/8",
            "cidr:300.0.0.0/8",
            "cidr:fe80::/10",
        ];

        let mut last = index.size();
        for key in keys {
            index.add(key);
            assert!(index.size() >= last);
            last = index.size();
        }
        assert_eq!(index.size(), 3);
    }

    #[test]
    fn test_initialize_from_store() {
        let store = MemoryStore::new();
        store.set("cidr:8.8.8.0/24", b"{}").unwrap();
        store.set("f2b:US", b"x").unwrap();
        store.set("cidr:not-a-network", b"{}").unwrap();
        store.set("cidr:1.1.1.0/24", b"{}").unwrap();

        let index = CidrIndex::initialize(&store).unwrap();
        assert_eq!(index.size(), 2);
        assert_eq!(
            index
                .entries()
                .iter()
                .map(|e| e.key.as_str())
                .collect::<Vec<_>>(),
            vec!["cidr:8.8.8.0/24", "cidr:1.1.1.0/24"]
        );
        assert!(index.contains_key("cidr:1.1.1.0/24"));
        assert!(!index.contains_key("cidr:not-a-network"));
    }

    #[test]
    fn test_initialize_empty_store() {
        let store = MemoryStore::new();
        let index = CidrIndex::initialize(&store).unwrap();
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_initialize_store_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            CidrIndex::initialize(&store),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_concurrent_add_and_check() {
        let index = Arc::new(CidrIndex::new());
        let mut handles = Vec::new();

        for t in 0..8u8 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for i in 0..50u8 {
                    index.add(&format!("cidr:10.{}.{}.0/24", t, i));
                    // Every visible entry is complete
                    for entry in index.entries() {
                        assert_eq!(parse_storage_key(&entry.key).unwrap(), entry.network);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.size(), 8 * 50);
        assert_eq!(
            index.check(ip("10.7.49.1")),
            Some("cidr:10.7.49.0/24".into())
        );
    }
}
