//! WHOIS lookup lens
//!
//! `WhoisLens` ties the CIDR index, the record store and a resolver together
//! into one read-through cache: an address inside an indexed network with a
//! fresh record is answered from the store, anything else goes to the
//! resolver and the answer is persisted under the network it belongs to.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::{RecordStore, StoreError};
use crate::lens::cidr::{parse_network, CidrIndex};
use crate::lens::rdap::{LookupOptions, WhoisResolver, WhoisResponse, UNKNOWN_CIDR};
use crate::lens::record::{encode, fetch, EncodeError, NetworkRecord, RecordLookup};

/// Default age after which a record is refreshed
pub const DEFAULT_STALENESS_DAYS: i64 = 14;

/// Time source used to stamp and age records
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// =============================================================================
// Types
// =============================================================================

/// Where a resolution's answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// A fresh record in the store
    Cache,
    /// A new answer from the resolver
    Resolver,
    /// The resolver failed; no answer
    Unavailable,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionSource::Cache => write!(f, "cache"),
            ResolutionSource::Resolver => write!(f, "resolver"),
            ResolutionSource::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Outcome of looking up one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub ip: IpAddr,
    /// ISO country code of the originating AS
    pub country: Option<String>,
    pub source: ResolutionSource,
    /// Storage key of the record that answered (or was written)
    pub key: Option<String>,
    /// Key of an undecodable record found on the way, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupt_key: Option<String>,
}

/// Errors from a cache lookup
#[derive(Debug)]
pub enum CacheError {
    /// The record store failed
    Store(StoreError),
    /// A fresh record could not be serialized
    Encode(EncodeError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Store(e) => write!(f, "{}", e),
            CacheError::Encode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Store(e) => Some(e),
            CacheError::Encode(e) => Some(e),
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        CacheError::Store(e)
    }
}

impl From<EncodeError> for CacheError {
    fn from(e: EncodeError) -> Self {
        CacheError::Encode(e)
    }
}

#[derive(Debug, Default)]
struct LensStats {
    cache_hits: AtomicU64,
    refreshes: AtomicU64,
    resolver_calls: AtomicU64,
    resolver_failures: AtomicU64,
    corrupt_records: AtomicU64,
    unregistrable: AtomicU64,
}

/// Point-in-time copy of the lens counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensStatsSnapshot {
    pub cache_hits: u64,
    /// Records written after a successful resolution
    pub refreshes: u64,
    pub resolver_calls: u64,
    pub resolver_failures: u64,
    pub corrupt_records: u64,
    /// Resolutions with no usable network to store them under
    pub unregistrable: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Network derivation
// =============================================================================

/// Network a resolver answer for `addr` should be cached under
///
/// The announced prefix (`asn_cidr`) is preferred. When it is missing, `NA`
/// or does not cover `addr`, the registry network's comma-separated `cidr`
/// list is searched. Only an entry containing `addr` is usable: a record
/// keyed elsewhere would never be matched for this address.
pub fn derive_network(addr: IpAddr, response: &WhoisResponse) -> Option<IpNet> {
    let covering = |list: &str| {
        list.split(',')
            .filter_map(|c| parse_network(c).ok())
            .find(|net| net.contains(&addr))
    };

    response
        .asn_cidr
        .as_deref()
        .filter(|cidr| cidr.trim() != UNKNOWN_CIDR)
        .and_then(covering)
        .or_else(|| {
            response
                .network
                .as_ref()?
                .cidr
                .as_deref()
                .and_then(covering)
        })
}

/// Build the record stored for a resolver answer
pub fn build_record(
    network: IpNet,
    response: &WhoisResponse,
    updated: DateTime<Utc>,
) -> Result<NetworkRecord, EncodeError> {
    let mut record = NetworkRecord::new(network, response.asn_country_code.clone(), updated);
    let value = serde_json::to_value(response).map_err(|e| EncodeError(e.to_string()))?;
    if let serde_json::Value::Object(fields) = value {
        for (field, value) in fields {
            record = record.with_extra(&field, value);
        }
    }
    Ok(record)
}

// =============================================================================
// Lens
// =============================================================================

/// Read-through WHOIS cache keyed by network
///
/// # Example
///
/// ```rust,ignore
/// use cidrcache::database::SqliteStore;
/// use cidrcache::lens::rdap::RdapResolver;
/// use cidrcache::lens::whois::WhoisLens;
/// use std::sync::Arc;
///
/// let store = Arc::new(SqliteStore::open_in_dir("~/.cidrcache")?);
/// let resolver = Arc::new(RdapResolver::new(rdap_url, asn_api_url, timeout));
/// let lens = WhoisLens::open(store, resolver)?;
///
/// let country = lens.resolve("8.8.8.8".parse()?);
/// ```
pub struct WhoisLens {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn WhoisResolver>,
    index: Arc<CidrIndex>,
    options: LookupOptions,
    staleness: chrono::Duration,
    clock: Clock,
    stats: LensStats,
}

impl WhoisLens {
    /// Create a lens over an already built index
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn WhoisResolver>,
        index: Arc<CidrIndex>,
    ) -> Self {
        Self {
            store,
            resolver,
            index,
            options: LookupOptions::default(),
            staleness: chrono::Duration::days(DEFAULT_STALENESS_DAYS),
            clock: Arc::new(Utc::now),
            stats: LensStats::default(),
        }
    }

    /// Create a lens, building the index from the store's `cidr:` keys
    pub fn open(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn WhoisResolver>,
    ) -> Result<Self, StoreError> {
        let index = Arc::new(CidrIndex::initialize(store.as_ref())?);
        Ok(Self::new(store, resolver, index))
    }

    pub fn with_options(mut self, options: LookupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_staleness(mut self, staleness: chrono::Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Replace the time source (tests pin or advance time through this)
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn index(&self) -> &Arc<CidrIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn staleness(&self) -> chrono::Duration {
        self.staleness
    }

    pub fn stats(&self) -> LensStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LensStatsSnapshot {
            cache_hits: load(&self.stats.cache_hits),
            refreshes: load(&self.stats.refreshes),
            resolver_calls: load(&self.stats.resolver_calls),
            resolver_failures: load(&self.stats.resolver_failures),
            corrupt_records: load(&self.stats.corrupt_records),
            unregistrable: load(&self.stats.unregistrable),
        }
    }

    /// Country code for `addr`, or `None` when it cannot be determined
    ///
    /// Never fails: store errors are logged and reported as `None`.
    pub fn resolve(&self, addr: IpAddr) -> Option<String> {
        match self.lookup(addr) {
            Ok(resolution) => resolution.country,
            Err(e) => {
                error!("lookup of {} failed: {}", addr, e);
                None
            }
        }
    }

    /// Look up `addr`, refreshing from the resolver when needed
    pub fn lookup(&self, addr: IpAddr) -> Result<Resolution, CacheError> {
        let now = (self.clock)();
        let mut corrupt_key = None;

        if let Some(key) = self.index.check(addr) {
            match fetch(self.store.as_ref(), &key)? {
                RecordLookup::Found(record) if !record.is_stale(now, self.staleness) => {
                    bump(&self.stats.cache_hits);
                    debug!("cache hit for {} in {}", addr, key);
                    return Ok(Resolution {
                        ip: addr,
                        country: record.asn_country_code,
                        source: ResolutionSource::Cache,
                        key: Some(key),
                        corrupt_key: None,
                    });
                }
                RecordLookup::Found(record) => {
                    info!("record {} is stale (updated {})", key, record.updated);
                }
                RecordLookup::NotFound => {
                    warn!("indexed key {} has no record in the store", key);
                }
                RecordLookup::Corrupt { raw, error } => {
                    bump(&self.stats.corrupt_records);
                    error!(
                        "corrupt record at {} ({} bytes): {}",
                        key,
                        raw.len(),
                        error
                    );
                    corrupt_key = Some(key);
                }
            }
        }

        self.refresh(addr, now, corrupt_key)
    }

    fn refresh(
        &self,
        addr: IpAddr,
        now: DateTime<Utc>,
        corrupt_key: Option<String>,
    ) -> Result<Resolution, CacheError> {
        info!("getting whois data for {}", addr);
        bump(&self.stats.resolver_calls);

        let response = match self.resolver.lookup(addr, &self.options) {
            Ok(response) => response,
            Err(e) => {
                bump(&self.stats.resolver_failures);
                warn!("could not get whois info for {}: {}", addr, e);
                return Ok(Resolution {
                    ip: addr,
                    country: None,
                    source: ResolutionSource::Unavailable,
                    key: None,
                    corrupt_key,
                });
            }
        };

        let country = response.asn_country_code.clone();
        let Some(network) = derive_network(addr, &response) else {
            bump(&self.stats.unregistrable);
            warn!(
                "no usable network in whois answer for {} (asn_cidr {:?}), not caching",
                addr, response.asn_cidr
            );
            return Ok(Resolution {
                ip: addr,
                country,
                source: ResolutionSource::Resolver,
                key: None,
                corrupt_key,
            });
        };
        let record = build_record(network, &response, now)?;
        let key = record.storage_key();
        self.store.set(&key, &encode(&record)?)?;
        if !self.index.contains_key(&key) {
            self.index.add(&key);
        }
        bump(&self.stats.refreshes);
        info!("updated cidr: {}", network);

        Ok(Resolution {
            ip: addr,
            country,
            source: ResolutionSource::Resolver,
            key: Some(key),
            corrupt_key,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
