//! Types exchanged with the external WHOIS/RDAP resolver

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Knobs passed to every resolver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOptions {
    /// How many levels of RDAP entities to report (0 = none)
    pub depth: u8,
    /// Extra attempts after the first failed request
    pub retry_count: u32,
    /// Pause before retrying a rate-limited (HTTP 429) request
    pub rate_limit_timeout: Duration,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            retry_count: 1,
            rate_limit_timeout: Duration::from_secs(1),
        }
    }
}

/// Structured resolver answer for one address
///
/// Field names follow the usual RDAP-lookup result layout: the ASN block
/// (`asn`, `asn_cidr`, `asn_country_code`, ...) comes from the BGP origin of
/// the address, `network` from the registry's RDAP record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhoisResponse {
    #[serde(default)]
    pub asn: Option<String>,
    /// Announced prefix covering the address, `"NA"` when unknown
    #[serde(default)]
    pub asn_cidr: Option<String>,
    #[serde(default)]
    pub asn_country_code: Option<String>,
    #[serde(default)]
    pub asn_description: Option<String>,
    #[serde(default)]
    pub network: Option<WhoisNetwork>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Registry network object of an RDAP answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhoisNetwork {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// One or more networks, comma separated
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub start_address: Option<String>,
    #[serde(default)]
    pub end_address: Option<String>,
    #[serde(default)]
    pub entities: Vec<WhoisEntity>,
}

/// Contact object attached to a registry network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisEntity {
    pub handle: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Errors from an external lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The request did not finish within the configured timeout
    Timeout(String),
    /// The server answered with an error status
    Http { status: u16, url: String },
    /// Connection, DNS or TLS failure
    Transport(String),
    /// The answer could not be understood
    InvalidResponse(String),
}

impl ResolveError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Timeout(_) | ResolveError::Transport(_) => true,
            ResolveError::Http { status, .. } => *status == 429 || *status >= 500,
            ResolveError::InvalidResponse(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ResolveError::Http { status: 429, .. })
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Timeout(e) => write!(f, "Lookup timed out: {}", e),
            ResolveError::Http { status, url } => write!(f, "HTTP {} from {}", status, url),
            ResolveError::Transport(e) => write!(f, "Transport error: {}", e),
            ResolveError::InvalidResponse(e) => write!(f, "Invalid response: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}
