//! Network record codec
//!
//! A `NetworkRecord` is what the store holds under a `cidr:` key: the
//! country code, the time of the last successful resolution, the network it
//! belongs to, and whatever else the resolver reported. Records are stored
//! as JSON bytes.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::{RecordStore, StoreError};
use crate::lens::cidr::storage_key;

/// Timestamp layout of the `updated` field
pub const UPDATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Field names owned by `NetworkRecord` itself; never copied into `extra`
pub const RESERVED_FIELDS: &[&str] = &["asn_country_code", "updated", "cidr"];

/// Cached WHOIS/ASN metadata for one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Country code of the originating AS, if known
    #[serde(default)]
    pub asn_country_code: Option<String>,
    /// Time of the last successful external resolution
    #[serde(with = "updated_format")]
    pub updated: DateTime<Utc>,
    /// Network this record is stored under
    pub cidr: IpNet,
    /// Resolver-provided pass-through fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetworkRecord {
    /// Create a record; `updated` is truncated to whole seconds
    pub fn new(cidr: IpNet, asn_country_code: Option<String>, updated: DateTime<Utc>) -> Self {
        Self {
            asn_country_code,
            updated: updated.trunc_subsecs(0),
            cidr,
            extra: Map::new(),
        }
    }

    /// Add a pass-through field; reserved field names are ignored
    pub fn with_extra(mut self, field: &str, value: Value) -> Self {
        if !RESERVED_FIELDS.contains(&field) {
            self.extra.insert(field.to_string(), value);
        }
        self
    }

    /// Storage key this record belongs under
    pub fn storage_key(&self) -> String {
        storage_key(&self.cidr)
    }

    /// Whether the record is at least `threshold` old at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.updated) >= threshold
    }
}

mod updated_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(super::UPDATED_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_updated(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid updated timestamp '{}'", text))
        })
    }
}

/// Parse an `updated` timestamp, accepting RFC 3339 as well
pub fn parse_updated(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, UPDATED_FORMAT)
        .map(|dt| dt.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

// =============================================================================
// Codec
// =============================================================================

/// Serialize a record to its stored payload
pub fn encode(record: &NetworkRecord) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(record).map_err(|e| EncodeError(e.to_string()))
}

/// Deserialize a stored payload
pub fn decode(bytes: &[u8]) -> Result<NetworkRecord, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    serde_json::from_slice(bytes).map_err(|e| DecodeError::Invalid(e.to_string()))
}

/// Outcome of reading a record from the store
#[derive(Debug, Clone, PartialEq)]
pub enum RecordLookup {
    Found(NetworkRecord),
    /// Nothing stored under the key
    NotFound,
    /// Something is stored but it is not a valid record
    Corrupt { raw: Vec<u8>, error: DecodeError },
}

/// Read and decode the record stored at `key`
pub fn fetch(store: &dyn RecordStore, key: &str) -> Result<RecordLookup, StoreError> {
    let lookup = match store.get(key)? {
        None => RecordLookup::NotFound,
        Some(raw) => match decode(&raw) {
            Ok(record) => RecordLookup::Found(record),
            Err(error) => RecordLookup::Corrupt { raw, error },
        },
    };
    Ok(lookup)
}

/// Errors decoding a stored payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length payload
    Empty,
    /// Payload is not a valid record encoding
    Invalid(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "Empty record payload"),
            DecodeError::Invalid(e) => write!(f, "Invalid record payload: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Error serializing a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError(pub String);

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to encode record: {}", self.0)
    }
}

impl std::error::Error for EncodeError {}

// =============================================================================
// Tests
// =============================================================================
