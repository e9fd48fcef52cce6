//! Ban ledger lens
//!
//! Bookkeeping for ban events reported by an intrusion-prevention daemon
//! (fail2ban style jails). Every ban gets a random id that is filed under the
//! banned address's country, the jail, the day and the address itself, with
//! the details kept in a field hash:
//!
//! ```text
//! f2b:<country>     set of ban ids
//! f2b:<jail>        set of ban ids
//! f2b:<YYYY-MM-DD>  set of ban ids
//! f2b:<ip>          set of ban ids
//! f2b:<ban id>      hash: jail, ip, country, timestamp
//! ```

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::RecordStore;
use crate::lens::whois::{CacheError, WhoisLens};

/// Namespace of ledger keys
pub const LEDGER_PREFIX: &str = "f2b:";

/// Country recorded when the address cannot be resolved
pub const UNKNOWN_COUNTRY: &str = "XX";

const BAN_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const BAN_ID_LEN: usize = 10;

/// One recorded ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: String,
    pub jail: String,
    pub ip: String,
    pub country: String,
    /// Unix time of the ban
    pub timestamp: i64,
}

impl BanRecord {
    fn fields(&self) -> Vec<(&str, String)> {
        vec![
            ("jail", self.jail.clone()),
            ("ip", self.ip.clone()),
            ("country", self.country.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }

    fn from_fields(id: &str, fields: Vec<(String, String)>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let mut record = BanRecord {
            id: id.to_string(),
            jail: String::new(),
            ip: String::new(),
            country: String::new(),
            timestamp: 0,
        };
        for (field, value) in fields {
            match field.as_str() {
                "jail" => record.jail = value,
                "ip" => record.ip = value,
                "country" => record.country = value,
                "timestamp" => record.timestamp = value.parse().unwrap_or_default(),
                _ => {}
            }
        }
        Some(record)
    }
}

fn ledger_key(name: &str) -> String {
    format!("{}{}", LEDGER_PREFIX, name)
}

/// Random ban id of `[0-9a-z]`
pub fn generate_ban_id() -> String {
    let mut rng = rand::rng();
    (0..BAN_ID_LEN)
        .map(|_| BAN_ID_ALPHABET[rng.random_range(0..BAN_ID_ALPHABET.len())] as char)
        .collect()
}

/// Ban/unban bookkeeping backed by the record store
pub struct BanLedger {
    lens: Arc<WhoisLens>,
}

impl BanLedger {
    /// Ledger writing to the same store the lens caches into
    pub fn new(lens: Arc<WhoisLens>) -> Self {
        Self { lens }
    }

    fn store(&self) -> &dyn RecordStore {
        self.lens.store().as_ref()
    }

    fn country_of(&self, ip: IpAddr) -> String {
        self.lens.resolve(ip).unwrap_or_else(|| {
            warn!("no country info for {}", ip);
            UNKNOWN_COUNTRY.to_string()
        })
    }

    /// Record a ban of `ip` in `jail` at `now`
    pub fn ban(&self, jail: &str, ip: IpAddr, now: DateTime<Utc>) -> Result<BanRecord, CacheError> {
        info!("banning ip {} in {}", ip, jail);
        let record = BanRecord {
            id: generate_ban_id(),
            jail: jail.to_string(),
            ip: ip.to_string(),
            country: self.country_of(ip),
            timestamp: now.timestamp(),
        };

        let store = self.store();
        let day = now.format("%Y-%m-%d").to_string();
        store.add_to_set(&ledger_key(&record.country), &record.id)?;
        store.add_to_set(&ledger_key(jail), &record.id)?;
        store.add_to_set(&ledger_key(&day), &record.id)?;
        store.set_fields(&ledger_key(&record.id), &record.fields())?;
        store.add_to_set(&ledger_key(&record.ip), &record.id)?;

        Ok(record)
    }

    /// Remove every recorded ban of `ip`
    ///
    /// Ids are dropped from their country and jail sets (`jail` plus the
    /// jail each ban was filed under) and their detail hashes are deleted;
    /// the day sets are kept as history. Returns the number of bans removed.
    pub fn unban(&self, jail: &str, ip: IpAddr) -> Result<usize, CacheError> {
        info!("unbanning ip {} in {}", ip, jail);
        let store = self.store();
        let ip_key = ledger_key(&ip.to_string());
        let ids = store.set_members(&ip_key)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut resolved_country = None;
        for id in &ids {
            let hash_key = ledger_key(id);
            let record = BanRecord::from_fields(id, store.get_fields(&hash_key)?);
            let country = match &record {
                Some(record) if !record.country.is_empty() => record.country.clone(),
                _ => resolved_country
                    .get_or_insert_with(|| self.country_of(ip))
                    .clone(),
            };
            store.remove_from_set(&ledger_key(&country), id)?;
            store.remove_from_set(&ledger_key(jail), id)?;
            // bans filed by another jail leave that jail's set too
            if let Some(record) = record.filter(|r| r.jail != jail) {
                store.remove_from_set(&ledger_key(&record.jail), id)?;
            }
            store.delete_key(&hash_key)?;
        }
        store.delete_key(&ip_key)?;

        Ok(ids.len())
    }

    /// Bans currently recorded for `ip`
    pub fn bans(&self, ip: IpAddr) -> Result<Vec<BanRecord>, CacheError> {
        let store = self.store();
        let mut bans = Vec::new();
        for id in store.set_members(&ledger_key(&ip.to_string()))? {
            if let Some(record) = BanRecord::from_fields(&id, store.get_fields(&ledger_key(&id))?) {
                bans.push(record);
            }
        }
        Ok(bans)
    }

    /// Number of ban ids filed under a country, jail or day
    pub fn count(&self, name: &str) -> Result<usize, CacheError> {
        Ok(self.store().set_members(&ledger_key(name))?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::lens::rdap::{LookupOptions, ResolveError, WhoisResolver, WhoisResponse};
    use chrono::TimeZone;

    /// Knows 8.8.0.0/16 only
    struct FixedResolver;

    impl WhoisResolver for FixedResolver {
        fn lookup(&self, addr: IpAddr, _: &LookupOptions) -> Result<WhoisResponse, ResolveError> {
            if addr.to_string().starts_with("8.8.") {
                Ok(WhoisResponse {
                    asn_country_code: Some("US".to_string()),
                    asn_cidr: Some("8.8.0.0/16".to_string()),
                    ..Default::default()
                })
            } else {
                Err(ResolveError::Transport("unreachable".to_string()))
            }
        }
    }

    fn ledger() -> (Arc<MemoryStore>, BanLedger) {
        let store = Arc::new(MemoryStore::new());
        let lens = WhoisLens::open(store.clone(), Arc::new(FixedResolver)).unwrap();
        (store, BanLedger::new(Arc::new(lens)))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_ban_id() {
        let id = generate_ban_id();
        assert_eq!(id.len(), 10);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_ban_id(), generate_ban_id());
    }

    #[test]
    fn test_ban_writes_all_structures() {
        let (store, ledger) = ledger();
        let ban = ledger.ban("sshd", "8.8.8.8".parse().unwrap(), now()).unwrap();

        assert_eq!(ban.country, "US");
        assert_eq!(ban.timestamp, now().timestamp());
        for key in ["f2b:US", "f2b:sshd", "f2b:2024-06-01", "f2b:8.8.8.8"] {
            assert_eq!(store.set_members(key).unwrap(), vec![ban.id.clone()], "{}", key);
        }
        let fields = store.get_fields(&format!("f2b:{}", ban.id)).unwrap();
        assert_eq!(
            fields,
            vec![
                ("country".to_string(), "US".to_string()),
                ("ip".to_string(), "8.8.8.8".to_string()),
                ("jail".to_string(), "sshd".to_string()),
                ("timestamp".to_string(), now().timestamp().to_string()),
            ]
        );
        assert_eq!(ledger.bans("8.8.8.8".parse().unwrap()).unwrap(), vec![ban]);
    }

    #[test]
    fn test_unknown_country() {
        let (_, ledger) = ledger();
        let ban = ledger.ban("sshd", "192.0.2.1".parse().unwrap(), now()).unwrap();
        assert_eq!(ban.country, UNKNOWN_COUNTRY);
        assert_eq!(ledger.count("XX").unwrap(), 1);
    }

    #[test]
    fn test_unban_removes_bookkeeping() {
        let (store, ledger) = ledger();
        let ip: IpAddr = "8.8.4.4".parse().unwrap();
        ledger.ban("sshd", ip, now()).unwrap();
        ledger.ban("sshd", ip, now()).unwrap();
        let other = ledger.ban("sshd", "8.8.8.8".parse().unwrap(), now()).unwrap();
        assert_eq!(ledger.count("US").unwrap(), 3);

        assert_eq!(ledger.unban("sshd", ip).unwrap(), 2);
        assert_eq!(store.set_members("f2b:US").unwrap(), vec![other.id.clone()]);
        assert_eq!(store.set_members("f2b:sshd").unwrap(), vec![other.id]);
        assert!(store.set_members("f2b:8.8.4.4").unwrap().is_empty());
        assert!(ledger.bans(ip).unwrap().is_empty());
        // Day sets keep the history
        assert_eq!(ledger.count("2024-06-01").unwrap(), 3);

        assert_eq!(ledger.unban("sshd", ip).unwrap(), 0);
    }

    #[test]
    fn test_unban_from_other_jail() {
        let (_, ledger) = ledger();
        let ip: IpAddr = "8.8.4.4".parse().unwrap();
        ledger.ban("nginx", ip, now()).unwrap();

        assert_eq!(ledger.unban("sshd", ip).unwrap(), 1);
        assert_eq!(ledger.count("nginx").unwrap(), 0);
        assert_eq!(ledger.count("US").unwrap(), 0);
    }

    #[test]
    fn test_store_failure() {
        let (store, ledger) = ledger();
        store.set_offline(true);
        assert!(ledger.ban("sshd", "8.8.8.8".parse().unwrap(), now()).is_err());
        assert!(ledger.unban("sshd", "8.8.8.8".parse().unwrap()).is_err());
    }
}
