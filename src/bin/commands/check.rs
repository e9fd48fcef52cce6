use anyhow::Result;
use cidrcache::lens::record::{fetch, RecordLookup};
use cidrcache::{CidrCacheConfig, CidrIndex};
use clap::Args;
use serde_json::{json, Value};
use std::net::IpAddr;

use super::{open_store, print_json};

/// Arguments for the Check command
#[derive(Args)]
pub struct CheckArgs {
    /// Address to look up in the cache
    #[clap()]
    pub ip: IpAddr,
}

/// JSON view of what the cache holds for `ip`
fn report(ip: IpAddr, key: Option<&str>, lookup: Option<&RecordLookup>) -> Value {
    match (key, lookup) {
        (Some(key), Some(RecordLookup::Found(record))) => {
            json!({"ip": ip, "status": "found", "key": key, "record": record})
        }
        (Some(key), Some(RecordLookup::Corrupt { raw, error })) => json!({
            "ip": ip,
            "status": "corrupt",
            "key": key,
            "bytes": raw.len(),
            "error": error.to_string(),
        }),
        (Some(key), _) => json!({"ip": ip, "status": "missing", "key": key}),
        (None, _) => json!({"ip": ip, "status": "not_cached", "key": null}),
    }
}

pub fn run(config: &CidrCacheConfig, args: CheckArgs, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let index = CidrIndex::initialize(store.as_ref())?;

    let Some(key) = index.check(args.ip) else {
        if json {
            print_json(&report(args.ip, None, None))?;
        } else {
            println!("{} is not in any cached network", args.ip);
        }
        return Ok(());
    };

    let lookup = fetch(store.as_ref(), &key)?;
    if json {
        return print_json(&report(args.ip, Some(&key), Some(&lookup)));
    }

    match lookup {
        RecordLookup::Found(record) => {
            let stale = record.is_stale(chrono::Utc::now(), config.staleness());
            println!("Key:       {}", key);
            println!(
                "Country:   {}",
                record.asn_country_code.as_deref().unwrap_or("-")
            );
            println!(
                "Updated:   {}{}",
                record.updated,
                if stale { " (stale)" } else { "" }
            );
        }
        RecordLookup::NotFound => {
            println!("{} is indexed but has no stored record", key);
        }
        RecordLookup::Corrupt { raw, error } => {
            println!("{} holds a corrupt record ({} bytes): {}", key, raw.len(), error);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidrcache::lens::record::decode;

    fn ip() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[test]
    fn test_report_for_every_outcome() {
        let not_cached = report(ip(), None, None);
        assert_eq!(not_cached["status"], "not_cached");
        assert!(not_cached["key"].is_null());

        let missing = report(ip(), Some("cidr:8.8.8.0/24"), Some(&RecordLookup::NotFound));
        assert_eq!(missing["status"], "missing");
        assert_eq!(missing["key"], "cidr:8.8.8.0/24");

        let raw = b"garbage".to_vec();
        let error = decode(&raw).unwrap_err();
        let corrupt = report(
            ip(),
            Some("cidr:8.8.8.0/24"),
            Some(&RecordLookup::Corrupt { raw, error }),
        );
        assert_eq!(corrupt["status"], "corrupt");
        assert_eq!(corrupt["key"], "cidr:8.8.8.0/24");
        assert_eq!(corrupt["bytes"], 7);
    }
}
