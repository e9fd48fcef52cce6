use anyhow::{anyhow, Result};
use cidrcache::{CidrCacheConfig, RdapResolver, SqliteStore, WhoisLens};
use serde::Serialize;
use std::sync::Arc;

pub mod ban;
pub mod check;
pub mod config;
pub mod index;
pub mod resolve;

/// Open the record store named by the configuration
pub(crate) fn open_store(config: &CidrCacheConfig) -> Result<Arc<SqliteStore>> {
    cidrcache::database::ensure_data_dir(&config.data_dir)?;
    let store = SqliteStore::open(&config.sqlite_path())?;
    Ok(Arc::new(store))
}

/// Build the lens over the configured store and resolver
pub(crate) fn open_lens(config: &CidrCacheConfig) -> Result<WhoisLens> {
    let store = open_store(config)?;
    let resolver = Arc::new(RdapResolver::new(
        &config.rdap_url,
        &config.asn_api_url,
        config.request_timeout(),
    ));

    let lens = WhoisLens::open(store, resolver)
        .map_err(|e| anyhow!("Failed to build CIDR index: {}", e))?
        .with_options(config.lookup_options())
        .with_staleness(config.staleness());
    Ok(lens)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
