use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::lens::rdap::{LookupOptions, DEFAULT_ASN_API_URL, DEFAULT_RDAP_URL};
use crate::lens::whois::DEFAULT_STALENESS_DAYS;

pub struct CidrCacheConfig {
    /// Path to the directory holding the record database
    pub data_dir: String,

    /// Age in days after which a cached record is refreshed (default: 14)
    pub staleness_days: i64,

    /// Base URL of the RDAP service
    pub rdap_url: String,

    /// URL of the BGP origin lookup API
    pub asn_api_url: String,

    /// Levels of RDAP entities kept in records (default: 1)
    pub lookup_depth: u8,

    /// Extra attempts after a failed request (default: 1)
    pub retry_count: u32,

    /// Pause before retrying a rate-limited request, in seconds (default: 1)
    pub rate_limit_timeout_secs: u64,

    /// Timeout of each HTTP request, in seconds (default: 5)
    pub request_timeout_secs: u64,
}

const EMPTY_CONFIG: &str = r#"### cidrcache configuration file

### directory for the record database
# data_dir = "~/.cidrcache"

### records older than this are refreshed from the resolver
# staleness_days = 14

### resolver endpoints
# rdap_url = "https://rdap.org"
# asn_api_url = "https://api.bgpkit.com/v3/utils/ip"

### resolver behavior
# lookup_depth = 1
# retry_count = 1
# rate_limit_timeout_secs = 1
# request_timeout_secs = 5
"#;

impl Default for CidrCacheConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.cidrcache", home_dir),
            staleness_days: DEFAULT_STALENESS_DAYS,
            rdap_url: DEFAULT_RDAP_URL.to_string(),
            asn_api_url: DEFAULT_ASN_API_URL.to_string(),
            lookup_depth: 1,
            retry_count: 1,
            rate_limit_timeout_secs: 1,
            request_timeout_secs: 5,
        }
    }
}

impl CidrCacheConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<CidrCacheConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.cidrcache/cidrcache.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let cidrcache_dir = format!("{}/.cidrcache", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(cidrcache_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create cidrcache directory: {}", e))?;
                let p = format!("{}/cidrcache.toml", cidrcache_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g., `CIDRCACHE_STALENESS_DAYS=7 cidrcache resolve 8.8.8.8`
        builder = builder.add_source(config::Environment::with_prefix("CIDRCACHE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config, &cidrcache_dir)
    }

    /// Build a configuration from flat string settings
    ///
    /// Missing or unparseable numbers fall back to their defaults; a missing
    /// `data_dir` is `default_dir`, which is created.
    fn from_map(config: &HashMap<String, String>, default_dir: &str) -> Result<CidrCacheConfig> {
        let defaults = CidrCacheConfig::default();

        let data_dir = match config.get("data_dir") {
            Some(p) => expand_home(p),
            None => {
                std::fs::create_dir_all(default_dir)
                    .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
                default_dir.to_string()
            }
        };

        fn parsed<T: std::str::FromStr>(
            config: &HashMap<String, String>,
            key: &str,
            default: T,
        ) -> T {
            config
                .get(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        let staleness_days = parsed(config, "staleness_days", defaults.staleness_days);
        if staleness_days <= 0 {
            return Err(anyhow!("staleness_days must be positive, got {}", staleness_days));
        }

        Ok(CidrCacheConfig {
            data_dir,
            staleness_days,
            rdap_url: config
                .get("rdap_url")
                .cloned()
                .unwrap_or(defaults.rdap_url),
            asn_api_url: config
                .get("asn_api_url")
                .cloned()
                .unwrap_or(defaults.asn_api_url),
            lookup_depth: parsed(config, "lookup_depth", defaults.lookup_depth),
            retry_count: parsed(config, "retry_count", defaults.retry_count),
            rate_limit_timeout_secs: parsed(
                config,
                "rate_limit_timeout_secs",
                defaults.rate_limit_timeout_secs,
            ),
            request_timeout_secs: parsed(
                config,
                "request_timeout_secs",
                defaults.request_timeout_secs,
            ),
        })
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/cidrcache.sqlite3", data_dir)
    }

    /// Get the staleness threshold
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.staleness_days)
    }

    /// Get the HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Options passed to every resolver call
    pub fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            depth: self.lookup_depth,
            retry_count: self.retry_count,
            rate_limit_timeout: Duration::from_secs(self.rate_limit_timeout_secs),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.sqlite_path()),
            format!("Staleness:          {} days", self.staleness_days),
            format!("RDAP URL:           {}", self.rdap_url),
            format!("ASN API URL:        {}", self.asn_api_url),
            format!("Lookup Depth:       {}", self.lookup_depth),
            format!("Retry Count:        {}", self.retry_count),
            format!("Rate Limit Wait:    {} seconds", self.rate_limit_timeout_secs),
            format!("Request Timeout:    {} seconds", self.request_timeout_secs),
        ]
        .join("\n")
    }

    /// Config file read by [`CidrCacheConfig::new`] for the given `--config` value
    pub fn config_file_path(path: Option<&str>) -> String {
        if let Some(path) = path {
            return path.to_string();
        }
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.cidrcache/cidrcache.toml", home_dir)
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}/{}", home.to_string_lossy(), rest),
        _ => path.to_string(),
    }
}

// =============================================================================
// Store Info
// =============================================================================

/// Information about the SQLite record database
#[derive(Debug, Serialize, Clone)]
pub struct StoreInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub schema_initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
}

/// Get SQLite database information
pub fn get_store_info(config: &CidrCacheConfig) -> StoreInfo {
    use crate::database::{DatabaseConn, SchemaManager, SchemaStatus};

    let path = config.sqlite_path();
    let exists = Path::new(&path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&path).ok().map(|m| m.len())
    } else {
        None
    };

    let (schema_initialized, schema_version, record_count) = if exists {
        match DatabaseConn::open_path(&path) {
            Ok(db) => {
                let manager = SchemaManager::new(&db.conn);
                let (initialized, version) = match manager.check_status() {
                    Ok(SchemaStatus::Current) => (true, Some(crate::database::SCHEMA_VERSION)),
                    Ok(SchemaStatus::Incompatible {
                        database_version, ..
                    }) => (true, Some(database_version)),
                    Ok(SchemaStatus::NotInitialized) | Ok(SchemaStatus::Corrupted) | Err(_) => {
                        (false, None)
                    }
                };
                let count = if initialized {
                    db.table_count("kv_store").ok()
                } else {
                    None
                };
                (initialized, version, count)
            }
            Err(_) => (false, None, None),
        }
    } else {
        (false, None, None)
    };

    StoreInfo {
        path,
        exists,
        size_bytes,
        schema_initialized,
        schema_version,
        record_count,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
