use cidrcache::{format_size, get_store_info, CidrCacheConfig, StoreInfo};
use clap::Args;
use serde::Serialize;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Show the files in the data directory as well
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    staleness_days: i64,
    rdap_url: String,
    asn_api_url: String,
    database: StoreInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileInfo>>,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    name: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<String>,
}

fn list_files(data_dir: &str) -> Vec<FileInfo> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(data_dir) {
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().ok().map(|t| {
                let datetime: chrono::DateTime<chrono::Utc> = t.into();
                datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
            });
            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size_bytes: metadata.len(),
                modified,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

pub fn run(config: &CidrCacheConfig, config_path: Option<&str>, args: ConfigArgs, json: bool) {
    let info = ConfigInfo {
        config_file: CidrCacheConfig::config_file_path(config_path),
        data_dir: config.data_dir.clone(),
        staleness_days: config.staleness_days,
        rdap_url: config.rdap_url.clone(),
        asn_api_url: config.asn_api_url.clone(),
        database: get_store_info(config),
        files: args.verbose.then(|| list_files(&config.data_dir)),
    };

    if json {
        match serde_json::to_string(&info) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing config info: {}", e),
        }
        return;
    }

    println!("Config File:        {}", info.config_file);
    println!("{}", config.summary());
    println!();

    let db = &info.database;
    if !db.exists {
        println!("Database:           not created yet");
    } else {
        println!(
            "Database Size:      {}",
            db.size_bytes.map(format_size).unwrap_or_else(|| "-".to_string())
        );
        match db.schema_version {
            Some(v) if db.schema_initialized => println!("Schema Version:     {}", v),
            _ => println!("Schema Version:     not initialized"),
        }
        if let Some(count) = db.record_count {
            println!("Stored Values:      {}", count);
        }
    }

    if let Some(files) = &info.files {
        println!();
        println!("Files:");
        for file in files {
            println!(
                "  {:<30} {:>10}  {}",
                file.name,
                format_size(file.size_bytes),
                file.modified.as_deref().unwrap_or("-")
            );
        }
    }
}
