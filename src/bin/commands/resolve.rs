use anyhow::{anyhow, Result};
use cidrcache::CidrCacheConfig;
use clap::Args;
use std::io::BufRead;
use std::net::IpAddr;

use super::{open_lens, print_json};

/// Arguments for the Resolve command
#[derive(Args)]
pub struct ResolveArgs {
    /// Addresses to resolve; read one per line from stdin when omitted
    #[clap()]
    pub ips: Vec<IpAddr>,

    /// Print lookup counters to stderr when done
    #[clap(long)]
    pub stats: bool,
}

pub fn run(config: &CidrCacheConfig, args: ResolveArgs, json: bool) -> Result<()> {
    let ResolveArgs { ips, stats } = args;
    let lens = open_lens(config)?;

    let ips = if ips.is_empty() {
        read_stdin_ips()?
    } else {
        ips
    };

    for ip in ips {
        match lens.lookup(ip) {
            Ok(resolution) => {
                if json {
                    print_json(&resolution)?;
                } else {
                    println!(
                        "{}\t{}\t{}",
                        ip,
                        resolution.country.as_deref().unwrap_or("-"),
                        resolution.source
                    );
                }
            }
            Err(e) => eprintln!("ERROR: unable to resolve {}: {}", ip, e),
        }
    }

    if stats {
        eprintln!("{}", serde_json::to_string(&lens.stats())?);
    }
    Ok(())
}

fn read_stdin_ips() -> Result<Vec<IpAddr>> {
    let mut ips = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ip = line
            .parse()
            .map_err(|e| anyhow!("invalid address '{}': {}", line, e))?;
        ips.push(ip);
    }
    Ok(ips)
}
