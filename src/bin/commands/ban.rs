use anyhow::Result;
use cidrcache::{BanLedger, CidrCacheConfig};
use clap::Args;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;

use super::{open_lens, print_json};

/// Arguments for the Ban command
#[derive(Args)]
pub struct BanArgs {
    /// Jail the ban was issued in, e.g. sshd
    #[clap()]
    pub jail: String,

    /// Banned address
    #[clap()]
    pub ip: IpAddr,
}

/// Arguments for the Unban command
#[derive(Args)]
pub struct UnbanArgs {
    /// Jail the address is released from
    #[clap()]
    pub jail: String,

    /// Released address
    #[clap()]
    pub ip: IpAddr,
}

fn ledger(config: &CidrCacheConfig) -> Result<BanLedger> {
    Ok(BanLedger::new(Arc::new(open_lens(config)?)))
}

pub fn run_ban(config: &CidrCacheConfig, args: BanArgs, json: bool) -> Result<()> {
    let ban = ledger(config)?.ban(&args.jail, args.ip, chrono::Utc::now())?;

    if json {
        print_json(&ban)?;
    } else {
        println!("{}\t{}\t{}\t{}", ban.id, ban.jail, ban.ip, ban.country);
    }
    Ok(())
}

pub fn run_unban(config: &CidrCacheConfig, args: UnbanArgs, json: bool) -> Result<()> {
    let removed = ledger(config)?.unban(&args.jail, args.ip)?;

    if json {
        print_json(&json!({"ip": args.ip, "jail": args.jail, "removed": removed}))?;
    } else {
        println!("removed {} ban(s) of {}", removed, args.ip);
    }
    Ok(())
}
