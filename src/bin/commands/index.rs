use anyhow::Result;
use cidrcache::{CidrCacheConfig, CidrIndex};
use clap::Args;

use super::{open_store, print_json};

/// Arguments for the Index command
#[derive(Args)]
pub struct IndexArgs {
    /// Only print the number of indexed networks
    #[clap(long)]
    pub count: bool,
}

pub fn run(config: &CidrCacheConfig, args: IndexArgs, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let index = CidrIndex::initialize(store.as_ref())?;

    if args.count {
        println!("{}", index.size());
        return Ok(());
    }

    let entries = index.entries();
    if json {
        print_json(&entries)?;
    } else {
        for entry in entries {
            println!("{}", entry.network);
        }
    }
    Ok(())
}
