use cidrcache::CidrCacheConfig;
use clap::{Parser, Subcommand};
use tracing::Level;

mod commands;

use commands::ban::{BanArgs, UnbanArgs};
use commands::check::CheckArgs;
use commands::config::ConfigArgs;
use commands::index::IndexArgs;
use commands::resolve::ResolveArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.cidrcache/cidrcache.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve addresses to country codes through the cache.
    Resolve(ResolveArgs),

    /// Show the cached record covering an address, without resolving.
    Check(CheckArgs),

    /// List the networks currently in the cache.
    Index(IndexArgs),

    /// Record a ban of an address in a jail.
    Ban(BanArgs),

    /// Remove all recorded bans of an address.
    Unban(UnbanArgs),

    /// Show configuration and database status.
    Config(ConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = match CidrCacheConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let json = cli.json;
    let result = match cli.command {
        Commands::Resolve(args) => commands::resolve::run(&config, args, json),
        Commands::Check(args) => commands::check::run(&config, args, json),
        Commands::Index(args) => commands::index::run(&config, args, json),
        Commands::Ban(args) => commands::ban::run_ban(&config, args, json),
        Commands::Unban(args) => commands::ban::run_unban(&config, args, json),
        Commands::Config(args) => {
            commands::config::run(&config, cli.config.as_deref(), args, json);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
