use clap::Parser;
use savesync::sync::config::SyncConfig;
use savesync::sync::engine::{self, Action};
use savesync::sync::result_error::error::Error;
use savesync::sync::result_error::result::Result;
use savesync::sync::result_error::WithMsg;
use savesync::sync::store::seal::TerminalPassphrase;
use savesync::sync::store::{MetaStore, StoreOptions};
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use tracing::error;
use validator::Validate;

/// Per-file incremental backup and restore for program state
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    /// What to do with the configured programs
    #[arg(value_enum)]
    action: Action,

    /// Programs to process; all of them when empty
    programs: Vec<String>,

    /// Re-seal the metadata store under a new passphrase
    #[arg(long)]
    change_key: bool,

    /// Compact the metadata store before running
    #[arg(long)]
    optimize_db: bool,
}

fn run(args: &Args) -> Result<()> {
    let config = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, SyncConfig>(f)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })
        .and_then(|sc| {
            sc.validate()
                .map_err(Error::from)
                .map(|_| sc)
                .with_msg(format!("Config validation failed: {:?}", &args.config))
        })?;

    let options = StoreOptions {
        encrypt: config.encrypt_db,
        change_key: args.change_key,
        optimize: args.optimize_db,
    };
    let store = MetaStore::open(&config.dest, &options, &TerminalPassphrase)?;
    let result = engine::run(&config, &store, args.action, &args.programs);
    // The store is resealed on close even when the run failed.
    store.close().and(result)
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        exit(1);
    }
}
