//! Result cache inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use ice_risk_core::AppConfig;
use ice_risk_data::ResultCache;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Cache directory (defaults to storage.results_cache_dir)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Print the cached results of a calculation
    Show {
        #[arg(long)]
        id: String,
    },
}

/// Runs a cache command.
///
/// # Errors
/// Returns an error for an invalid id or an unreadable cache entry.
pub fn run_cache(args: CacheArgs, config: &AppConfig) -> Result<()> {
    let dir = args
        .dir
        .unwrap_or_else(|| config.storage.results_cache_dir.clone());
    let cache = ResultCache::new(dir);

    match args.command {
        CacheCommand::Show { id } => match cache.load(&id)? {
            Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
            None => println!("No cached results for calculation {id}"),
        },
    }

    Ok(())
}
