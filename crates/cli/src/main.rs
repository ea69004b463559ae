use anyhow::Context;
use clap::{Parser, Subcommand};
use ice_risk_core::{AppConfig, ConfigLoader};
use std::path::PathBuf;

mod commands;

use commands::{
    CacheArgs, DatesArgs, FlattenArgs, ImArgs, MvArgs, PriceArgs, RegistryArgs, ResultsArgs,
};

#[derive(Parser)]
#[command(name = "ice-risk")]
#[command(about = "ICE risk venue client: calculation registry, results and pricing", long_about = None)]
struct Cli {
    /// Config file (defaults to config/Config.toml + config/Config.json)
    #[arg(short, long, global = true, env = "ICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit the calculation registry
    Registry(RegistryArgs),
    /// Inspect the result cache
    Cache(CacheArgs),
    /// Flatten a saved pricing response into CSV
    Flatten(FlattenArgs),
    /// Generate a range of weekdays
    Dates(DatesArgs),
    /// Fetch the results of a calculation
    Results(ResultsArgs),
    /// Bilateral initial margin for a day
    Im(ImArgs),
    /// Market value and greeks
    Mv(MvArgs),
    /// Price option legs
    Price(PriceArgs),
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => ConfigLoader::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => ConfigLoader::load().context("Failed to load config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Registry(args) => commands::run_registry(args, &config)?,
        Commands::Cache(args) => commands::run_cache(args, &config)?,
        Commands::Flatten(args) => commands::run_flatten(args)?,
        Commands::Dates(args) => commands::run_dates(args)?,
        Commands::Results(args) => commands::run_results(args, &config).await?,
        Commands::Im(args) => commands::run_im(args, &config).await?,
        Commands::Mv(args) => commands::run_mv(args, &config).await?,
        Commands::Price(args) => commands::run_price(args, &config).await?,
    }

    Ok(())
}
