//! Commands that talk to the venue.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use ice_risk_client::IceClient;
use ice_risk_core::{parse_timestamp, AppConfig, DATE_FORMAT};
use ice_risk_data::CsvStorage;
use ice_risk_pricer::{
    AssetClass, IceCalculator, InstrumentLeg, Pricer, RerunPolicy, Valuation,
};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct ResultsArgs {
    /// Calculation id
    #[arg(long)]
    pub id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct ImArgs {
    /// Valuation date (YYYY-MM-DD)
    #[arg(long)]
    pub date: NaiveDate,

    #[arg(long, default_value = "HV")]
    pub fund: String,

    /// Only print this counterparty's post-IM
    #[arg(long)]
    pub counterparty: Option<String>,

    /// Portfolio-level IM instead of per counterparty
    #[arg(long, conflicts_with = "counterparty")]
    pub portfolio: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MvArgs {
    /// Day to value; latest run when omitted
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Submit a fresh real-time run instead of reading the latest one
    #[arg(long, conflicts_with = "date")]
    pub rerun: bool,

    /// Full payload for the day of this timestamp instead of trade legs
    #[arg(long, conflicts_with_all = ["date", "rerun"])]
    pub total_at: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PriceArgs {
    /// JSON array of instrument legs
    #[arg(long)]
    pub legs: PathBuf,

    /// FX, EQ or Basket
    #[arg(long, default_value = "FX")]
    pub asset_class: AssetClass,

    /// End-of-day valuation date; real-time when omitted
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Aggregate legs per stratid
    #[arg(long)]
    pub strategy: bool,

    /// Output CSV (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Builds the venue client and logs in with the configured credentials.
async fn connect(config: &AppConfig) -> Result<Arc<IceClient>> {
    let client = IceClient::from_app(config).context("Failed to build venue client")?;
    let password = config.venue.password.clone().unwrap_or_default();

    if !client.login(&config.venue.username, &password).await? {
        bail!(
            "Venue rejected credentials for '{}' (set ICE_VENUE__USERNAME / ICE_VENUE__PASSWORD)",
            config.venue.username
        );
    }

    info!(host = client.host(), "Logged in to venue");
    Ok(Arc::new(client))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the results of one calculation.
///
/// # Errors
/// Returns an error if login or the fetch fails.
pub async fn run_results(args: ResultsArgs, config: &AppConfig) -> Result<()> {
    let calculator = IceCalculator::new(connect(config).await?, config);
    let results = calculator.calculation_results(args.id).await?;
    print_json(&results)
}

/// Prints bilateral IM for a day.
///
/// # Errors
/// Returns an error if login, submission or the fetch fails.
pub async fn run_im(args: ImArgs, config: &AppConfig) -> Result<()> {
    let calculator = IceCalculator::new(connect(config).await?, config);

    if args.portfolio {
        return print_json(&calculator.portfolio_im(args.date).await?);
    }

    match args.counterparty {
        Some(name) => match calculator.post_im(args.date, &name).await? {
            Some(im) => println!("{name}: {im}"),
            None => println!("No post-IM for '{name}' on {}", args.date.format(DATE_FORMAT)),
        },
        None => print_json(
            &calculator
                .bilateral_im_by_counterparty(args.date, &args.fund)
                .await?,
        )?,
    }

    Ok(())
}

/// Prints MV and greeks.
///
/// # Errors
/// Returns an error if login, submission or the fetch fails.
pub async fn run_mv(args: MvArgs, config: &AppConfig) -> Result<()> {
    let calculator = IceCalculator::new(connect(config).await?, config);

    let payload = if let Some(at) = args.total_at {
        let at = parse_timestamp(&at).with_context(|| format!("Invalid timestamp '{at}'"))?;
        calculator.total_mv(at).await?
    } else if let Some(date) = args.date {
        calculator.mv_and_greeks_for_day(date).await?
    } else {
        let policy = if args.rerun {
            RerunPolicy::Rerun
        } else {
            RerunPolicy::UseExisting
        };
        calculator.mv_and_greeks_latest(policy).await?
    };

    print_json(&payload)
}

/// Prices the legs in a JSON file and writes the flattened table.
///
/// # Errors
/// Returns an error if the legs cannot be read, login fails or pricing fails.
pub async fn run_price(args: PriceArgs, config: &AppConfig) -> Result<()> {
    let text = fs::read_to_string(&args.legs)
        .with_context(|| format!("Failed to read {}", args.legs.display()))?;
    let legs: Vec<InstrumentLeg> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid instrument legs in {}", args.legs.display()))?;

    let valuation = args
        .date
        .map_or_else(Valuation::real_time, Valuation::end_of_day);
    let pricer = Pricer::new(connect(config).await?, config);

    let table = if args.strategy {
        pricer
            .price_strategy(&legs, args.asset_class, &valuation)
            .await?
            .aggregated
    } else {
        pricer.price(&legs, args.asset_class, &valuation).await?
    };

    match &args.output {
        Some(path) => {
            CsvStorage::write_table(path, &table)?;
            info!(rows = table.height(), path = %path.display(), "Wrote prices");
        }
        None => CsvStorage::write_table_to(std::io::stdout().lock(), &table)?,
    }

    Ok(())
}
