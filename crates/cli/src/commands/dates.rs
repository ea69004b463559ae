use anyhow::Result;
use clap::Args;
use ice_risk_core::{generate_dates, Frequency, DATE_FORMAT};

/// Arguments for the dates command.
#[derive(Args, Debug, Clone)]
pub struct DatesArgs {
    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// day, week, month, quarter or year
    #[arg(long, default_value = "day")]
    pub frequency: Frequency,

    /// strftime output format
    #[arg(long, default_value = DATE_FORMAT)]
    pub format: String,
}

/// Prints the weekdays between `start` and `end`, one per line.
///
/// # Errors
/// Returns an error for unparseable dates or an inverted range.
pub fn run_dates(args: DatesArgs) -> Result<()> {
    let dates = generate_dates(args.start, args.end, args.frequency, &args.format)?;
    for date in &dates {
        println!("{date}");
    }
    tracing::debug!(count = dates.len(), "Generated dates");
    Ok(())
}
