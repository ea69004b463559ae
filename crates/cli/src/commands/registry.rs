//! Calculation registry commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ice_risk_core::{AppConfig, TIMESTAMP_FORMAT};
use ice_risk_data::{CalculationRecord, CalculationRegistry, MatchMode};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Registry CSV (defaults to storage.registry_path)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: RegistryCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RegistryCommand {
    /// List recorded calculations
    List {
        #[arg(long = "type")]
        calc_type: Option<String>,
        #[arg(long)]
        fund: Option<String>,
    },
    /// Record a calculation id
    Record {
        #[arg(long)]
        id: i64,
        /// Date or timestamp; defaults to now
        #[arg(long)]
        date: Option<String>,
        #[arg(long = "type")]
        calc_type: String,
        #[arg(long, default_value = "HV")]
        fund: String,
    },
    /// Find the id recorded for a date
    Lookup {
        #[arg(long)]
        date: String,
        #[arg(long = "type")]
        calc_type: String,
        #[arg(long, default_value = "HV")]
        fund: String,
        /// Match on the calendar day only
        #[arg(long)]
        date_only: bool,
    },
    /// Show the most recent record
    Latest {
        #[arg(long = "type")]
        calc_type: String,
        #[arg(long, default_value = "HV")]
        fund: String,
    },
    /// Show the record closest in time to a date
    Closest {
        #[arg(long)]
        date: String,
        #[arg(long = "type")]
        calc_type: String,
        #[arg(long, default_value = "HV")]
        fund: String,
    },
    /// Import a legacy `<date> - ID: .. - Type: .. - Fund: ..` file
    ImportLegacy {
        #[arg(long)]
        path: PathBuf,
    },
}

/// Runs a registry command.
///
/// # Errors
/// Returns an error if the registry cannot be read or written.
pub fn run_registry(args: RegistryArgs, config: &AppConfig) -> Result<()> {
    let path = args
        .registry
        .unwrap_or_else(|| config.storage.registry_path.clone());
    let registry = CalculationRegistry::new(&path);

    match args.command {
        RegistryCommand::List { calc_type, fund } => {
            let records: Vec<CalculationRecord> = registry
                .records()?
                .into_iter()
                .filter(|r| calc_type.as_ref().map_or(true, |t| &r.calc_type == t))
                .filter(|r| fund.as_ref().map_or(true, |f| &r.fund == f))
                .collect();
            print_records(&records);
        }
        RegistryCommand::Record {
            id,
            date,
            calc_type,
            fund,
        } => {
            let record = registry
                .record(id, date, &calc_type, &fund)
                .with_context(|| format!("Failed to record calculation {id}"))?;
            println!("Recorded {}", format_record(&record));
        }
        RegistryCommand::Lookup {
            date,
            calc_type,
            fund,
            date_only,
        } => {
            let mode = if date_only {
                MatchMode::DateOnly
            } else {
                MatchMode::TimeSensitive
            };
            match registry.lookup_exact(date.as_str(), &calc_type, &fund, mode)? {
                Some(id) => println!("{id}"),
                None => println!("No {calc_type} calculation for {fund} at {date}"),
            }
        }
        RegistryCommand::Latest { calc_type, fund } => {
            match registry.lookup_most_recent(&calc_type, &fund)? {
                Some((date, id)) => println!("{id} ({})", date.format(TIMESTAMP_FORMAT)),
                None => println!("No {calc_type} calculation for {fund}"),
            }
        }
        RegistryCommand::Closest {
            date,
            calc_type,
            fund,
        } => match registry.lookup_closest(date.as_str(), &calc_type, &fund)? {
            Some((found, id)) => println!("{id} ({})", found.format(TIMESTAMP_FORMAT)),
            None => println!("No {calc_type} calculation for {fund}"),
        },
        RegistryCommand::ImportLegacy { path: legacy } => {
            let imported = registry
                .import_legacy(&legacy)
                .with_context(|| format!("Failed to import {}", legacy.display()))?;
            println!("Imported {imported} records into {}", path.display());
        }
    }

    Ok(())
}

fn format_record(record: &CalculationRecord) -> String {
    format!(
        "{:<20} {:>10} {:<8} {:<6}",
        record.date.format(TIMESTAMP_FORMAT),
        record.id,
        record.calc_type,
        record.fund
    )
}

fn print_records(records: &[CalculationRecord]) {
    println!("{:<20} {:>10} {:<8} {:<6}", "Date", "ID", "Type", "Fund");
    println!("{}", "-".repeat(48));
    for record in records {
        println!("{}", format_record(record));
    }
    println!("{}", "-".repeat(48));
    println!("{} record(s)", records.len());
}
