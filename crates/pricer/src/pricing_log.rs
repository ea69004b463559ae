//! CSV log of pricing requests.
//!
//! Format: `Date,n_instruments`, where `Date` is the valuation date combined
//! with the wall-clock time of the request.

use crate::error::{PricerError, Result};
use chrono::{Local, NaiveDate};
use ice_risk_core::TIMESTAMP_FORMAT;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const PRICING_LOG_HEADER: [&str; 2] = ["Date", "n_instruments"];

#[derive(Debug, Clone)]
pub struct PricingLog {
    path: PathBuf,
}

impl PricingLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file with a header if needed.
    ///
    /// # Errors
    /// Returns [`PricerError::PricingLog`] if the file cannot be written.
    pub fn append(&self, valuation_date: NaiveDate, n_instruments: usize) -> Result<()> {
        let io_err = |source: std::io::Error| PricerError::PricingLog {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        let new_file = file.metadata().map_err(io_err)?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let stamp = valuation_date
            .and_time(Local::now().time())
            .format(TIMESTAMP_FORMAT)
            .to_string();

        let csv_err = |e: csv::Error| io_err(std::io::Error::other(e));

        if new_file {
            writer.write_record(PRICING_LOG_HEADER).map_err(csv_err)?;
        }
        writer
            .write_record([stamp, n_instruments.to_string()])
            .map_err(csv_err)?;
        writer.flush().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let log = PricingLog::new(dir.path().join("logs").join("pricing.csv"));
        let day = NaiveDate::from_ymd_opt(2025, 7, 25).unwrap();

        log.append(day, 50).unwrap();
        log.append(day, 3).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Date,n_instruments");
        assert!(lines[1].starts_with("2025-07-25 "));
        assert!(lines[1].ends_with(",50"));
        assert!(lines[2].ends_with(",3"));
    }
}
