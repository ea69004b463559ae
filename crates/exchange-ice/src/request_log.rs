//! CSV audit trail of every venue request.
//!
//! Format: `timestamp,method,endpoint,status,success`

use chrono::Local;
use ice_risk_core::TIMESTAMP_FORMAT;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Header row written when the log file is created.
pub const REQUEST_LOG_HEADER: [&str; 5] = ["timestamp", "method", "endpoint", "status", "success"];

/// Append-only request log.
#[derive(Debug, Clone)]
pub struct RequestLog {
    path: PathBuf,
}

impl RequestLog {
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
    /// `status` is empty when the request never got a response.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or written.
    pub fn append(
        &self,
        method: &str,
        endpoint: &str,
        status: Option<u16>,
        success: bool,
    ) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let new_file = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if new_file {
            writer.write_record(REQUEST_LOG_HEADER).map_err(io::Error::other)?;
        }

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let status = status.map(|s| s.to_string()).unwrap_or_default();
        writer
            .write_record([
                timestamp.as_str(),
                method.to_uppercase().as_str(),
                endpoint,
                status.as_str(),
                if success { "true" } else { "false" },
            ])
            .map_err(io::Error::other)?;
        writer.flush()
    }
}
