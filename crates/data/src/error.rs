//! Error types for the registry, result cache and flattener.
//!
//! Every variant names the tuple, id, or file at fault so failures are
//! actionable without a debugger.

use ice_risk_core::DateError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the local stores and the response flattener.
#[derive(Debug, Error)]
pub enum DataError {
    /// A date or time could not be normalized.
    #[error("invalid date: {0}")]
    InvalidDate(#[from] DateError),

    /// A registry insert collided with an existing `(date, type, fund)` tuple.
    #[error("duplicate calculation record: date={date} type={calc_type} fund={fund}")]
    DuplicateRecord {
        /// Normalized record date.
        date: String,
        /// Calculation type.
        calc_type: String,
        /// Fund.
        fund: String,
    },

    /// A registry insert reused a calculation id already on file.
    #[error("duplicate calculation id: {id}")]
    DuplicateId {
        /// The colliding id.
        id: i64,
    },

    /// The venue returned no instruments, or no response at all.
    #[error("empty result: response has no instruments")]
    EmptyResult,

    /// A response entry did not have the expected shape.
    #[error("malformed response entry {index}: {reason}")]
    MalformedResponse {
        /// Position of the entry in the `instruments` array.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A registry row could not be parsed.
    #[error("malformed registry {path} at line {line}: {reason}")]
    MalformedRegistry {
        /// Registry file.
        path: PathBuf,
        /// 1-based line number, header included.
        line: u64,
        /// Parse failure.
        reason: String,
    },

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// CSV writer failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dataframe construction or group-by failure.
    #[error("frame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
}

impl DataError {
    /// Creates an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a malformed response error.
    pub fn malformed(index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            index,
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by conflicting with data already stored.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateRecord { .. } | Self::DuplicateId { .. })
    }
}

/// Result type alias for data operations.
pub type Result<T> = std::result::Result<T, DataError>;
