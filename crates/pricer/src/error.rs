use ice_risk_core::DateError;
use ice_risk_data::DataError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the calculation and pricing workflows.
#[derive(Debug, Error)]
pub enum PricerError {
    /// Registry, result cache or flattener failure.
    #[error(transparent)]
    Data(#[from] DataError),

    /// The venue call itself failed (transport, HTTP status, auth).
    #[error(transparent)]
    Venue(#[from] anyhow::Error),

    /// The venue answered without data where a payload was required.
    #[error("venue returned no data for {what}")]
    NoData { what: String },

    /// A submission response carried no usable `calculationId`.
    #[error("venue response for {calc_type} calculation carries no calculationId")]
    MissingCalculationId { calc_type: String },

    /// An instrument leg cannot be turned into a pricing payload.
    #[error("invalid instrument leg {index}: {reason}")]
    InvalidLeg { index: usize, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid date: {0}")]
    InvalidDate(#[from] DateError),

    /// Pricing log could not be written.
    #[error("pricing log {path}: {source}")]
    PricingLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PricerError {
    pub fn no_data(what: impl Into<String>) -> Self {
        Self::NoData { what: what.into() }
    }

    pub fn invalid_leg(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidLeg {
            index,
            reason: reason.into(),
        }
    }

    /// Returns true when the failure came from the venue rather than local state.
    #[must_use]
    pub fn is_venue(&self) -> bool {
        matches!(
            self,
            Self::Venue(_) | Self::NoData { .. } | Self::MissingCalculationId { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PricerError>;
