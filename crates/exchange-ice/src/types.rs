//! Request bodies and response helpers for the venue API.

use serde::Serialize;
use serde_json::Value;

/// Key carrying the calculation id in submission responses.
pub const CALCULATION_ID_KEY: &str = "calculationId";

/// Body of a calculation results request.
///
/// The venue expects `Yes`/`No` strings for the flags and the id as a string
/// even when it is numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalculationResultsRequest {
    #[serde(rename = "calculationId")]
    pub calculation_id: String,
    #[serde(rename = "IncludeCalculationDetails")]
    pub include_calculation_details: YesNo,
    #[serde(rename = "includeResultsInHomeCurrency")]
    pub include_results_in_home_currency: YesNo,
    #[serde(rename = "includeResultsInPortfolioCurrency")]
    pub include_results_in_portfolio_currency: YesNo,
}

impl CalculationResultsRequest {
    /// Request with details and home-currency results, no portfolio-currency results.
    #[must_use]
    pub fn new(calculation_id: impl ToString) -> Self {
        Self {
            calculation_id: calculation_id.to_string(),
            include_calculation_details: YesNo::Yes,
            include_results_in_home_currency: YesNo::Yes,
            include_results_in_portfolio_currency: YesNo::No,
        }
    }
}

/// Venue boolean flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum YesNo {
    Yes,
    No,
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value {
            Self::Yes
        } else {
            Self::No
        }
    }
}

/// Extracts `calculationId` from a submission response.
///
/// Accepts a JSON integer or a numeric string.
#[must_use]
pub fn calculation_id_from(response: &Value) -> Option<i64> {
    match response.get(CALCULATION_ID_KEY)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
