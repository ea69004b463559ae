//! Date and time normalization.
//!
//! Every registry key, cache lookup and venue payload goes through these
//! helpers so that string comparisons downstream are made on canonical text.
//! Inputs may be "now", typed chrono values, or free-form strings; strings are
//! parsed with the requested format first and ISO-8601 second.
//!
//! # Example
//!
//! ```
//! use ice_risk_core::dates::{normalize_date, DateInput, TIMESTAMP_FORMAT};
//!
//! let day = normalize_date("2025-07-25T14:30:00", "%Y-%m-%d").unwrap();
//! assert_eq!(day, "2025-07-25");
//!
//! let stamp = normalize_date("2025-07-25", TIMESTAMP_FORMAT).unwrap();
//! assert_eq!(stamp, "2025-07-25 00:00:00");
//!
//! let today = normalize_date(DateInput::Now, "%Y-%m-%d").unwrap();
//! assert_eq!(today.len(), 10);
//! ```

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
};
use std::fmt::Write;
use std::str::FromStr;
use thiserror::Error;

/// Calendar-day format used for payload dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Full timestamp format used by the calculation registry.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Time-of-day format used for pricing cut times.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// ISO-8601 layouts tried after the caller's format, most specific first.
const ISO_DATETIME_LAYOUTS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const ISO_DATE_LAYOUTS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];

/// Errors raised while normalizing dates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DateError {
    /// The input string matched neither the requested format nor ISO-8601.
    #[error("unrecognized date format: '{value}'")]
    InvalidFormat {
        /// The rejected input.
        value: String,
    },

    /// The strftime pattern itself is invalid (or needs data a naive value lacks).
    #[error("invalid date pattern: '{pattern}'")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
    },

    /// Unknown date range frequency.
    #[error("unknown frequency '{0}', expected Day, Week, Month, Quarter or Year")]
    UnknownFrequency(String),

    /// The range end precedes its start.
    #[error("empty date range: {start} is after {end}")]
    EmptyRange {
        /// Range start.
        start: String,
        /// Range end.
        end: String,
    },
}

// =============================================================================
// Inputs
// =============================================================================

/// Anything that can be normalized into a date string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    /// The current local date and time.
    Now,
    /// A calendar date; time of day is midnight.
    Date(NaiveDate),
    /// A naive local timestamp.
    DateTime(NaiveDateTime),
    /// Free-form text to parse.
    Text(String),
}

impl From<NaiveDate> for DateInput {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for DateInput {
    fn from(value: DateTime<Tz>) -> Self {
        Self::DateTime(value.naive_local())
    }
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for DateInput {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl<T: Into<DateInput>> From<Option<T>> for DateInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Now, Into::into)
    }
}

/// Anything that can be normalized into a time-of-day string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeInput {
    /// The current local time.
    Now,
    /// A typed time of day.
    Time(NaiveTime),
    /// Text passed through unchanged.
    Text(String),
}

impl From<NaiveTime> for TimeInput {
    fn from(value: NaiveTime) -> Self {
        Self::Time(value)
    }
}

impl From<&str> for TimeInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TimeInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<TimeInput>> From<Option<T>> for TimeInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Now, Into::into)
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalizes a date-like value into its string form in `format`.
///
/// Strings are parsed with `format` first, then as ISO-8601.
///
/// # Errors
/// Returns [`DateError::InvalidFormat`] for unparseable text and
/// [`DateError::InvalidPattern`] for an unusable `format`.
pub fn normalize_date(value: impl Into<DateInput>, format: &str) -> Result<String, DateError> {
    let datetime = to_datetime(value.into(), format)?;
    render(&datetime, format)
}

/// Normalizes a time-of-day value. Strings pass through without validation.
///
/// # Errors
/// Returns [`DateError::InvalidPattern`] if `format` cannot render a time.
pub fn normalize_time(value: impl Into<TimeInput>, format: &str) -> Result<String, DateError> {
    let time = match value.into() {
        TimeInput::Text(text) => return Ok(text),
        TimeInput::Now => Local::now().time(),
        TimeInput::Time(time) => time,
    };

    check_pattern(format)?;
    let mut out = String::new();
    write!(out, "{}", time.format(format)).map_err(|_| DateError::InvalidPattern {
        pattern: format.to_string(),
    })?;
    Ok(out)
}

/// Parses a registry timestamp (or any ISO-8601 date/datetime) into a typed value.
///
/// # Errors
/// Returns [`DateError::InvalidFormat`] if the text is not recognized.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, DateError> {
    parse_text(text, TIMESTAMP_FORMAT)
}

/// Resolves an input to a naive timestamp, parsing text with `format` then ISO-8601.
///
/// # Errors
/// Returns [`DateError::InvalidFormat`] if text cannot be parsed.
pub fn to_datetime(value: DateInput, format: &str) -> Result<NaiveDateTime, DateError> {
    match value {
        DateInput::Now => Ok(Local::now().naive_local()),
        DateInput::Date(date) => Ok(date.and_time(NaiveTime::MIN)),
        DateInput::DateTime(datetime) => Ok(datetime),
        DateInput::Text(text) => parse_text(&text, format),
    }
}

fn parse_text(text: &str, format: &str) -> Result<NaiveDateTime, DateError> {
    let trimmed = text.trim();

    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
        return Ok(datetime);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    parse_iso(trimmed).ok_or_else(|| DateError::InvalidFormat {
        value: text.to_string(),
    })
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.naive_local());
    }
    if let Ok(datetime) = NaiveDateTime::from_str(text) {
        return Some(datetime);
    }

    ISO_DATETIME_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .or_else(|| {
            ISO_DATE_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDate::parse_from_str(text, layout).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

fn check_pattern(format: &str) -> Result<(), DateError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(DateError::InvalidPattern {
            pattern: format.to_string(),
        });
    }
    Ok(())
}

/// Renders a timestamp with a strftime pattern without panicking on bad patterns.
///
/// # Errors
/// Returns [`DateError::InvalidPattern`] if the pattern is malformed or asks for
/// data a naive timestamp does not carry (e.g. `%z`).
pub fn render(datetime: &NaiveDateTime, format: &str) -> Result<String, DateError> {
    check_pattern(format)?;
    let mut out = String::new();
    write!(out, "{}", datetime.format(format)).map_err(|_| DateError::InvalidPattern {
        pattern: format.to_string(),
    })?;
    Ok(out)
}

// =============================================================================
// Date ranges
// =============================================================================

/// Step between generated dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl FromStr for Frequency {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "year" => Ok(Self::Year),
            _ => Err(DateError::UnknownFrequency(s.to_string())),
        }
    }
}

impl Frequency {
    /// Returns the `step`-th date after `start`.
    fn nth_after(self, start: NaiveDate, step: u32) -> Option<NaiveDate> {
        match self {
            Self::Day => start.checked_add_signed(Duration::days(i64::from(step))),
            Self::Week => start.checked_add_signed(Duration::weeks(i64::from(step))),
            Self::Month => start.checked_add_months(Months::new(step)),
            Self::Quarter => start.checked_add_months(Months::new(step.checked_mul(3)?)),
            Self::Year => start.checked_add_months(Months::new(step.checked_mul(12)?)),
        }
    }
}

/// Generates the weekdays between `start` and `end` (inclusive) stepping by `frequency`.
///
/// Month-based steps are taken from `start` (Jan 31 + 1 month = end of February).
/// Saturdays and Sundays are dropped, so a weekend-only range yields an empty list.
///
/// # Errors
/// Returns [`DateError::EmptyRange`] if `end` is before `start`, or a parse error
/// for unrecognized inputs.
pub fn generate_dates(
    start: impl Into<DateInput>,
    end: impl Into<DateInput>,
    frequency: Frequency,
    format: &str,
) -> Result<Vec<String>, DateError> {
    let start = to_datetime(start.into(), DATE_FORMAT)?.date();
    let end = to_datetime(end.into(), DATE_FORMAT)?.date();

    if end < start {
        return Err(DateError::EmptyRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let mut dates = Vec::new();
    let mut step = 0u32;
    while let Some(date) = frequency.nth_after(start, step) {
        if date > end {
            break;
        }
        if date.weekday().number_from_monday() <= 5 {
            dates.push(render(&date.and_time(NaiveTime::MIN), format)?);
        }
        step += 1;
    }

    Ok(dates)
}
