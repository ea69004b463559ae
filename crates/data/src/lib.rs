//! Local stores and response shaping for the ICE risk client.
//!
//! This crate provides:
//! - [`CalculationRegistry`]: CSV-backed `(date, type, fund) -> calculation id` lookup
//! - [`ResultCache`]: write-once JSON files keyed by calculation id
//! - [`flatten_response`]: venue response to a polars-backed [`FlatTable`], joined to the request
//! - Strategy group-by and CSV export of flattened tables

pub mod csv_storage;
pub mod error;
pub mod flatten;
pub mod registry;
pub mod result_cache;
pub mod table;

pub use csv_storage::CsvStorage;
pub use error::{DataError, Result};
pub use flatten::{flatten_response, join_instruments, ResponseEntry, ResultItem, JOIN_COLUMNS};
pub use registry::{CalculationRecord, CalculationRegistry, DuplicatePolicy, MatchMode};
pub use result_cache::ResultCache;
pub use table::{aggregate, default_pricer_rules, Aggregation, FlatTable, Row, STRATEGY_KEY};
