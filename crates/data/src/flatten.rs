//! Venue response flattener.
//!
//! Turns the `instruments` array of a pricing/risk response into one row per
//! entry, expanding every `{code, value, currency}` result into a `code`
//! column (plus `code_currency`), then re-attaches the originating request's
//! identity columns by `id == ID`.
//!
//! # Example
//!
//! ```
//! use ice_risk_data::flatten::flatten_response;
//! use serde_json::json;
//!
//! let response = json!({"instruments": [{
//!     "id": 1,
//!     "results": [{"code": "PRICE", "value": 100, "currency": "USD"}],
//!     "assets": [{"name": "EURUSD", "results": [{"code": "PRICE", "value": 101}]}]
//! }]});
//! let request = json!({"ID": 1, "direction": "Buy"});
//!
//! let table = flatten_response(Some(&response), &[request.as_object().unwrap().clone()]).unwrap();
//! assert_eq!(table.cell(0, "PRICE"), json!(101));
//! assert_eq!(table.cell(0, "PRICE_currency"), json!("USD"));
//! assert_eq!(table.cell(0, "asset"), json!("EURUSD"));
//! assert_eq!(table.cell(0, "direction"), json!("Buy"));
//! ```

use crate::error::{DataError, Result};
use crate::table::{key_text, FlatTable, Row};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Request columns copied onto flattened rows when the instrument list has them.
pub const JOIN_COLUMNS: [&str; 9] = [
    "direction",
    "pair",
    "opt_type",
    "strike",
    "notional",
    "notional_currency",
    "expiry",
    "BBGTicker",
    "stratid",
];

/// Request-side join key.
pub const REQUEST_ID: &str = "ID";

/// Response-side join key.
pub const RESPONSE_ID: &str = "id";

/// One `{code, value, currency}` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultItem {
    pub code: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub currency: Option<Value>,
}

/// One underlying asset attached to a response entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub results: Option<Vec<ResultItem>>,
}

/// A parsed `instruments[i]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEntry {
    pub id: Value,
    /// Scalar fields other than `id`.
    pub fields: Vec<(String, Value)>,
    pub results: Vec<ResultItem>,
    pub assets: Vec<Asset>,
}

impl ResponseEntry {
    /// Parses one entry; `index` is its position, used in error messages.
    ///
    /// # Errors
    /// Returns [`DataError::MalformedResponse`] when the entry is not an
    /// object, has no `id`, or carries non-array `results`/`assets`.
    pub fn parse(index: usize, entry: &Value) -> Result<Self> {
        let object = entry
            .as_object()
            .ok_or_else(|| DataError::malformed(index, "entry is not an object"))?;

        let id = match object.get(RESPONSE_ID) {
            None | Some(Value::Null) => return Err(DataError::malformed(index, "missing id")),
            Some(id) => id.clone(),
        };

        let results = match object.get("results") {
            None | Some(Value::Null) => Vec::new(),
            Some(value @ Value::Array(_)) => Vec::<ResultItem>::deserialize(value)
                .map_err(|e| DataError::malformed(index, format!("results: {e}")))?,
            Some(_) => return Err(DataError::malformed(index, "results is not an array")),
        };

        let assets = match object.get("assets") {
            None | Some(Value::Null) => Vec::new(),
            Some(value @ Value::Array(_)) => Vec::<Asset>::deserialize(value)
                .map_err(|e| DataError::malformed(index, format!("assets: {e}")))?,
            Some(_) => return Err(DataError::malformed(index, "assets is not an array")),
        };

        let fields = object
            .iter()
            .filter(|(key, value)| {
                key.as_str() != RESPONSE_ID && !value.is_array() && !value.is_object()
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id,
            fields,
            results,
            assets,
        })
    }

    /// Builds the flat row; first-asset results override top-level ones.
    #[must_use]
    pub fn into_row(self) -> Row {
        let mut row = Row::new();
        row.set(RESPONSE_ID, self.id);
        for (key, value) in self.fields {
            row.set(key, value);
        }

        expand_results(&mut row, self.results);

        if let Some(asset) = self.assets.into_iter().next() {
            row.set("asset", asset.name.unwrap_or(Value::Null));
            expand_results(&mut row, asset.results.unwrap_or_default());
        }

        row
    }
}

fn expand_results(row: &mut Row, results: Vec<ResultItem>) {
    for item in results {
        if !item.value.is_null() {
            row.set(item.code.clone(), item.value);
        }
        if let Some(currency) = item.currency.filter(|c| !c.is_null()) {
            row.set(format!("{}_currency", item.code), currency);
        }
    }
}

/// Flattens a venue response and left-joins the request's identity columns.
///
/// # Errors
/// Returns [`DataError::EmptyResult`] for a null response or an empty or
/// missing `instruments` array, and [`DataError::MalformedResponse`] for an
/// entry that cannot be parsed.
pub fn flatten_response(
    response: Option<&Value>,
    instruments: &[Map<String, Value>],
) -> Result<FlatTable> {
    let entries = match response.and_then(|r| r.get("instruments")) {
        None | Some(Value::Null) => return Err(DataError::EmptyResult),
        Some(Value::Array(entries)) if entries.is_empty() => return Err(DataError::EmptyResult),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(DataError::malformed(0, "instruments is not an array")),
    };

    let rows = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| ResponseEntry::parse(index, entry).map(ResponseEntry::into_row))
        .collect::<Result<Vec<Row>>>()?;
    let mut table = FlatTable::from_rows(rows)?;

    debug!(
        rows = table.height(),
        columns = table.width(),
        "Flattened venue response"
    );

    join_instruments(&mut table, instruments)?;
    Ok(table)
}

/// Copies [`JOIN_COLUMNS`] from `instruments` onto rows whose `id` matches an
/// instrument `ID`. Duplicate `ID`s resolve to the last instrument.
///
/// # Errors
/// Returns [`DataError::Frame`] if a joined column cannot be written.
pub fn join_instruments(
    table: &mut FlatTable,
    instruments: &[Map<String, Value>],
) -> Result<()> {
    if instruments.is_empty() {
        return Ok(());
    }
    if !instruments.iter().any(|i| i.contains_key(REQUEST_ID)) {
        warn!(
            instruments = instruments.len(),
            "Instrument list has no ID field, returning unjoined rows"
        );
        return Ok(());
    }

    let by_id: HashMap<String, &Map<String, Value>> = instruments
        .iter()
        .filter_map(|i| i.get(REQUEST_ID).and_then(key_text).map(|k| (k, i)))
        .collect();

    let columns: Vec<&str> = JOIN_COLUMNS
        .iter()
        .copied()
        .filter(|c| instruments.iter().any(|i| i.contains_key(*c)))
        .collect();

    let matches: Vec<Option<&Map<String, Value>>> = (0..table.height())
        .map(|row| key_text(&table.cell(row, RESPONSE_ID)).and_then(|k| by_id.get(&k).copied()))
        .collect();

    for column in &columns {
        let values: Vec<Value> = matches
            .iter()
            .enumerate()
            .map(|(row, instrument)| match instrument {
                Some(instrument) => instrument.get(*column).cloned().unwrap_or(Value::Null),
                None => table.cell(row, column),
            })
            .collect();
        table.set_column(column, &values)?;
    }

    let unmatched = matches.iter().filter(|m| m.is_none()).count();
    if unmatched > 0 {
        debug!(unmatched, "Response rows without a matching instrument");
    }

    Ok(())
}
