//! Dynamic-column table for flattened venue responses.
//!
//! Venue responses carry a different set of result codes per request, so the
//! schema is only known after flattening. Rows are collected as [`Row`]s and
//! then materialized into a polars frame; missing cells read as `null`.

use crate::error::{DataError, Result};
use polars::prelude::{
    col, concat_lf_diagonal, AnyValue, DataFrame, DataType, Expr, IntoLazy, LazyFrame, NamedFrom,
    Series, UnionArgs,
};
use serde_json::{Map, Number, Value};

/// Column holding the strategy id legs are grouped by.
pub const STRATEGY_KEY: &str = "stratid";

/// One row under construction, remembering the order keys were first set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    keys: Vec<String>,
    values: Map<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its original position if it was already set.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.values.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (key, value) in iter {
            row.set(key, value);
        }
        row
    }
}

/// Flattened table backed by a polars [`DataFrame`].
///
/// Column types are inferred per column from the JSON cells: all-integer,
/// all-numeric and all-boolean columns get native dtypes, anything else is
/// stored as text.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable {
    frame: DataFrame,
}

impl Default for FlatTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame: DataFrame::empty(),
        }
    }

    /// Builds a table from rows; columns keep first-seen order and gaps are null.
    ///
    /// # Errors
    /// Returns [`DataError::Frame`] if the frame cannot be assembled.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in &row.keys {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let series: Vec<Series> = columns
            .iter()
            .map(|name| {
                let values: Vec<Value> = rows
                    .iter()
                    .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
                    .collect();
                series_from_values(name, &values)
            })
            .collect();

        Ok(Self {
            frame: DataFrame::new(series)?,
        })
    }

    /// Wraps an existing frame.
    #[must_use]
    pub fn from_frame(frame: DataFrame) -> Self {
        Self { frame }
    }

    #[must_use]
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    #[must_use]
    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.frame.width()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Returns a cell, or `null` when the column is unknown or the row is out of range.
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Value {
        self.frame
            .column(column)
            .ok()
            .filter(|_| row < self.frame.height())
            .and_then(|series| series.get(row).ok())
            .map_or(Value::Null, any_to_json)
    }

    /// Returns a whole column, or `None` for an unknown column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let series = self.frame.column(name).ok()?;
        Some(
            (0..series.len())
                .map(|i| series.get(i).map_or(Value::Null, any_to_json))
                .collect(),
        )
    }

    /// Replaces the column `name`, or appends it after the existing ones.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidArgument`] when `values` does not match the
    /// table height.
    pub fn set_column(&mut self, name: &str, values: &[Value]) -> Result<()> {
        if self.width() > 0 && values.len() != self.height() {
            return Err(DataError::InvalidArgument(format!(
                "column {name} has {} values for {} rows",
                values.len(),
                self.height()
            )));
        }
        self.frame.with_column(series_from_values(name, values))?;
        Ok(())
    }

    /// Vertically concatenates tables; columns are unioned, gaps read as null
    /// and clashing dtypes widen to their common supertype.
    ///
    /// # Errors
    /// Returns [`DataError::Frame`] if polars cannot reconcile the frames.
    pub fn concat(tables: impl IntoIterator<Item = FlatTable>) -> Result<Self> {
        let mut frames: Vec<LazyFrame> = tables
            .into_iter()
            .filter(|t| t.width() > 0)
            .map(|t| t.frame.lazy())
            .collect();

        match frames.len() {
            0 => Ok(Self::new()),
            1 => Ok(Self {
                frame: frames.remove(0).collect()?,
            }),
            _ => {
                let args = UnionArgs {
                    to_supertypes: true,
                    ..UnionArgs::default()
                };
                Ok(Self {
                    frame: concat_lf_diagonal(frames, args)?.collect()?,
                })
            }
        }
    }

    /// Dense JSON objects, one per row, with every column present.
    #[must_use]
    pub fn to_records(&self) -> Vec<Value> {
        let columns = self.columns();
        (0..self.height())
            .map(|row| {
                let dense: Map<String, Value> = columns
                    .iter()
                    .map(|c| (c.clone(), self.cell(row, c)))
                    .collect();
                Value::Object(dense)
            })
            .collect()
    }
}

fn series_from_values(name: &str, values: &[Value]) -> Series {
    let mut present = values.iter().filter(|v| !v.is_null()).peekable();
    if present.peek().is_none() {
        return Series::new(name.into(), vec![None::<String>; values.len()]);
    }

    let present: Vec<&Value> = present.collect();
    if present.iter().all(|v| v.is_boolean()) {
        let cells: Vec<Option<bool>> = values.iter().map(Value::as_bool).collect();
        Series::new(name.into(), cells)
    } else if present.iter().all(|v| v.is_i64()) {
        let cells: Vec<Option<i64>> = values.iter().map(Value::as_i64).collect();
        Series::new(name.into(), cells)
    } else if present.iter().all(|v| v.is_number()) {
        let cells: Vec<Option<f64>> = values.iter().map(Value::as_f64).collect();
        Series::new(name.into(), cells)
    } else {
        let cells: Vec<Option<String>> = values.iter().map(key_text).collect();
        Series::new(name.into(), cells)
    }
}

fn any_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int32(i) => Value::from(i),
        AnyValue::Int64(i) => Value::from(i),
        AnyValue::UInt32(i) => Value::from(i),
        AnyValue::UInt64(i) => Value::from(i),
        AnyValue::Float32(f) => Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number),
        AnyValue::Float64(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Canonical text form of a scalar, used for join and group keys.
///
/// `null` has no key; strings are used as-is so `1` and `"1"` compare equal.
#[must_use]
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Strategy aggregation
// ============================================================================

/// Reduction applied to one column when grouping legs into strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Numeric sum; numeric strings count, other values are skipped.
    Sum,
    /// First non-null value.
    First,
    /// Text of every non-null value joined with the separator.
    Join(String),
}

impl Aggregation {
    fn expr(&self, column: &str, numeric: bool) -> Expr {
        match self {
            Aggregation::Sum if numeric => col(column).sum(),
            Aggregation::Sum => col(column).cast(DataType::Float64).sum(),
            Aggregation::First => col(column).drop_nulls().first(),
            // Collected per group as a list, joined after the group-by.
            Aggregation::Join(_) => col(column).cast(DataType::String).drop_nulls(),
        }
    }
}

/// Groups rows by `key` and reduces every ruled column present in the table.
///
/// Groups keep first-seen order; rows without a key are dropped. The output
/// has the key column first, then the ruled columns in rule order. Sums over
/// text columns parse the numbers out first; unparsable cells count as null.
///
/// # Errors
/// Returns [`DataError::Frame`] if the group-by fails.
pub fn aggregate(
    table: &FlatTable,
    key: &str,
    rules: &[(String, Aggregation)],
) -> Result<FlatTable> {
    if !table.has_column(key) {
        return Ok(FlatTable::new());
    }

    let active: Vec<&(String, Aggregation)> = rules
        .iter()
        .filter(|(column, _)| column != key && table.has_column(column))
        .collect();

    let mut exprs = Vec::with_capacity(active.len());
    for (column, rule) in &active {
        let numeric = table.frame.column(column)?.dtype().is_numeric();
        exprs.push(rule.expr(column, numeric));
    }

    let mut frame = table
        .frame
        .clone()
        .lazy()
        .filter(col(key).is_not_null())
        .group_by_stable([col(key)])
        .agg(exprs)
        .collect()?;

    for (column, rule) in &active {
        let Aggregation::Join(separator) = rule else {
            continue;
        };
        let joined: Vec<Option<String>> = frame
            .column(column)?
            .list()?
            .into_iter()
            .map(|group| {
                let group = group?;
                let parts: Vec<&str> = group.str().ok()?.into_iter().flatten().collect();
                (!parts.is_empty()).then(|| parts.join(separator.as_str()))
            })
            .collect();
        frame.with_column(Series::new(column.as_str().into(), joined))?;
    }

    Ok(FlatTable { frame })
}

/// Column reductions used when pricing multi-leg strategies.
#[must_use]
pub fn default_pricer_rules() -> Vec<(String, Aggregation)> {
    use Aggregation::{First, Sum};
    let join = || Aggregation::Join(" ".to_string());

    let rules: Vec<(&str, Aggregation)> = vec![
        ("price", Sum),
        ("priceCurrency", First),
        ("remainingNotional", Sum),
        ("status", First),
        ("IsFlippedResults", First),
        ("MarketPriceAskPercentBase", Sum),
        ("MarketPriceAskPercentTerm", Sum),
        ("MarketPriceBase", Sum),
        ("MarketPriceBase_currency", First),
        ("MarketPriceBaseAsk", Sum),
        ("MarketPriceBaseAsk_currency", First),
        ("MarketPriceBaseBid", Sum),
        ("MarketPriceBaseBid_currency", First),
        ("MarketPriceBidPercentBase", Sum),
        ("MarketPriceBidPercentTerm", Sum),
        ("MarketPriceTerm", Sum),
        ("MarketPriceTerm_currency", First),
        ("MarketPriceTermAsk", Sum),
        ("MarketPriceTermAsk_currency", First),
        ("MarketPriceTermBid", Sum),
        ("MarketPriceTermBid_currency", First),
        ("PricePerUnitPercentBase", Sum),
        ("PricePerUnitPercentTerm", Sum),
        ("ThetaBase", Sum),
        ("ThetaBase_currency", First),
        ("ThetaBasePercent", Sum),
        ("ThetaBasePercent_currency", First),
        ("ThetaPercent", Sum),
        ("ThetaTerm", Sum),
        ("ThetaTerm_currency", First),
        ("asset", First),
        ("25DButterfly", First),
        ("25DRiskReversal", First),
        ("AtmVolatility", First),
        ("DataSource", First),
        ("DeltaBase", First),
        ("DeltaBase_currency", First),
        ("DeltaBasePercent", Sum),
        ("DeltaBasePremiumBase", Sum),
        ("DeltaBasePremiumBase_currency", First),
        ("DeltaBasePremiumTerm", Sum),
        ("DeltaBasePremiumTerm_currency", First),
        ("DeltaTerm", Sum),
        ("DeltaTerm_currency", First),
        ("DeltaTermPercent", Sum),
        ("DeltaTermPremiumBase", Sum),
        ("DeltaTermPremiumBase_currency", First),
        ("DeltaTermPremiumTerm", Sum),
        ("DeltaTermPremiumTerm_currency", First),
        ("DepoBase", First),
        ("DepoTerm", First),
        ("ForwardPoints", First),
        ("ForwardRate", First),
        ("GammaBase", First),
        ("GammaBase_currency", First),
        ("GammaBasePercent", Sum),
        ("GammaPercent", Sum),
        ("GammaTerm", Sum),
        ("GammaTerm_currency", First),
        ("GammaTermPercent", Sum),
        ("Spot", First),
        ("SpotSource", First),
        ("VegaBase", Sum),
        ("VegaBase_currency", First),
        ("VegaPercent", Sum),
        ("VegaTerm", Sum),
        ("VegaTerm_currency", First),
        ("VolatilitySpread", First),
        ("direction", join()),
        ("pair", First),
        ("opt_type", First),
        ("strike", join()),
        ("notional", First),
        ("notional_currency", First),
        ("expiry", First),
        ("CurrentNotional", join()),
        ("CurrentNotional_currency", First),
        ("MarketValueAsk", Sum),
        ("MarketValueAsk_currency", First),
        ("MarketValueBid", Sum),
        ("MarketValueBid_currency", First),
        ("MarketValueMid", Sum),
        ("MarketValueMid_currency", First),
        ("MarketValuePercent", Sum),
        ("MarketValuePercentAsk", Sum),
        ("MarketValuePercentBid", Sum),
        ("MarketVol", Sum),
        ("PricePerUnit", Sum),
        ("PricePerUnit_currency", First),
    ];

    rules
        .into_iter()
        .map(|(column, rule)| (column.to_string(), rule))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    // =========================================================================
    // Table
    // =========================================================================

    #[test]
    fn test_row_set_keeps_first_position() {
        let mut r = Row::new();
        r.set("a", json!(1));
        r.set("b", json!(2));
        r.set("a", json!(3));

        let pairs: Vec<(&str, &Value)> = r.iter().collect();
        assert_eq!(pairs, vec![("a", &json!(3)), ("b", &json!(2))]);
    }

    fn table(rows: Vec<Row>) -> FlatTable {
        FlatTable::from_rows(rows).unwrap()
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        let table = table(vec![
            row(&[("id", json!(1)), ("price", json!(10.0))]),
            row(&[("id", json!(2)), ("Delta", json!(0.5)), ("price", json!(11.0))]),
        ]);

        assert_eq!(table.columns(), ["id", "price", "Delta"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.width(), 3);
        assert_eq!(table.cell(0, "Delta"), Value::Null);
        assert_eq!(table.cell(1, "Delta"), json!(0.5));
        assert_eq!(table.cell(9, "id"), Value::Null);
        assert_eq!(table.cell(0, "missing"), Value::Null);
    }

    #[test]
    fn test_column_dtypes_inferred_from_cells() {
        let table = table(vec![
            row(&[("n", json!(1)), ("x", json!(1)), ("flag", json!(true)), ("mixed", json!(1))]),
            row(&[("n", json!(2)), ("x", json!(2.5)), ("flag", Value::Null), ("mixed", json!("ATM"))]),
        ]);
        let frame = table.frame();

        assert_eq!(frame.column("n").unwrap().dtype(), &DataType::Int64);
        assert_eq!(frame.column("x").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("flag").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(frame.column("mixed").unwrap().dtype(), &DataType::String);
        assert_eq!(table.cell(0, "mixed"), json!("1"));
        assert_eq!(table.cell(1, "flag"), Value::Null);
    }

    #[test]
    fn test_set_column_replaces_or_appends() {
        let mut t = table(vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])]);

        t.set_column("pair", &[json!("EURUSD"), Value::Null]).unwrap();
        t.set_column("id", &[json!(10), json!(20)]).unwrap();

        assert_eq!(t.columns(), ["id", "pair"]);
        assert_eq!(t.column("id").unwrap(), vec![json!(10), json!(20)]);
        assert_eq!(t.cell(1, "pair"), Value::Null);
        assert!(t.set_column("short", &[json!(1)]).is_err());
    }

    #[test]
    fn test_concat_null_fills() {
        let a = table(vec![row(&[("id", json!(1)), ("price", json!(10))])]);
        let b = table(vec![row(&[("id", json!(2)), ("vega", json!(3))])]);

        let t = FlatTable::concat([a, b]).unwrap();
        assert_eq!(t.columns(), ["id", "price", "vega"]);
        assert_eq!(t.column("price").unwrap(), vec![json!(10), Value::Null]);
        assert_eq!(t.to_records()[1], json!({"id": 2, "price": null, "vega": 3}));
        assert!(t.column("missing").is_none());
    }

    #[test]
    fn test_concat_widens_clashing_dtypes() {
        let a = table(vec![row(&[("id", json!(1)), ("strike", json!(1.1))])]);
        let b = table(vec![row(&[("id", json!(2)), ("strike", json!("ATM"))])]);

        let t = FlatTable::concat([a, b, FlatTable::new()]).unwrap();
        assert_eq!(t.height(), 2);
        assert_eq!(t.cell(1, "strike"), json!("ATM"));
        assert!(FlatTable::concat(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_key_text() {
        assert_eq!(key_text(&json!(1)), Some("1".to_string()));
        assert_eq!(key_text(&json!("1")), Some("1".to_string()));
        assert_eq!(key_text(&Value::Null), None);
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    fn legs() -> FlatTable {
        table(vec![
            row(&[
                ("stratid", json!(360)),
                ("direction", json!("Buy")),
                ("strike", json!("ATM")),
                ("price", json!(100)),
                ("priceCurrency", json!("USD")),
            ]),
            row(&[
                ("stratid", json!(360)),
                ("direction", json!("Buy")),
                ("strike", json!("25D")),
                ("price", json!("50.5")),
                ("priceCurrency", json!("USD")),
            ]),
            row(&[
                ("stratid", json!(361)),
                ("direction", json!("Sell")),
                ("strike", json!(1.1)),
                ("price", json!(7)),
            ]),
            row(&[("direction", json!("Sell")), ("price", json!(1))]),
        ])
    }

    #[test]
    fn test_aggregate_default_rules() {
        let grouped = aggregate(&legs(), STRATEGY_KEY, &default_pricer_rules()).unwrap();

        assert_eq!(grouped.height(), 2);
        assert_eq!(grouped.columns()[0], "stratid");
        assert_eq!(grouped.cell(0, "stratid"), json!(360));
        assert_eq!(grouped.cell(0, "price"), json!(150.5));
        assert_eq!(grouped.cell(0, "priceCurrency"), json!("USD"));
        assert_eq!(grouped.cell(0, "direction"), json!("Buy Buy"));
        assert_eq!(grouped.cell(0, "strike"), json!("ATM 25D"));

        assert_eq!(grouped.cell(1, "stratid"), json!(361));
        assert_eq!(grouped.cell(1, "price"), json!(7.0));
        assert_eq!(grouped.cell(1, "priceCurrency"), Value::Null);
        assert_eq!(grouped.cell(1, "strike"), json!("1.1"));
        assert!(!grouped.has_column("Spot"));
    }

    #[test]
    fn test_integer_sum_stays_integer() {
        let t = table(vec![
            row(&[("stratid", json!("a")), ("n", json!(2))]),
            row(&[("stratid", json!("a")), ("n", json!(3))]),
        ]);

        let grouped = aggregate(&t, "stratid", &[("n".to_string(), Aggregation::Sum)]).unwrap();
        assert_eq!(grouped.cell(0, "n"), json!(5));
    }

    #[test]
    fn test_aggregate_without_key_column_is_empty() {
        let t = table(vec![row(&[("price", json!(1))])]);
        let grouped = aggregate(&t, STRATEGY_KEY, &default_pricer_rules()).unwrap();
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_default_rules_have_unique_columns() {
        let rules = default_pricer_rules();
        let mut names: Vec<&str> = rules.iter().map(|(c, _)| c.as_str()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
