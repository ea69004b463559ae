//! Option legs sent to the venue pricers.
//!
//! A leg has two shapes:
//! - [`InstrumentLeg::request_fields`], the request-side identity columns that
//!   are joined back onto flattened prices (`ID`, `direction`, `pair`, ...)
//! - [`InstrumentLeg::to_payload`], the venue wire format (`BuySell`, `CallPut`,
//!   `UnderlyingAssets`, ...)

use crate::error::{PricerError, Result};
use ice_risk_core::{normalize_date, DATE_FORMAT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Venue instrument type for every priced leg.
pub const INSTRUMENT_TYPE: &str = "Vanilla";

/// Exercise style for every priced leg.
pub const EXERCISE_STYLE: &str = "European";

// =============================================================================
// Enums
// =============================================================================

/// Trade direction of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

impl FromStr for Direction {
    type Err = PricerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Buy" => Ok(Self::Buy),
            "Sell" => Ok(Self::Sell),
            other => Err(PricerError::InvalidArgument(format!(
                "direction must be 'Buy' or 'Sell', got '{other}'"
            ))),
        }
    }
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "Call"),
            Self::Put => write!(f, "Put"),
        }
    }
}

impl FromStr for OptionType {
    type Err = PricerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" => Ok(Self::Call),
            "put" => Ok(Self::Put),
            _ => Err(PricerError::InvalidArgument(format!(
                "option type must be 'Call' or 'Put', got '{s}'"
            ))),
        }
    }
}

/// Pricer family; selects the endpoint, the underlying shape and the
/// underlying-asset artifacts requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    #[serde(rename = "FX")]
    Fx,
    #[serde(rename = "EQ")]
    Equity,
    Basket,
}

impl AssetClass {
    /// Key used in `pricing.underlying_assets`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fx => "FX",
            Self::Equity => "EQ",
            Self::Basket => "Basket",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = PricerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FX" => Ok(Self::Fx),
            "EQ" => Ok(Self::Equity),
            "BASKET" => Ok(Self::Basket),
            _ => Err(PricerError::InvalidArgument(format!(
                "unknown asset class '{s}' (expected FX, EQ or Basket)"
            ))),
        }
    }
}

/// Strike as a level or a venue label such as `ATM`, `ATMF` or `25D`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Strike {
    Level(f64),
    Label(String),
}

impl From<f64> for Strike {
    fn from(value: f64) -> Self {
        Self::Level(value)
    }
}

impl From<&str> for Strike {
    fn from(value: &str) -> Self {
        Self::Label(value.to_string())
    }
}

// =============================================================================
// InstrumentLeg
// =============================================================================

/// One option leg to price.
///
/// Which underlying field is required depends on the asset class: `pair` for
/// FX (e.g. `EURUSD`), `BBGTicker` for EQ, `underlyingAssets` for baskets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentLeg {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    #[serde(rename = "BBGTicker", default, skip_serializing_if = "Option::is_none")]
    pub bbg_ticker: Option<String>,
    #[serde(
        rename = "underlyingAssets",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub underlying_assets: Option<Value>,
    pub opt_type: OptionType,
    pub strike: Strike,
    pub notional: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notional_currency: Option<String>,
    pub expiry: String,
    /// Defaults to the expiry when absent.
    #[serde(
        rename = "SettlementDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub settlement_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stratid: Option<i64>,
}

impl InstrumentLeg {
    /// Creates an FX leg on `pair`.
    #[must_use]
    pub fn fx(
        pair: impl Into<String>,
        direction: Direction,
        opt_type: OptionType,
        strike: impl Into<Strike>,
        notional: f64,
        expiry: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            direction,
            pair: Some(pair.into()),
            bbg_ticker: None,
            underlying_assets: None,
            opt_type,
            strike: strike.into(),
            notional,
            notional_currency: None,
            expiry: expiry.into(),
            settlement_date: None,
            stratid: None,
        }
    }

    /// Creates an equity leg on a Bloomberg ticker.
    #[must_use]
    pub fn equity(
        ticker: impl Into<String>,
        direction: Direction,
        opt_type: OptionType,
        strike: impl Into<Strike>,
        notional: f64,
        expiry: impl Into<String>,
    ) -> Self {
        Self {
            pair: None,
            bbg_ticker: Some(ticker.into()),
            ..Self::fx("", direction, opt_type, strike, notional, expiry)
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_stratid(mut self, stratid: i64) -> Self {
        self.stratid = Some(stratid);
        self
    }

    #[must_use]
    pub fn with_notional_currency(mut self, currency: impl Into<String>) -> Self {
        self.notional_currency = Some(currency.into());
        self
    }

    #[must_use]
    pub fn with_settlement_date(mut self, date: impl Into<String>) -> Self {
        self.settlement_date = Some(date.into());
        self
    }

    #[must_use]
    pub fn with_underlying_assets(mut self, assets: Value) -> Self {
        self.underlying_assets = Some(assets);
        self
    }

    /// Request-side columns joined back onto flattened prices.
    #[must_use]
    pub fn request_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Venue wire format of this leg.
    ///
    /// `index` is the leg's position, used in error messages.
    ///
    /// # Errors
    /// Returns [`PricerError::InvalidLeg`] when the leg has no `ID` or lacks
    /// the underlying its asset class needs, and a date error when the expiry
    /// or settlement date cannot be normalized.
    pub fn to_payload(
        &self,
        index: usize,
        asset_class: AssetClass,
        payout_currency: &str,
    ) -> Result<Value> {
        let id = self
            .id
            .ok_or_else(|| PricerError::invalid_leg(index, "leg has no ID"))?;

        let expiry = normalize_date(self.expiry.as_str(), DATE_FORMAT)?;
        let settlement = match &self.settlement_date {
            Some(date) => normalize_date(date.as_str(), DATE_FORMAT)?,
            None => expiry.clone(),
        };

        let mut payload = json!({
            "ID": id,
            "InstrumentType": INSTRUMENT_TYPE,
            "BuySell": self.direction,
            "CallPut": self.opt_type,
            "Strike": self.strike,
            "Notional": self.notional,
            "ExpiryDate": expiry,
            "SettlementDate": settlement,
            "Style": EXERCISE_STYLE,
        });

        let underlying = self.underlying(index, asset_class)?;
        if let Value::Object(map) = &mut payload {
            if asset_class == AssetClass::Basket {
                map.insert("PayoutCurrency".to_string(), json!(payout_currency));
            }
            map.insert("UnderlyingAssets".to_string(), underlying);
        }

        Ok(payload)
    }

    fn underlying(&self, index: usize, asset_class: AssetClass) -> Result<Value> {
        match asset_class {
            AssetClass::Fx => {
                let pair = self
                    .pair
                    .as_deref()
                    .filter(|p| p.len() > 3 && p.is_ascii())
                    .ok_or_else(|| {
                        PricerError::invalid_leg(index, "FX leg needs a currency pair like EURUSD")
                    })?;
                let (base, term) = pair.split_at(pair.len() - 3);
                Ok(json!({"BaseCurrency": base, "TermCurrency": term}))
            }
            AssetClass::Equity => {
                let ticker = self
                    .bbg_ticker
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| PricerError::invalid_leg(index, "EQ leg needs a BBGTicker"))?;
                Ok(json!({"BBGTicker": ticker}))
            }
            AssetClass::Basket => self
                .underlying_assets
                .clone()
                .ok_or_else(|| PricerError::invalid_leg(index, "basket leg needs underlyingAssets")),
        }
    }
}

/// Gives every leg without an `ID` its position in `legs`.
pub fn assign_ids(legs: &mut [InstrumentLeg]) {
    for (index, leg) in legs.iter_mut().enumerate() {
        if leg.id.is_none() {
            leg.id = i64::try_from(index).ok();
        }
    }
}
