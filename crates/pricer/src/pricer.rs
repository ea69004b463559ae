//! Batched option pricing.
//!
//! Legs are split into batches of `pricing.batch_size`, each batch is priced
//! with one request, flattened against its own legs, and the tables are
//! concatenated. Batches are sent one after another.

use crate::batch::split_into_batches;
use crate::error::Result;
use crate::instruments::{assign_ids, AssetClass, InstrumentLeg};
use crate::pricing_log::PricingLog;
use chrono::{Local, NaiveDate, NaiveTime};
use ice_risk_core::{AppConfig, EndpointConfig, PricingConfig, VenueApi, DATE_FORMAT, TIME_FORMAT};
use ice_risk_data::{aggregate, default_pricer_rules, flatten_response, FlatTable, STRATEGY_KEY};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payout currency of basket legs unless overridden.
pub const DEFAULT_PAYOUT_CURRENCY: &str = "EUR";

// =============================================================================
// Valuation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValuationType {
    #[serde(rename = "EOD")]
    EndOfDay,
    RealTime,
}

/// Valuation section of a pricing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    pub kind: ValuationType,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl Valuation {
    #[must_use]
    pub fn end_of_day(date: NaiveDate) -> Self {
        Self {
            kind: ValuationType::EndOfDay,
            date: Some(date),
            time: None,
        }
    }

    #[must_use]
    pub fn real_time() -> Self {
        Self {
            kind: ValuationType::RealTime,
            date: None,
            time: None,
        }
    }

    /// Sets the pricing cut time.
    #[must_use]
    pub fn at(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }

    /// `{"type", "Date", "Time"?}`; `Date` is null when unset.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut valuation = json!({
            "type": self.kind,
            "Date": self.date.map(|d| d.format(DATE_FORMAT).to_string()),
        });
        if let Some(time) = self.time {
            valuation["Time"] = json!(time.format(TIME_FORMAT).to_string());
        }
        valuation
    }
}

// =============================================================================
// Pricer
// =============================================================================

/// Per-leg prices and their per-strategy aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPricing {
    /// One row per `stratid`.
    pub aggregated: FlatTable,
    /// One row per leg.
    pub details: FlatTable,
}

pub struct Pricer<V: VenueApi + ?Sized> {
    venue: Arc<V>,
    endpoints: EndpointConfig,
    pricing: PricingConfig,
    pricing_log: Option<PricingLog>,
    payout_currency: String,
}

impl<V: VenueApi + ?Sized> Pricer<V> {
    pub fn new(venue: Arc<V>, config: &AppConfig) -> Self {
        Self {
            venue,
            endpoints: config.endpoints.clone(),
            pricing: config.pricing.clone(),
            pricing_log: Some(PricingLog::new(&config.storage.pricing_log_path)),
            payout_currency: DEFAULT_PAYOUT_CURRENCY.to_string(),
        }
    }

    /// Replaces the pricing log; `None` disables it.
    #[must_use]
    pub fn with_pricing_log(mut self, log: Option<PricingLog>) -> Self {
        self.pricing_log = log;
        self
    }

    #[must_use]
    pub fn with_payout_currency(mut self, currency: impl Into<String>) -> Self {
        self.payout_currency = currency.into();
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.pricing.batch_size = batch_size;
        self
    }

    fn endpoint(&self, asset_class: AssetClass) -> &str {
        match asset_class {
            AssetClass::Fx => &self.endpoints.fx_pricer,
            AssetClass::Equity | AssetClass::Basket => &self.endpoints.eq_pricer,
        }
    }

    /// Builds the pricing request body for `legs`, which must all carry an `ID`.
    ///
    /// # Errors
    /// Returns [`PricerError::InvalidLeg`](crate::PricerError::InvalidLeg) for a leg that cannot be encoded.
    pub fn payload(
        &self,
        legs: &[InstrumentLeg],
        asset_class: AssetClass,
        valuation: &Valuation,
    ) -> Result<Value> {
        let instruments = legs
            .iter()
            .enumerate()
            .map(|(index, leg)| leg.to_payload(index, asset_class, &self.payout_currency))
            .collect::<Result<Vec<Value>>>()?;

        let underlying_assets = self
            .pricing
            .underlying_assets
            .get(asset_class.as_str())
            .map_or(Value::Null, |artifacts| json!(artifacts));

        Ok(json!({
            "valuation": valuation.to_json(),
            "artifacts": {
                "instruments": self.pricing.default_risks,
                "underlyingAssets": underlying_assets,
            },
            "instruments": instruments,
        }))
    }

    /// Sends one pricing request and returns the raw venue answer.
    ///
    /// Legs without an `ID` get their position in `legs`.
    ///
    /// # Errors
    /// Returns a leg encoding error or a venue error.
    pub async fn request_prices(
        &self,
        legs: &[InstrumentLeg],
        asset_class: AssetClass,
        valuation: &Valuation,
    ) -> Result<Option<Value>> {
        let mut legs = legs.to_vec();
        assign_ids(&mut legs);

        let body = self.payload(&legs, asset_class, valuation)?;
        self.log_request(valuation, legs.len());

        let endpoint = self.endpoint(asset_class);
        debug!(endpoint, instruments = legs.len(), %asset_class, "Requesting prices");

        Ok(self.venue.post(endpoint, &body).await?)
    }

    /// Prices every leg and returns one flattened row per leg.
    ///
    /// # Errors
    /// Returns [`PricerError::Data`](crate::PricerError::Data) with `EmptyResult` if any batch comes back
    /// without instruments, or a leg encoding or venue error.
    pub async fn price(
        &self,
        legs: &[InstrumentLeg],
        asset_class: AssetClass,
        valuation: &Valuation,
    ) -> Result<FlatTable> {
        let mut legs = legs.to_vec();
        assign_ids(&mut legs);

        let batches = split_into_batches(&legs, self.pricing.batch_size)?;
        let total = batches.len();
        let mut tables = Vec::with_capacity(total);

        for (number, batch) in batches.iter().enumerate() {
            let response = self.request_prices(batch, asset_class, valuation).await?;
            let fields: Vec<Map<String, Value>> =
                batch.iter().map(InstrumentLeg::request_fields).collect();

            let table = flatten_response(response.as_ref(), &fields)?;
            debug!(batch = number + 1, total, rows = table.height(), "Priced batch");
            tables.push(table);
        }

        let table = FlatTable::concat(tables)?;
        info!(
            legs = legs.len(),
            batches = total,
            rows = table.height(),
            %asset_class,
            "Pricing complete"
        );
        Ok(table)
    }

    /// Prices every leg and aggregates the legs of each `stratid`.
    ///
    /// # Errors
    /// Same as [`Pricer::price`].
    pub async fn price_strategy(
        &self,
        legs: &[InstrumentLeg],
        asset_class: AssetClass,
        valuation: &Valuation,
    ) -> Result<StrategyPricing> {
        let details = self.price(legs, asset_class, valuation).await?;
        let aggregated = aggregate(&details, STRATEGY_KEY, &default_pricer_rules())?;

        Ok(StrategyPricing {
            aggregated,
            details,
        })
    }

    fn log_request(&self, valuation: &Valuation, n_instruments: usize) {
        let Some(log) = &self.pricing_log else { return };
        let date = valuation
            .date
            .unwrap_or_else(|| Local::now().date_naive());

        if let Err(e) = log.append(date, n_instruments) {
            warn!(error = %e, "Failed to write pricing log");
        }
    }
}
