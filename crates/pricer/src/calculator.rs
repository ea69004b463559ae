//! IM and MV calculation workflows.
//!
//! Every workflow follows the same shape: look the calculation up in the
//! registry, submit it to the venue only when it is not on file, record the
//! returned id, then read results through the write-once result cache.

use crate::error::{PricerError, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use ice_risk_client::calculation_id_from;
use ice_risk_core::{AppConfig, BookConfig, EndpointConfig, VenueApi, DATE_FORMAT};
use ice_risk_data::{CalculationRegistry, MatchMode, ResultCache};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Market value and greeks.
pub const MV: &str = "MV";
/// Bilateral initial margin per counterparty.
pub const IM: &str = "IM";
/// Bilateral initial margin for the whole portfolio.
pub const IM_PORTFOLIO: &str = "IM-ptf";
/// Fund used when a workflow does not take one.
pub const DEFAULT_FUND: &str = "HV";

const SIMM_MODEL: &str = "SIMM";

/// Whether [`IceCalculator::mv_and_greeks_latest`] submits a fresh calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerunPolicy {
    /// Read results of the most recent recorded run.
    #[default]
    UseExisting,
    /// Submit a real-time run and record it first.
    Rerun,
}

/// Registry-backed calculation facade over a [`VenueApi`].
pub struct IceCalculator<V: VenueApi + ?Sized> {
    venue: Arc<V>,
    registry: CalculationRegistry,
    cache: ResultCache,
    endpoints: EndpointConfig,
    books: BookConfig,
    counterparties: Vec<String>,
}

impl<V: VenueApi + ?Sized> IceCalculator<V> {
    /// Builds a calculator with the registry and result cache configured in `config.storage`.
    pub fn new(venue: Arc<V>, config: &AppConfig) -> Self {
        Self {
            venue,
            registry: CalculationRegistry::new(&config.storage.registry_path),
            cache: ResultCache::new(&config.storage.results_cache_dir),
            endpoints: config.endpoints.clone(),
            books: config.books.clone(),
            counterparties: config.counterparties.clone(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CalculationRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &CalculationRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    // =========================================================================
    // Generic building blocks
    // =========================================================================

    /// Returns the results of calculation `id`, from the cache when present.
    ///
    /// Results fetched from the venue are saved before being returned.
    ///
    /// # Errors
    /// Returns [`PricerError::NoData`] if the venue has nothing for `id`.
    pub async fn calculation_results(&self, id: i64) -> Result<Value> {
        let key = id.to_string();

        if let Some(cached) = self.cache.load(&key)? {
            debug!(calculation_id = id, "Result cache hit");
            return Ok(cached);
        }

        let payload = self
            .venue
            .get_calculation_results(&key)
            .await?
            .ok_or_else(|| PricerError::no_data(format!("calculation {id}")))?;

        self.cache.save(&key, &payload)?;
        Ok(payload)
    }

    /// Returns the recorded id for `(date, calc_type, fund)`, submitting `body`
    /// to `endpoint` and recording the new id when none is on file.
    ///
    /// # Errors
    /// Returns a registry error, a venue error, or
    /// [`PricerError::MissingCalculationId`] if the submission was not accepted.
    pub async fn ensure_calculation(
        &self,
        date: NaiveDateTime,
        calc_type: &str,
        fund: &str,
        mode: MatchMode,
        endpoint: &str,
        body: &Value,
    ) -> Result<i64> {
        if let Some(id) = self.registry.lookup_exact(date, calc_type, fund, mode)? {
            debug!(calculation_id = id, calc_type, fund, "Using recorded calculation");
            return Ok(id);
        }

        info!(%date, calc_type, fund, "No recorded calculation, running new calculation");
        let id = self.submit(endpoint, body, calc_type).await?;
        self.registry.record(id, date, calc_type, fund)?;
        Ok(id)
    }

    async fn submit(&self, endpoint: &str, body: &Value, calc_type: &str) -> Result<i64> {
        let response = self
            .venue
            .post(endpoint, body)
            .await?
            .ok_or_else(|| PricerError::no_data(format!("{calc_type} submission")))?;

        calculation_id_from(&response).ok_or_else(|| PricerError::MissingCalculationId {
            calc_type: calc_type.to_string(),
        })
    }

    // =========================================================================
    // Bilateral IM
    // =========================================================================

    /// Request body of a bilateral SIMM run.
    ///
    /// Counterparty runs and HV runs use the HV subset books; other funds use
    /// every WR book.
    #[must_use]
    pub fn bilateral_im_body(&self, date: NaiveDate, fund: &str, with_counterparties: bool) -> Value {
        let books = if fund == "HV" || with_counterparties {
            &self.books.hv_subset_n1
        } else {
            &self.books.wr_all
        };

        let mut body = json!({
            "valuation": {"type": "EOD", "date": date.format(DATE_FORMAT).to_string()},
            "bookNames": books,
            "model": SIMM_MODEL,
        });

        if with_counterparties {
            body["counterPartyNames"] = json!(self.counterparties);
        }

        body
    }

    /// Submits a bilateral IM run and returns the raw acceptance response.
    ///
    /// # Errors
    /// Returns a venue error or [`PricerError::NoData`].
    pub async fn run_bilateral_im(
        &self,
        date: NaiveDate,
        fund: &str,
        with_counterparties: bool,
    ) -> Result<Value> {
        let body = self.bilateral_im_body(date, fund, with_counterparties);
        self.venue
            .post(&self.endpoints.bilateral_im, &body)
            .await?
            .ok_or_else(|| PricerError::no_data("bilateral IM submission"))
    }

    /// Per-counterparty IM `results` for `fund` on `date`.
    ///
    /// # Errors
    /// Returns [`PricerError::NoData`] when the calculation has no `results`.
    pub async fn bilateral_im_by_counterparty(&self, date: NaiveDate, fund: &str) -> Result<Value> {
        let body = self.bilateral_im_body(date, fund, true);
        let id = self
            .ensure_calculation(
                midnight(date),
                IM,
                fund,
                MatchMode::TimeSensitive,
                &self.endpoints.bilateral_im,
                &body,
            )
            .await?;

        take_field(self.calculation_results(id).await?, "results", id)
    }

    /// Portfolio-level IM `results` on `date`.
    ///
    /// # Errors
    /// Returns [`PricerError::NoData`] when the calculation has no `results`.
    pub async fn portfolio_im(&self, date: NaiveDate) -> Result<Value> {
        let body = self.bilateral_im_body(date, DEFAULT_FUND, false);
        let id = self
            .ensure_calculation(
                midnight(date),
                IM_PORTFOLIO,
                DEFAULT_FUND,
                MatchMode::TimeSensitive,
                &self.endpoints.bilateral_im,
                &body,
            )
            .await?;

        take_field(self.calculation_results(id).await?, "results", id)
    }

    /// `postIm` of `counterparty` on `date`, or `None` if the counterparty is
    /// not in the results.
    ///
    /// # Errors
    /// Returns [`PricerError::NoData`] when the calculation has no `results` list.
    pub async fn post_im(&self, date: NaiveDate, counterparty: &str) -> Result<Option<Value>> {
        let results = self.bilateral_im_by_counterparty(date, DEFAULT_FUND).await?;
        let Value::Array(groups) = results else {
            return Err(PricerError::no_data("IM results list"));
        };

        let im = groups
            .iter()
            .filter(|g| g.get("group").and_then(Value::as_str) == Some(counterparty))
            .filter_map(|g| g.get("postIm").cloned())
            .last();

        info!(counterparty, found = im.is_some(), "Post-IM lookup");
        Ok(im)
    }

    // =========================================================================
    // MV and greeks
    // =========================================================================

    /// Request body of an MV and greeks run: real-time without a date, end of
    /// day otherwise.
    #[must_use]
    pub fn mv_and_greeks_body(&self, date: Option<NaiveDate>) -> Value {
        let valuation = match date {
            None => json!({"type": "RealTime"}),
            Some(day) => json!({"type": "EOD", "date": day.format(DATE_FORMAT).to_string()}),
        };

        json!({
            "valuation": valuation,
            "bookNames": self.books.hv_all,
            "includeSubBooks": "true",
        })
    }

    /// Submits an MV and greeks run and returns the raw acceptance response.
    ///
    /// # Errors
    /// Returns a venue error or [`PricerError::NoData`].
    pub async fn run_mv_and_greeks(&self, date: Option<NaiveDate>) -> Result<Value> {
        let body = self.mv_and_greeks_body(date);
        self.venue
            .post(&self.endpoints.invoke_calculation, &body)
            .await?
            .ok_or_else(|| PricerError::no_data("MV submission"))
    }

    /// `tradeLegs` of the latest MV run, or of a fresh real-time run.
    ///
    /// # Errors
    /// Returns [`PricerError::NoData`] when no run is on file and `policy` is
    /// [`RerunPolicy::UseExisting`].
    pub async fn mv_and_greeks_latest(&self, policy: RerunPolicy) -> Result<Value> {
        let latest = self.registry.lookup_most_recent(MV, DEFAULT_FUND)?;
        let now = Local::now().naive_local();

        if let Some((last_run, id)) = latest {
            info!(
                calculation_id = id,
                last_run = %last_run,
                elapsed_mins = (now - last_run).num_minutes(),
                "Latest MV run"
            );
        }

        let id = match (policy, latest) {
            (RerunPolicy::UseExisting, Some((_, id))) => id,
            (RerunPolicy::UseExisting, None) => {
                return Err(PricerError::no_data("previous MV calculation"))
            }
            (RerunPolicy::Rerun, _) => {
                info!("Running real-time MV calculation");
                let body = self.mv_and_greeks_body(None);
                let id = self.submit(&self.endpoints.invoke_calculation, &body, MV).await?;
                self.registry.record(id, now, MV, DEFAULT_FUND)?;
                id
            }
        };

        take_field(self.calculation_results(id).await?, "tradeLegs", id)
    }

    /// `tradeLegs` for `date`: reuses the latest MV run recorded on that day,
    /// otherwise runs and records an end-of-day calculation.
    ///
    /// # Errors
    /// Returns a venue, registry or cache error.
    pub async fn mv_and_greeks_for_day(&self, date: NaiveDate) -> Result<Value> {
        let day_start = midnight(date);

        let same_day = self
            .registry
            .records_for(MV, DEFAULT_FUND)?
            .into_iter()
            .filter(|record| record.date.date() == date)
            .max_by_key(|record| record.date)
            .map(|record| (record.date, record.id));

        let id = match same_day {
            Some((run_at, id)) => {
                info!(calculation_id = id, run_at = %run_at, "Using previous MV calculation");
                id
            }
            _ => {
                info!(%date, "Running MV calculation for day");
                let body = self.mv_and_greeks_body(Some(date));
                let id = self.submit(&self.endpoints.invoke_calculation, &body, MV).await?;
                self.registry.record(id, day_start, MV, DEFAULT_FUND)?;
                id
            }
        };

        take_field(self.calculation_results(id).await?, "tradeLegs", id)
    }

    /// Full MV payload for the calendar day of `date`.
    ///
    /// # Errors
    /// Returns a venue, registry or cache error.
    pub async fn total_mv(&self, date: NaiveDateTime) -> Result<Value> {
        let body = self.mv_and_greeks_body(Some(date.date()));
        let id = self
            .ensure_calculation(
                date,
                MV,
                DEFAULT_FUND,
                MatchMode::DateOnly,
                &self.endpoints.invoke_calculation,
                &body,
            )
            .await?;

        self.calculation_results(id).await
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn take_field(mut payload: Value, key: &str, id: i64) -> Result<Value> {
    match payload.get_mut(key).map(Value::take) {
        Some(Value::Null) | None => Err(PricerError::no_data(format!(
            "'{key}' of calculation {id}"
        ))),
        Some(value) => Ok(value),
    }
}
