//! Calculation and pricing workflows on the ICE risk venue.
//!
//! This crate provides:
//! - [`IceCalculator`]: bilateral IM and MV/greeks runs, deduplicated through
//!   the calculation registry and read through the result cache
//! - [`Pricer`]: batched option pricing, flattened into one row per leg and
//!   aggregated per strategy
//! - [`InstrumentLeg`] and [`split_into_batches`]
//!
//! Both facades are generic over [`ice_risk_core::VenueApi`], so tests can swap
//! the HTTP client for an in-memory venue.
//!
//! # Example
//!
//! ```ignore
//! use ice_risk_client::IceClient;
//! use ice_risk_core::ConfigLoader;
//! use ice_risk_pricer::{AssetClass, Direction, InstrumentLeg, OptionType, Pricer, Valuation};
//! use std::sync::Arc;
//!
//! let config = ConfigLoader::load()?;
//! let client = Arc::new(IceClient::from_app(&config)?);
//! let pricer = Pricer::new(client, &config);
//!
//! let legs = vec![InstrumentLeg::fx("EURUSD", Direction::Buy, OptionType::Call, "ATM", 1e6, "2026-07-22")];
//! let table = pricer.price(&legs, AssetClass::Fx, &Valuation::real_time()).await?;
//! ```

pub mod batch;
pub mod calculator;
pub mod error;
pub mod instruments;
pub mod pricer;
pub mod pricing_log;

pub use batch::split_into_batches;
pub use calculator::{IceCalculator, RerunPolicy, DEFAULT_FUND, IM, IM_PORTFOLIO, MV};
pub use error::{PricerError, Result};
pub use instruments::{assign_ids, AssetClass, Direction, InstrumentLeg, OptionType, Strike};
pub use pricer::{Pricer, StrategyPricing, Valuation, ValuationType};
pub use pricing_log::PricingLog;
