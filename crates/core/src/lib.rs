//! Shared foundations for the ICE risk client.
//!
//! This crate provides:
//! - [`AppConfig`], loaded once by [`ConfigLoader`] and passed into every component
//! - Date/time normalization used for registry keys, cache keys and payloads
//! - The [`VenueApi`] capability trait the facades depend on

pub mod config;
pub mod config_loader;
pub mod dates;
pub mod traits;

pub use config::{
    AppConfig, BookConfig, EndpointConfig, PricingConfig, StorageConfig, VenueConfig,
};
pub use config_loader::ConfigLoader;
pub use dates::{
    generate_dates, normalize_date, normalize_time, parse_timestamp, DateError, DateInput,
    Frequency, TimeInput, DATE_FORMAT, TIMESTAMP_FORMAT, TIME_FORMAT,
};
pub use traits::VenueApi;
