//! ICE risk venue integration.
//!
//! This crate provides:
//! - REST client with rate limiting and transient-error retries
//! - Username/password authentication with an on-disk token cache
//! - CSV request log (`timestamp,method,endpoint,status,success`)
//! - Request bodies and response helpers for calculation endpoints
//!
//! # Example
//!
//! ```ignore
//! use ice_risk_client::IceClient;
//! use ice_risk_core::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let client = IceClient::from_app(&config)?;
//!
//!     let password = config.venue.password.clone().unwrap_or_default();
//!     if !client.login(&config.venue.username, &password).await? {
//!         anyhow::bail!("venue rejected credentials");
//!     }
//!
//!     let results = client.calculation_results("81234").await?;
//!     println!("{results:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Authentication
//!
//! The venue returns a session token from the authentication endpoint; it is
//! sent on every request in the `AuthenticationToken` header and cached in
//! `storage.token_cache_path` for `storage.token_ttl_secs`.

pub mod auth;
pub mod client;
pub mod error;
pub mod request_log;
pub mod types;

pub use auth::{CachedToken, TokenCache, AUTH_HEADER};
pub use client::{IceClient, IceClientConfig};
pub use error::{IceError, Result};
pub use request_log::RequestLog;
pub use types::{calculation_id_from, CalculationResultsRequest, YesNo, CALCULATION_ID_KEY};
