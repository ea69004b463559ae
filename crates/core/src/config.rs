use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Top-level configuration, built once at process start and handed to the
/// registry, result cache, venue client and facades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub venue: VenueConfig,
    pub endpoints: EndpointConfig,
    pub storage: StorageConfig,
    pub books: BookConfig,
    pub counterparties: Vec<String>,
    pub pricing: PricingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Base URL of the venue API, e.g. `https://ice.example.com`.
    pub host: String,
    /// Authentication endpoint, relative to `host`.
    pub auth_path: String,
    pub username: String,
    pub password: Option<String>,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub max_retries: u32,
}

impl fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueConfig")
            .field("host", &self.host)
            .field("auth_path", &self.auth_path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            host: "https://localhost".to_string(),
            auth_path: "/api/authenticate".to_string(),
            username: String::new(),
            password: None,
            verify_ssl: false,
            timeout_secs: 30,
            requests_per_minute: 60,
            max_retries: 2,
        }
    }
}

/// Venue endpoint paths, relative to [`VenueConfig::host`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub calculation_results: String,
    pub bilateral_im: String,
    pub invoke_calculation: String,
    pub search_trades: String,
    pub get_trades: String,
    pub eq_pricer: String,
    pub fx_pricer: String,
    pub fx_solve: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            calculation_results: "/api/calculations/results".to_string(),
            bilateral_im: "/api/calculations/bilateral-im".to_string(),
            invoke_calculation: "/api/calculations/invoke".to_string(),
            search_trades: "/api/trades/search".to_string(),
            get_trades: "/api/trades".to_string(),
            eq_pricer: "/api/pricer/eq/calculate".to_string(),
            fx_pricer: "/api/pricer/fx/calculate".to_string(),
            fx_solve: "/api/pricer/fx/solve".to_string(),
        }
    }
}

/// Local file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CSV calculation registry (`Date,ID,Type,Fundation`).
    pub registry_path: PathBuf,
    /// Directory holding `<id>_results.json` files.
    pub results_cache_dir: PathBuf,
    pub token_cache_path: PathBuf,
    pub request_log_path: PathBuf,
    pub pricing_log_path: PathBuf,
    pub token_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("data/calculation_ids.csv"),
            results_cache_dir: PathBuf::from("data/cache/results"),
            token_cache_path: PathBuf::from("data/cache/token.json"),
            request_log_path: PathBuf::from("data/logs/requests.csv"),
            pricing_log_path: PathBuf::from("data/logs/pricing.csv"),
            token_ttl_secs: 3600,
        }
    }
}

/// Book names per fund.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub hv_all: Vec<String>,
    pub wr_all: Vec<String>,
    pub hv_subset_n1: Vec<String>,
    pub hv_subset_n2: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Maximum number of instruments per pricing request.
    pub batch_size: usize,
    pub default_risks: Vec<String>,
    /// Underlying-asset artifacts requested per asset class ("FX", "EQ", "Basket").
    pub underlying_assets: BTreeMap<String, Vec<String>>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut underlying_assets = BTreeMap::new();
        underlying_assets.insert(
            "FX".to_string(),
            vec!["Spot".to_string(), "ForwardRate".to_string()],
        );
        underlying_assets.insert(
            "EQ".to_string(),
            vec!["Spot".to_string(), "AtmVolatility".to_string()],
        );

        Self {
            batch_size: 50,
            default_risks: vec!["Spread".to_string(), "Theta".to_string()],
            underlying_assets,
        }
    }
}

impl BookConfig {
    /// Returns the book list to use for a fund's calculations.
    #[must_use]
    pub fn books_for_fund(&self, fund: &str) -> &[String] {
        match fund {
            "WR" => &self.wr_all,
            _ => &self.hv_all,
        }
    }
}
