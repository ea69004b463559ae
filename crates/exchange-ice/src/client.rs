//! ICE risk REST client with rate limiting.
//!
//! Provides authenticated JSON GET/POST access to the venue with automatic
//! rate limiting using the governor crate, transient-error retries, a cached
//! session token, and a CSV request log.
//!
//! # Example
//!
//! ```ignore
//! use ice_risk_client::{IceClient, IceClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = IceClient::new(IceClientConfig::default().with_host("https://ice.example.com"))?;
//!     client.login("analyst", "secret").await?;
//!
//!     let results = client.calculation_results("81234").await?;
//!     println!("{results:?}");
//!
//!     Ok(())
//! }
//! ```

use crate::auth::{AuthResponse, Credentials, TokenCache, AUTH_HEADER, DEFAULT_TOKEN_TTL_SECS};
use crate::error::{IceError, Result};
use crate::request_log::RequestLog;
use crate::types::CalculationResultsRequest;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use ice_risk_core::{AppConfig, VenueApi};
use nonzero_ext::nonzero;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ICE client.
#[derive(Debug, Clone)]
pub struct IceClientConfig {
    /// Base URL for the API.
    pub host: String,

    /// Authentication endpoint path.
    pub auth_path: String,

    /// Calculation results endpoint path.
    pub calculation_results_path: String,

    /// Verify TLS certificates.
    pub verify_ssl: bool,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Retries for transient failures (network, timeout, 429, 5xx).
    pub max_retries: u32,

    /// Session token cache file, if caching is enabled.
    pub token_cache_path: Option<PathBuf>,

    /// Lifetime given to newly cached tokens.
    pub token_ttl_secs: u64,

    /// Request log file, if logging is enabled.
    pub request_log_path: Option<PathBuf>,

    /// Start in the authenticated state without a token.
    pub assume_authenticated: bool,
}

impl Default for IceClientConfig {
    fn default() -> Self {
        Self {
            host: "https://localhost".to_string(),
            auth_path: "/api/authenticate".to_string(),
            calculation_results_path: "/api/calculations/results".to_string(),
            verify_ssl: false,
            timeout_secs: 30,
            requests_per_minute: nonzero!(60u32),
            max_retries: 2,
            token_cache_path: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            request_log_path: None,
            assume_authenticated: false,
        }
    }
}

impl IceClientConfig {
    /// Builds the client configuration from the application configuration.
    #[must_use]
    pub fn from_app(config: &AppConfig) -> Self {
        let venue = &config.venue;
        Self {
            host: venue.host.clone(),
            auth_path: venue.auth_path.clone(),
            calculation_results_path: config.endpoints.calculation_results.clone(),
            verify_ssl: venue.verify_ssl,
            timeout_secs: venue.timeout_secs,
            requests_per_minute: NonZeroU32::new(venue.requests_per_minute)
                .unwrap_or(nonzero!(60u32)),
            max_retries: venue.max_retries,
            token_cache_path: Some(config.storage.token_cache_path.clone()),
            token_ttl_secs: config.storage.token_ttl_secs,
            request_log_path: Some(config.storage.request_log_path.clone()),
            assume_authenticated: false,
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the authentication endpoint path.
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the number of retries for transient failures.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enables the token cache.
    #[must_use]
    pub fn with_token_cache(mut self, path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        self.token_cache_path = Some(path.into());
        self.token_ttl_secs = ttl_secs;
        self
    }

    /// Enables the request log.
    #[must_use]
    pub fn with_request_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.request_log_path = Some(path.into());
        self
    }

    /// Sets TLS certificate verification.
    #[must_use]
    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Forces the initial authentication state.
    #[must_use]
    pub fn with_assume_authenticated(mut self, authenticated: bool) -> Self {
        self.assume_authenticated = authenticated;
        self
    }
}

// =============================================================================
// IceClient
// =============================================================================

#[derive(Default)]
struct Session {
    token: Option<SecretString>,
    authenticated: bool,
}

/// ICE REST API client.
///
/// All requests are rate-limited and carry the session token once one is held.
pub struct IceClient {
    /// Configuration.
    config: IceClientConfig,

    /// HTTP client.
    http: Client,

    /// Rate limiter.
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,

    session: RwLock<Session>,
    token_cache: Option<TokenCache>,
    request_log: Option<RequestLog>,
}

impl std::fmt::Debug for IceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceClient")
            .field("host", &self.config.host)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl IceClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built or the host is empty.
    pub fn new(config: IceClientConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(IceError::Configuration("venue host is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| IceError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let token_cache = config
            .token_cache_path
            .as_ref()
            .map(|path| TokenCache::new(path, config.token_ttl_secs));
        let request_log = config.request_log_path.as_ref().map(RequestLog::new);

        let session = Session {
            token: None,
            authenticated: config.assume_authenticated,
        };

        Ok(Self {
            config,
            http,
            rate_limiter,
            session: RwLock::new(session),
            token_cache,
            request_log,
        })
    }

    /// Creates a client from the application configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Self::new(IceClientConfig::from_app(config))
    }

    /// Starts with an existing session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let session = self.session.get_mut();
        session.token = Some(SecretString::from(token.into()));
        session.authenticated = true;
        self
    }

    /// Returns the base URL.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Returns true once a login succeeded or a token was supplied.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.read().authenticated
    }

    /// Authenticates, reusing a cached token when one is still valid.
    ///
    /// Returns `Ok(false)` when the venue rejects the credentials (401/403)
    /// or accepts them without returning a token.
    ///
    /// # Errors
    /// Returns error on transport failure or an unexpected HTTP status.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        if let Some(token) = self.token_cache.as_ref().and_then(TokenCache::load) {
            self.set_token(token);
            info!("Session token loaded from cache");
            return Ok(true);
        }

        if username.is_empty() {
            return Err(IceError::Configuration("venue username is empty".to_string()));
        }

        let url = self.url(&self.config.auth_path)?;
        self.rate_limiter.until_ready().await;
        debug!(url = %url, "POST authenticate");

        let response = match self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&Credentials { username, password })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.log("POST", &url, None, false);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.log("POST", &url, Some(status.as_u16()), false);
            warn!(status = status.as_u16(), "Venue rejected credentials");
            return Ok(false);
        }
        if !status.is_success() {
            self.log("POST", &url, Some(status.as_u16()), false);
            let text = response.text().await.unwrap_or_default();
            return Err(IceError::Authentication(format!(
                "{} - {text}",
                status.as_u16()
            )));
        }

        let text = response.text().await?;
        let body: AuthResponse = serde_json::from_str(&text)?;
        let Some(token) = body.token.filter(|t| !t.is_empty()) else {
            self.log("POST", &url, Some(status.as_u16()), false);
            warn!("Authentication succeeded but no token in the response");
            return Ok(false);
        };

        if let Some(cache) = &self.token_cache {
            if let Err(e) = cache.save(&token) {
                warn!(error = %e, "Failed to cache session token");
            }
        }

        self.set_token(SecretString::from(token));
        self.log("POST", &url, Some(status.as_u16()), true);
        info!("Authenticated with venue");

        Ok(true)
    }

    /// Sends a GET request; an optional JSON body is sent as-is.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-2xx status.
    pub async fn get_json(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.request(Method::GET, endpoint, query, body).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-2xx status.
    pub async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Option<Value>> {
        self.request(Method::POST, endpoint, &[], Some(body)).await
    }

    /// Fetches the results of a calculation.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-2xx status.
    pub async fn calculation_results(&self, calculation_id: &str) -> Result<Option<Value>> {
        let body = serde_json::to_value(CalculationResultsRequest::new(calculation_id))?;
        let endpoint = self.config.calculation_results_path.clone();
        self.get_json(&endpoint, &[], Some(&body)).await
    }

    fn set_token(&self, token: SecretString) {
        let mut session = self.session.write();
        session.token = Some(token);
        session.authenticated = true;
    }

    fn url(&self, endpoint: &str) -> Result<String> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(IceError::InvalidRequest("endpoint cannot be empty".to_string()));
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        Ok(format!(
            "{}/{}",
            self.config.host.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }

    /// Sends a request, retrying transient failures.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = self.url(endpoint)?;
        let mut attempt = 0u32;

        loop {
            match self.send_once(&method, &url, query, body).await {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = e.retry_delay_secs().unwrap_or(1);
                    warn!(
                        method = %method,
                        url = %url,
                        attempt,
                        delay_secs = delay,
                        error = %e,
                        "Transient venue error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let token = {
            let session = self.session.read();
            if session.authenticated && session.token.is_none() {
                return Err(IceError::NotAuthenticated);
            }
            session
                .token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
        };

        self.rate_limiter.until_ready().await;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(ACCEPT, "application/json");
        if let Some(token) = &token {
            request = request.header(AUTH_HEADER, token.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, url, has_body = body.is_some(), "Venue request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.log(method.as_str(), url, None, false);
                return Err(e.into());
            }
        };

        let status = response.status();
        self.log(method.as_str(), url, Some(status.as_u16()), status.is_success());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(IceError::rate_limit(retry_after));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IceError::api(status.as_u16(), text));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&text)?;
        Ok((!value.is_null()).then_some(value))
    }

    fn log(&self, method: &str, url: &str, status: Option<u16>, success: bool) {
        if let Some(log) = &self.request_log {
            if let Err(e) = log.append(method, url, status, success) {
                warn!(path = %log.path().display(), error = %e, "Failed to write request log");
            }
        }
    }
}

#[async_trait]
impl VenueApi for IceClient {
    async fn authenticate(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        Ok(self.login(username, password).await?)
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> anyhow::Result<Option<Value>> {
        Ok(self.get_json(endpoint, query, body).await?)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> anyhow::Result<Option<Value>> {
        Ok(self.post_json(endpoint, body).await?)
    }

    async fn get_calculation_results(&self, calculation_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.calculation_results(calculation_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Config Tests ====================

    #[test]
    fn test_client_config_default() {
        let config = IceClientConfig::default();
        assert_eq!(config.requests_per_minute.get(), 60);
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.verify_ssl);
        assert!(config.token_cache_path.is_none());
    }

    #[test]
    fn test_client_config_builder() {
        let config = IceClientConfig::default()
            .with_host("https://ice.test")
            .with_rate_limit(nonzero!(10u32))
            .with_timeout_secs(5)
            .with_max_retries(0)
            .with_token_cache("cache/token.json", 60);

        assert_eq!(config.host, "https://ice.test");
        assert_eq!(config.requests_per_minute.get(), 10);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.token_ttl_secs, 60);
    }

    #[test]
    fn test_config_from_app() {
        let mut app = AppConfig::default();
        app.venue.host = "https://ice.example".to_string();
        app.venue.requests_per_minute = 0;

        let config = IceClientConfig::from_app(&app);
        assert_eq!(config.host, "https://ice.example");
        assert_eq!(config.requests_per_minute.get(), 60);
        assert_eq!(config.calculation_results_path, app.endpoints.calculation_results);
        assert_eq!(config.request_log_path, Some(app.storage.request_log_path));
    }

    // ==================== URL Construction Tests ====================

    #[test]
    fn test_url_joins_host_and_endpoint() {
        let client = IceClient::new(IceClientConfig::default().with_host("https://ice.test/")).unwrap();
        assert_eq!(client.url("/api/x").unwrap(), "https://ice.test/api/x");
        assert_eq!(client.url("api/x").unwrap(), "https://ice.test/api/x");
        assert_eq!(client.url("https://other.test/y").unwrap(), "https://other.test/y");
        assert!(matches!(client.url(" "), Err(IceError::InvalidRequest(_))));
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            IceClient::new(IceClientConfig::default().with_host("")),
            Err(IceError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_does_not_expose_token() {
        let client = IceClient::new(IceClientConfig::default())
            .unwrap()
            .with_token("super-secret-token");
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(client.is_authenticated());
    }
}
