//! Session token handling for the venue.
//!
//! The venue authenticates with a username/password POST and hands back a
//! token that is sent on every later request in the `AuthenticationToken`
//! header. Tokens are cached on disk so short-lived processes do not log in on
//! every run.
//!
//! # Security
//!
//! - Tokens and passwords are held as [`SecretString`]
//! - Neither is ever logged
//! - The cache file holds the token in clear text; protect its directory

use crate::error::{IceError, Result};
use chrono::{Local, NaiveDateTime};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "AuthenticationToken";

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Credentials body for the authentication endpoint.
#[derive(Serialize)]
pub(crate) struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Authentication endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// On-disk token cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    /// Local time the token was obtained.
    pub timestamp: NaiveDateTime,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expiration: u64,
}

impl CachedToken {
    /// Returns true while the token is younger than its expiration.
    #[must_use]
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        let age = (now - self.timestamp).num_seconds();
        !self.token.is_empty() && age < i64::try_from(self.expiration).unwrap_or(i64::MAX)
    }
}

/// JSON file holding the last session token.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
    ttl_secs: u64,
}

impl TokenCache {
    /// Creates a cache at `path` whose new entries expire after `ttl_secs`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl_secs,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached token if present and not expired.
    ///
    /// An unreadable or corrupt cache is treated as empty.
    #[must_use]
    pub fn load(&self) -> Option<SecretString> {
        if !self.path.exists() {
            return None;
        }

        let entry = fs::read(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<CachedToken>(&bytes).map_err(|e| e.to_string())
            });

        match entry {
            Ok(entry) if entry.is_valid_at(Local::now().naive_local()) => {
                debug!(path = %self.path.display(), "Loaded token from cache");
                Some(SecretString::from(entry.token))
            }
            Ok(_) => {
                debug!(path = %self.path.display(), "Cached token expired");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token cache");
                None
            }
        }
    }

    /// Writes `token` with the current local time.
    ///
    /// # Errors
    /// Returns [`IceError::TokenCache`] if the file cannot be written.
    pub fn save(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(IceError::TokenCache("refusing to cache an empty token".to_string()));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    IceError::TokenCache(format!("{}: {e}", parent.display()))
                })?;
            }
        }

        let entry = CachedToken {
            token: token.to_string(),
            timestamp: Local::now().naive_local(),
            expiration: self.ttl_secs,
        };
        let json = serde_json::to_vec(&entry)?;
        fs::write(&self.path, json)
            .map_err(|e| IceError::TokenCache(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), ttl_secs = self.ttl_secs, "Cached session token");
        Ok(())
    }
}
