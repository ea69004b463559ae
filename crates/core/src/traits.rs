use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Transport/auth capability the facades are built on.
///
/// `Ok(None)` means the venue answered without data (empty body or JSON
/// `null`); callers must not read it as an empty-but-valid payload.
/// `Err` means the call itself failed (transport, HTTP status, auth).
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool>;

    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>>;

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Option<Value>>;

    async fn get_calculation_results(&self, calculation_id: &str) -> Result<Option<Value>>;
}
