use ice_risk_client::{IceClient, IceClientConfig, IceError, TokenCache};
use ice_risk_core::VenueApi;
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> IceClientConfig {
    IceClientConfig::default()
        .with_host(server.uri())
        .with_auth_path("/api/authenticate")
        .with_max_retries(0)
}

// ==================== Authentication Tests ====================

#[tokio::test]
async fn test_login_caches_token_and_sends_header() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("cache").join("token.json");

    Mock::given(method("POST"))
        .and(path("/api/authenticate"))
        .and(body_json(json!({"username": "analyst", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/trades"))
        .and(header("AuthenticationToken", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trades": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server).with_token_cache(&cache_path, 3600)).unwrap();
    assert!(client.login("analyst", "pw").await.unwrap());
    assert!(client.is_authenticated());
    assert!(cache_path.exists());

    let trades = client.get_json("/api/trades", &[], None).await.unwrap();
    assert_eq!(trades, Some(json!({"trades": []})));
}

#[tokio::test]
async fn test_login_reuses_cached_token() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("token.json");
    TokenCache::new(&cache_path, 3600).save("cached-tok").unwrap();

    Mock::given(method("POST"))
        .and(path("/api/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .and(header("AuthenticationToken", "cached-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server).with_token_cache(&cache_path, 3600)).unwrap();
    assert!(client.login("analyst", "pw").await.unwrap());
    client.get_json("/api/ping", &[], None).await.unwrap();
}

#[tokio::test]
async fn test_login_without_token_returns_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();
    assert!(!client.login("analyst", "pw").await.unwrap());
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn test_login_rejected_returns_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/authenticate"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();
    assert!(!client.login("analyst", "wrong").await.unwrap());
}

#[tokio::test]
async fn test_login_server_error_is_err() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/authenticate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();
    assert!(matches!(
        client.login("analyst", "pw").await,
        Err(IceError::Authentication(_))
    ));
}

#[tokio::test]
async fn test_inconsistent_auth_state_is_rejected() {
    let server = MockServer::start().await;
    let client = IceClient::new(config(&server).with_assume_authenticated(true)).unwrap();

    assert!(matches!(
        client.get_json("/api/ping", &[], None).await,
        Err(IceError::NotAuthenticated)
    ));
}

// ==================== Response Handling Tests ====================

#[tokio::test]
async fn test_empty_and_null_bodies_are_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/null"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();
    assert_eq!(client.post_json("/api/empty", &json!({})).await.unwrap(), None);
    assert_eq!(client.post_json("/api/null", &json!({})).await.unwrap(), None);
}

#[tokio::test]
async fn test_http_errors_are_mapped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such calculation"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();

    match client.get_json("/api/missing", &[], None).await {
        Err(IceError::Api {
            status_code,
            message,
        }) => {
            assert_eq!(status_code, 404);
            assert!(message.contains("no such calculation"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert!(matches!(
        client.get_json("/api/busy", &[], None).await,
        Err(IceError::RateLimit {
            retry_after_secs: 7
        })
    ));
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server).with_max_retries(1)).unwrap();
    let body = client.get_json("/api/flaky", &[], None).await.unwrap();
    assert_eq!(body, Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/trades/search"))
        .and(query_param("book", "HV_ALL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .expect(1)
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap();
    let query = vec![("book".to_string(), "HV_ALL".to_string())];
    let body = client
        .get_json("/api/trades/search", &query, None)
        .await
        .unwrap();
    assert_eq!(body, Some(json!([1, 2])));
}

// ==================== Calculation Results Tests ====================

#[tokio::test]
async fn test_get_calculation_results_sends_string_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/calculations/results"))
        .and(body_json(json!({
            "calculationId": "81234",
            "IncludeCalculationDetails": "Yes",
            "includeResultsInHomeCurrency": "Yes",
            "includeResultsInPortfolioCurrency": "No"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"instruments": [{"id": 1}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server)).unwrap().with_token("tok");
    let venue: &dyn VenueApi = &client;
    let results = venue.get_calculation_results("81234").await.unwrap();
    assert_eq!(results, Some(json!({"instruments": [{"id": 1}]})));
}

// ==================== Request Log Tests ====================

#[tokio::test]
async fn test_requests_are_logged() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("logs").join("requests.csv");

    Mock::given(method("POST"))
        .and(path("/api/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"calculationId": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fail"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let client = IceClient::new(config(&server).with_request_log(&log_path)).unwrap();
    client.post_json("/api/ok", &json!({})).await.unwrap();
    assert!(client.post_json("/api/fail", &json!({})).await.is_err());

    let text = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains(",POST,") && lines[1].ends_with("/api/ok,200,true"));
    assert!(lines[2].ends_with("/api/fail,400,false"));
}
