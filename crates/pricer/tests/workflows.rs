use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use ice_risk_core::{AppConfig, VenueApi};
use ice_risk_data::DataError;
use ice_risk_pricer::{
    AssetClass, Direction, IceCalculator, InstrumentLeg, OptionType, Pricer, PricerError,
    PricingLog, RerunPolicy, Valuation,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

type Responder = Box<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// In-memory venue: records every call, answers POSTs with `responder` and
/// calculation results from `results`.
struct FakeVenue {
    responder: Responder,
    results: Mutex<HashMap<String, Value>>,
    posts: Mutex<Vec<(String, Value)>>,
    result_calls: Mutex<Vec<String>>,
}

impl FakeVenue {
    fn new(responder: impl Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            results: Mutex::new(HashMap::new()),
            posts: Mutex::new(Vec::new()),
            result_calls: Mutex::new(Vec::new()),
        }
    }

    fn accepting(calculation_id: i64) -> Self {
        Self::new(move |_, _| Some(json!({"calculationId": calculation_id})))
    }

    fn with_results(self, id: &str, payload: Value) -> Self {
        self.results.lock().insert(id.to_string(), payload);
        self
    }

    fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().clone()
    }

    fn result_calls(&self) -> usize {
        self.result_calls.lock().len()
    }
}

#[async_trait]
impl VenueApi for FakeVenue {
    async fn authenticate(&self, _: &str, _: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn get(
        &self,
        _: &str,
        _: &[(String, String)],
        _: Option<&Value>,
    ) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> anyhow::Result<Option<Value>> {
        self.posts.lock().push((endpoint.to_string(), body.clone()));
        Ok((self.responder)(endpoint, body))
    }

    async fn get_calculation_results(&self, calculation_id: &str) -> anyhow::Result<Option<Value>> {
        self.result_calls.lock().push(calculation_id.to_string());
        Ok(self.results.lock().get(calculation_id).cloned())
    }
}

/// Prices each instrument at its notional.
fn price_at_notional(_: &str, body: &Value) -> Option<Value> {
    let instruments: Vec<Value> = body["instruments"]
        .as_array()?
        .iter()
        .map(|i| {
            json!({
                "id": i["ID"],
                "results": [{"code": "price", "value": i["Notional"], "currency": "EUR"}]
            })
        })
        .collect();
    Some(json!({"instruments": instruments}))
}

fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.registry_path = dir.path().join("registry.csv");
    config.storage.results_cache_dir = dir.path().join("results");
    config.storage.pricing_log_path = dir.path().join("logs").join("pricing.csv");
    config.books.hv_subset_n1 = vec!["HV-SUB".to_string()];
    config.books.hv_all = vec!["HV-1".to_string(), "HV-2".to_string()];
    config.counterparties = vec!["MorganStanley".to_string(), "Saxo Bank".to_string()];
    config
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 25).unwrap()
}

fn at(text: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn im_results() -> Value {
    json!({
        "results": [
            {"group": "MorganStanley", "postIm": 1_500_000.0},
            {"group": "Saxo Bank", "postIm": 250_000.0}
        ]
    })
}

// ==================== Result Cache Tests ====================

#[tokio::test]
async fn test_calculation_results_are_cached() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(1).with_results("42", json!({"tradeLegs": []})));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));

    let first = calc.calculation_results(42).await.unwrap();
    let second = calc.calculation_results(42).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(venue.result_calls(), 1);
    assert!(dir.path().join("results").join("42_results.json").exists());
}

// ==================== Bilateral IM Tests ====================

#[tokio::test]
async fn test_bilateral_im_submits_once_then_reuses_registry() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(81234).with_results("81234", im_results()));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));

    let first = calc.bilateral_im_by_counterparty(day(), "HV").await.unwrap();
    let second = calc.bilateral_im_by_counterparty(day(), "HV").await.unwrap();

    assert_eq!(first, im_results()["results"]);
    assert_eq!(first, second);

    let posts = venue.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "/api/calculations/bilateral-im");
    assert_eq!(
        posts[0].1,
        json!({
            "valuation": {"type": "EOD", "date": "2025-07-25"},
            "bookNames": ["HV-SUB"],
            "model": "SIMM",
            "counterPartyNames": ["MorganStanley", "Saxo Bank"]
        })
    );

    let records = calc.registry().records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 81234);
    assert_eq!(records[0].date, at("2025-07-25 00:00:00"));
    assert_eq!(records[0].calc_type, "IM");
    assert_eq!(records[0].fund, "HV");
}

#[tokio::test]
async fn test_post_im_for_counterparty() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(5).with_results("5", im_results()));
    let calc = IceCalculator::new(venue, &config(&dir));

    let im = calc.post_im(day(), "Saxo Bank").await.unwrap();
    assert_eq!(im, Some(json!(250_000.0)));

    let missing = calc.post_im(day(), "Unknown Bank").await.unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_portfolio_im_uses_its_own_type() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(9).with_results("9", im_results()));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));

    calc.portfolio_im(day()).await.unwrap();

    let posts = venue.posts();
    assert!(posts[0].1.get("counterPartyNames").is_none());
    let records = calc.registry().records().unwrap();
    assert_eq!(records[0].calc_type, "IM-ptf");
}

#[tokio::test]
async fn test_rejected_submission_records_nothing() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::new(|_, _| Some(json!({"status": "rejected"}))));
    let calc = IceCalculator::new(venue, &config(&dir));

    let result = calc.bilateral_im_by_counterparty(day(), "HV").await;
    assert!(matches!(
        result,
        Err(PricerError::MissingCalculationId { ref calc_type }) if calc_type == "IM"
    ));
    assert!(calc.registry().records().unwrap().is_empty());
}

// ==================== MV Tests ====================

#[tokio::test]
async fn test_mv_latest_without_history_is_no_data() {
    let dir = TempDir::new().unwrap();
    let calc = IceCalculator::new(Arc::new(FakeVenue::accepting(1)), &config(&dir));

    assert!(matches!(
        calc.mv_and_greeks_latest(RerunPolicy::UseExisting).await,
        Err(PricerError::NoData { .. })
    ));
}

#[tokio::test]
async fn test_mv_latest_uses_most_recent_run() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(
        FakeVenue::accepting(1).with_results("12", json!({"tradeLegs": [{"leg": "latest"}]})),
    );
    let calc = IceCalculator::new(venue.clone(), &config(&dir));
    calc.registry().record(11, "2025-07-24 10:00:00", "MV", "HV").unwrap();
    calc.registry().record(12, "2025-07-25 10:00:00", "MV", "HV").unwrap();

    let legs = calc.mv_and_greeks_latest(RerunPolicy::UseExisting).await.unwrap();
    assert_eq!(legs, json!([{"leg": "latest"}]));
    assert!(venue.posts().is_empty());
}

#[tokio::test]
async fn test_mv_rerun_submits_real_time_and_records() {
    let dir = TempDir::new().unwrap();
    let venue =
        Arc::new(FakeVenue::accepting(77).with_results("77", json!({"tradeLegs": [1, 2]})));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));

    let legs = calc.mv_and_greeks_latest(RerunPolicy::Rerun).await.unwrap();
    assert_eq!(legs, json!([1, 2]));

    let posts = venue.posts();
    assert_eq!(posts[0].0, "/api/calculations/invoke");
    assert_eq!(
        posts[0].1,
        json!({"valuation": {"type": "RealTime"}, "bookNames": ["HV-1", "HV-2"], "includeSubBooks": "true"})
    );
    assert_eq!(calc.registry().lookup_most_recent("MV", "HV").unwrap().map(|(_, id)| id), Some(77));
}

#[tokio::test]
async fn test_mv_for_day_reuses_same_day_run() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(1).with_results("30", json!({"tradeLegs": ["same-day"]})));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));
    calc.registry().record(30, "2025-07-25 08:00:00", "MV", "HV").unwrap();

    let legs = calc.mv_and_greeks_for_day(day()).await.unwrap();
    assert_eq!(legs, json!(["same-day"]));
    assert!(venue.posts().is_empty());
}

#[tokio::test]
async fn test_mv_for_day_runs_when_no_run_that_day() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(31).with_results("31", json!({"tradeLegs": ["fresh"]})));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));
    calc.registry().record(30, "2025-07-24 08:00:00", "MV", "HV").unwrap();

    let legs = calc.mv_and_greeks_for_day(day()).await.unwrap();
    assert_eq!(legs, json!(["fresh"]));

    let posts = venue.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1["valuation"], json!({"type": "EOD", "date": "2025-07-25"}));
    assert_eq!(
        calc.registry()
            .lookup_exact("2025-07-25 00:00:00", "MV", "HV", ice_risk_data::MatchMode::TimeSensitive)
            .unwrap(),
        Some(31)
    );
}

#[tokio::test]
async fn test_mv_for_day_ignores_late_run_on_previous_day() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(
        FakeVenue::accepting(99)
            .with_results("20", json!({"tradeLegs": ["same-day"]}))
            .with_results("99", json!({"tradeLegs": ["new"]})),
    );
    let calc = IceCalculator::new(venue.clone(), &config(&dir));
    calc.registry().record(10, "2025-07-24 23:00:00", "MV", "HV").unwrap();
    calc.registry().record(20, "2025-07-25 10:00:00", "MV", "HV").unwrap();

    let legs = calc.mv_and_greeks_for_day(day()).await.unwrap();
    assert_eq!(legs, json!(["same-day"]));
    assert!(venue.posts().is_empty());
}

#[tokio::test]
async fn test_total_mv_matches_on_calendar_day() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::accepting(1).with_results("7", json!({"total": 123.4})));
    let calc = IceCalculator::new(venue.clone(), &config(&dir));
    calc.registry().record(7, "2025-07-25 09:30:00", "MV", "HV").unwrap();

    let payload = calc.total_mv(at("2025-07-25 18:00:00")).await.unwrap();
    assert_eq!(payload, json!({"total": 123.4}));
    assert!(venue.posts().is_empty());
}

// ==================== Pricer Tests ====================

fn fx_legs() -> Vec<InstrumentLeg> {
    let leg = |pair: &str, notional: f64, stratid: i64| {
        InstrumentLeg::fx(pair, Direction::Buy, OptionType::Call, "ATM", notional, "2026-07-22")
            .with_stratid(stratid)
    };
    vec![
        leg("EURUSD", 10.0, 1),
        leg("EURUSD", 20.0, 1),
        leg("USDJPY", 5.0, 2),
        leg("EURCHF", 1.0, 3),
        leg("EURGBP", 2.0, 3),
    ]
}

#[tokio::test]
async fn test_price_batches_and_joins_request_columns() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::new(price_at_notional));
    let pricer = Pricer::new(venue.clone(), &config(&dir)).with_batch_size(2);

    let table = pricer
        .price(&fx_legs(), AssetClass::Fx, &Valuation::end_of_day(day()))
        .await
        .unwrap();

    assert_eq!(table.height(), 5);
    assert_eq!(table.cell(2, "pair"), json!("USDJPY"));
    assert_eq!(table.cell(2, "price"), json!(5.0));
    assert_eq!(table.cell(2, "price_currency"), json!("EUR"));
    assert_eq!(table.cell(4, "id"), json!(4));

    let posts = venue.posts();
    assert_eq!(posts.len(), 3);
    assert!(posts.iter().all(|(endpoint, _)| endpoint == "/api/pricer/fx/calculate"));
    assert_eq!(posts[2].1["instruments"].as_array().unwrap().len(), 1);
    assert_eq!(
        posts[0].1["artifacts"],
        json!({"instruments": ["Spread", "Theta"], "underlyingAssets": ["Spot", "ForwardRate"]})
    );
    assert_eq!(posts[0].1["valuation"], json!({"type": "EOD", "Date": "2025-07-25"}));

    let log = fs::read_to_string(dir.path().join("logs").join("pricing.csv")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("2025-07-25 ") && lines[1].ends_with(",2"));
    assert!(lines[3].ends_with(",1"));
}

#[tokio::test]
async fn test_price_without_instruments_is_empty_result() {
    let dir = TempDir::new().unwrap();
    let pricer = Pricer::new(Arc::new(FakeVenue::new(|_, _| None)), &config(&dir))
        .with_pricing_log(None);

    let result = pricer
        .price(&fx_legs(), AssetClass::Fx, &Valuation::real_time())
        .await;
    assert!(matches!(
        result,
        Err(PricerError::Data(DataError::EmptyResult))
    ));
    assert!(!dir.path().join("logs").exists());
}

#[tokio::test]
async fn test_price_strategy_aggregates_by_stratid() {
    let dir = TempDir::new().unwrap();
    let pricer = Pricer::new(Arc::new(FakeVenue::new(price_at_notional)), &config(&dir))
        .with_pricing_log(Some(PricingLog::new(dir.path().join("pricing.csv"))));

    let pricing = pricer
        .price_strategy(&fx_legs(), AssetClass::Fx, &Valuation::real_time())
        .await
        .unwrap();

    assert_eq!(pricing.details.height(), 5);
    assert_eq!(pricing.aggregated.height(), 3);
    assert_eq!(pricing.aggregated.cell(0, "stratid"), json!(1));
    assert_eq!(pricing.aggregated.cell(0, "price"), json!(30.0));
    assert_eq!(pricing.aggregated.cell(1, "price"), json!(5.0));
    assert_eq!(pricing.aggregated.cell(2, "price"), json!(3.0));
}

#[tokio::test]
async fn test_invalid_leg_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let venue = Arc::new(FakeVenue::new(price_at_notional));
    let pricer = Pricer::new(venue.clone(), &config(&dir)).with_pricing_log(None);

    let result = pricer
        .price(&fx_legs(), AssetClass::Equity, &Valuation::real_time())
        .await;
    assert!(matches!(result, Err(PricerError::InvalidLeg { index: 0, .. })));
    assert!(venue.posts().is_empty());
}
