use chrono::{Duration as ChronoDuration, NaiveDate};
use forecast_engine::cache::DataCache;
use forecast_engine::config::EngineSettings;
use forecast_engine::error::{ForecastError, ProviderError};
use forecast_engine::forecast::{SequenceConfig, TrendForecaster};
use forecast_engine::market_data::{DataOrigin, MarketDataSource};
use forecast_engine::models::Bar;
use forecast_engine::providers::{PriceProvider, SyntheticGenerator};
use forecast_engine::service::{ForecastRequest, ForecastService, ModelChoice};
use forecast_engine::verify::StoredPrediction;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn history_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

/// Serves a fixed one-year synthetic history for any symbol and counts requests.
struct RecordedProvider {
    calls: Arc<AtomicUsize>,
}

impl PriceProvider for RecordedProvider {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn fetch_bars(&self, symbol: &str, _period: &str) -> Result<Vec<Bar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticGenerator.generate_until(symbol, "1y", history_end()))
    }
}

struct OfflineProvider;

impl PriceProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn fetch_bars(&self, symbol: &str, _period: &str) -> Result<Vec<Bar>, ProviderError> {
        Err(ProviderError::Http(format!("connection refused for {}", symbol)))
    }
}

fn recorded_source(root: &Path, calls: &Arc<AtomicUsize>) -> MarketDataSource {
    let settings = EngineSettings::rooted_at(root);
    MarketDataSource::new(
        DataCache::new(settings.cache_dir, settings.cache_ttl),
        vec![
            Box::new(OfflineProvider),
            Box::new(RecordedProvider {
                calls: Arc::clone(calls),
            }),
        ],
        None,
    )
}

fn small_sequence_config() -> SequenceConfig {
    SequenceConfig {
        lookback: 20,
        hidden_size: 4,
        epochs: 1,
        ..SequenceConfig::default()
    }
}

fn service(root: &Path, calls: &Arc<AtomicUsize>) -> ForecastService {
    let settings = EngineSettings::rooted_at(root);
    ForecastService::new(
        Arc::new(recorded_source(root, calls)),
        settings.prophet_model_dir,
        settings.lstm_model_dir,
    )
    .with_sequence_config(small_sequence_config())
}

#[test]
fn second_fetch_within_an_hour_is_served_from_cache() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let source = recorded_source(dir.path(), &calls);

    let (first, first_origin) = source.fetch_with_origin("BTC-USD", "5d");
    let (second, second_origin) = source.fetch_with_origin("BTC-USD", "5d");

    assert_eq!(first_origin, DataOrigin::Provider("recorded"));
    assert_eq!(second_origin, DataOrigin::Cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert!(dir.path().join("cache").join("BTC_USD_5d_v2.bin").exists());
}

#[test]
fn forecast_both_families_on_trimmed_history() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(dir.path(), &calls);

    let response = service
        .train_and_forecast(&ForecastRequest {
            symbol: "AAPL".to_string(),
            model: ModelChoice::Both,
            training_period: "120d".to_string(),
            horizon: 14,
        })
        .unwrap();

    assert_eq!(response.name, "Apple Inc.");
    assert_eq!(response.historical_data.len(), 366);
    let expected_start = history_end() - ChronoDuration::days(120);
    assert_eq!(
        response.training_start_date.as_deref(),
        Some(expected_start.format("%Y-%m-%d").to_string().as_str())
    );

    let prophet = response.prophet.as_ref().expect("prophet forecast");
    let lstm = response.lstm.as_ref().expect("lstm forecast");
    assert_eq!(prophet.predictions.len(), 14);
    assert_eq!(lstm.predictions.len(), 14);
    assert_eq!(
        prophet.predictions[0].date,
        history_end() + ChronoDuration::days(1)
    );
    assert!(prophet.predictions.iter().all(|p| p.lower.is_some()));
    assert!(lstm.predictions.iter().all(|p| p.lower.is_none() && p.value >= 0.0));

    let json = serde_json::to_value(&response).unwrap();
    assert!(json["prophet"]["predictions"][0]["ds"].is_string());
    assert!(json["lstm"]["metrics"]["mape"].is_number());

    let mut reloaded = TrendForecaster::new(dir.path().join("models").join("prophet"));
    assert!(reloaded.load("AAPL").unwrap());
}

#[test]
fn single_family_request_omits_the_other() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let response = service(dir.path(), &calls)
        .train_and_forecast(&ForecastRequest {
            symbol: "^GSPC".to_string(),
            model: ModelChoice::Prophet,
            training_period: "5y".to_string(),
            horizon: 7,
        })
        .unwrap();

    assert!(response.lstm.is_none());
    assert!(response.training_start_date.is_none());
    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("lstm").is_none());
}

#[test]
fn horizon_outside_range_is_rejected_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(dir.path(), &calls);

    for horizon in [6, 31] {
        let err = service
            .train_and_forecast(&ForecastRequest {
                symbol: "AAPL".to_string(),
                model: ModelChoice::Prophet,
                training_period: "5y".to_string(),
                horizon,
            })
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidHorizon { .. }));
        assert!(err.is_bad_request());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn too_short_training_window_reports_minimum() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let err = service(dir.path(), &calls)
        .train_and_forecast(&ForecastRequest {
            symbol: "AAPL".to_string(),
            model: ModelChoice::Lstm,
            training_period: "15d".to_string(),
            horizon: 7,
        })
        .unwrap_err();

    assert!(matches!(
        err,
        ForecastError::InsufficientHistory { model: "lstm", required: 31, actual: 16 }
    ));
    assert!(err.to_string().contains("at least 31"));
}

#[test]
fn indicators_and_verification_round_through_the_service() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(dir.path(), &calls);

    let indicators = service.compute_indicators("ETH-USD", "1y");
    assert_eq!(indicators.indicators.len(), 366);
    assert!(indicators
        .indicators
        .iter()
        .all(|row| (0.0..=100.0).contains(&row.rsi)));

    let series = service.fetch_series("ETH-USD", "1y");
    let last_rows: Vec<_> = series.data.iter().rev().take(3).collect();
    let stored: StoredPrediction = serde_json::from_value(serde_json::json!({
        "id": 1,
        "symbol": "ETH-USD",
        "created_at": "2024-06-20T09:00:00Z",
        "prophet_data": last_rows
            .iter()
            .map(|row| serde_json::json!({"ds": row.date, "yhat": row.close + 10.0}))
            .collect::<Vec<_>>(),
    }))
    .unwrap();

    let report = service.verify(stored);
    let prophet = report.metrics.prophet.expect("prophet verification");
    assert_eq!(prophet.days_verified, 3);
    assert!((prophet.mae - 10.0).abs() < 1e-6);
    assert!(report.metrics.lstm.is_none());
    assert_eq!(
        report.actual_data.first().map(|p| p.date.clone()),
        Some("2024-04-22".to_string())
    );
}
