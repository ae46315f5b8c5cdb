//! Scores a previously stored forecast against prices realized since it was made.

use crate::forecast::error_metrics;
use crate::market_data::MarketDataSource;
use crate::models::{ClosePoint, ForecastPoint, VerificationResult};
use crate::preprocess;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

const VERIFY_PERIOD: &str = "max";
const LOOKBACK_DAYS: i64 = 60;

/// A forecast saved by the caller. Model payloads may be a JSON array of
/// `{ds, yhat, ...}` or a string holding that array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub id: i64,
    #[serde(alias = "asset_symbol")]
    pub symbol: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prophet_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lstm_data: Option<serde_json::Value>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow!("unrecognized timestamp '{}'", raw))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prophet: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lstm: Option<VerificationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub prediction: StoredPrediction,
    pub actual_data: Vec<ClosePoint>,
    pub metrics: VerificationMetrics,
}

fn parse_forecast(payload: &serde_json::Value) -> Result<Vec<ForecastPoint>> {
    let points = match payload {
        serde_json::Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    points.context("stored forecast is not a [{ds, yhat}] array")
}

/// Inner join on date. `None` when the payload is missing, empty or has no
/// overlapping day.
fn score_model(
    payload: Option<&serde_json::Value>,
    actual: &HashMap<NaiveDate, f64>,
) -> Result<Option<VerificationResult>> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    if payload.is_null() || payload.as_str().map(str::is_empty).unwrap_or(false) {
        return Ok(None);
    }

    let mut realized = Vec::new();
    let mut predicted = Vec::new();
    for point in parse_forecast(payload)? {
        if let Some(close) = actual.get(&point.date) {
            realized.push(*close);
            predicted.push(point.value);
        }
    }
    if realized.is_empty() {
        return Ok(None);
    }

    let metrics = error_metrics(&realized, &predicted, 0.0);
    // Zero closes have no percentage error; MAPE is NaN (null in JSON) when
    // every realized close is zero.
    let (nonzero_realized, nonzero_predicted): (Vec<f64>, Vec<f64>) = realized
        .iter()
        .zip(&predicted)
        .filter(|(close, _)| **close != 0.0)
        .map(|(close, value)| (*close, *value))
        .unzip();
    let mape = error_metrics(&nonzero_realized, &nonzero_predicted, 0.0).mape;
    Ok(Some(VerificationResult {
        mae: metrics.mae,
        rmse: metrics.rmse,
        mape,
        days_verified: realized.len(),
    }))
}

fn score_or_log(
    family: &str,
    payload: Option<&serde_json::Value>,
    actual: &HashMap<NaiveDate, f64>,
) -> Option<VerificationResult> {
    score_model(payload, actual).unwrap_or_else(|err| {
        log::warn!("Error calculating {} verification metrics: {:#}", family, err);
        None
    })
}

/// First trading day whose midnight is not earlier than `created_at` minus
/// the lookback.
fn window_start(created_at: NaiveDateTime) -> NaiveDate {
    let cutoff = created_at - Duration::days(LOOKBACK_DAYS);
    if cutoff.time() == NaiveTime::MIN {
        cutoff.date()
    } else {
        cutoff.date() + Duration::days(1)
    }
}

pub fn verify(stored: StoredPrediction, source: &MarketDataSource) -> VerificationReport {
    let raw = source.fetch(&stored.symbol, VERIFY_PERIOD);
    let cleaned = preprocess::clean(&raw);
    let window = cleaned.since(window_start(stored.created_at));
    log::info!(
        "Verifying prediction {} for {} against {} realized rows",
        stored.id,
        stored.symbol,
        window.len()
    );

    let actual: HashMap<NaiveDate, f64> = window.bars.iter().map(|bar| (bar.date, bar.close)).collect();
    let metrics = VerificationMetrics {
        prophet: score_or_log("prophet", stored.prophet_data.as_ref(), &actual),
        lstm: score_or_log("lstm", stored.lstm_data.as_ref(), &actual),
    };

    VerificationReport {
        actual_data: window.close_records(),
        prediction: stored,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataCache;
    use crate::error::ProviderError;
    use crate::models::Bar;
    use crate::providers::PriceProvider;
    use serde_json::json;

    struct FixedProvider;

    impl PriceProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn fetch_bars(&self, _symbol: &str, _period: &str) -> std::result::Result<Vec<Bar>, ProviderError> {
            Ok((1..=20)
                .map(|day| {
                    let close = 100.0 + day as f64;
                    Bar::new(
                        NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                        close,
                        close,
                        close,
                        close,
                        1.0,
                    )
                })
                .collect())
        }
    }

    fn source(dir: &std::path::Path) -> MarketDataSource {
        MarketDataSource::new(
            DataCache::new(dir, std::time::Duration::from_secs(3600)),
            vec![Box::new(FixedProvider)],
            None,
        )
    }

    fn stored(prophet: Option<serde_json::Value>, lstm: Option<serde_json::Value>) -> StoredPrediction {
        serde_json::from_value(json!({
            "id": 7,
            "asset_symbol": "AAPL",
            "asset_name": "Apple Inc.",
            "created_at": "2024-03-10T12:30:00",
            "prophet_data": prophet,
            "lstm_data": lstm,
        }))
        .unwrap()
    }

    #[test]
    fn scores_overlapping_days_and_omits_missing_family() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let prediction = stored(
            Some(json!([
                {"ds": "2024-03-18", "yhat": 120.0},
                {"ds": "2024-03-19", "yhat": 117.0},
                {"ds": "2024-04-30", "yhat": 150.0}
            ])),
            None,
        );

        let report = verify(prediction, &source(dir.path()));
        let prophet = report.metrics.prophet.expect("prophet metrics");
        assert_eq!(prophet.days_verified, 2);
        // actual closes are 118 and 119
        assert!((prophet.mae - 2.0).abs() < 1e-9);
        assert!(report.metrics.lstm.is_none());
        assert_eq!(report.actual_data.len(), 20);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["metrics"].get("lstm").is_none());
        assert_eq!(json["prediction"]["asset_name"], "Apple Inc.");
    }

    #[test]
    fn malformed_payload_does_not_block_other_family() {
        let dir = tempfile::tempdir().unwrap();
        let prediction = stored(
            Some(json!("not json at all")),
            Some(json!("[{\"ds\": \"2024-03-05\", \"yhat\": 105.0}]")),
        );

        let report = verify(prediction, &source(dir.path()));
        assert!(report.metrics.prophet.is_none());
        let lstm = report.metrics.lstm.expect("lstm metrics");
        assert_eq!(lstm.days_verified, 1);
        assert!(lstm.mae.abs() < 1e-9);
    }

    #[test]
    fn no_overlap_is_silently_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let prediction = stored(Some(json!([{"ds": "2025-01-01", "yhat": 1.0}])), Some(json!([])));
        let report = verify(prediction, &source(dir.path()));
        assert_eq!(report.metrics, VerificationMetrics::default());
    }

    #[test]
    fn lookback_compares_against_the_full_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut prediction = stored(Some(json!([{"ds": "2024-03-06", "yhat": 100.0}])), None);
        prediction.created_at = parse_timestamp("2024-05-05T06:00:00").unwrap();

        let report = verify(prediction, &source(dir.path()));
        assert_eq!(report.actual_data.len(), 14);
        assert_eq!(report.actual_data[0].date, "2024-03-07");
        assert!(report.metrics.prophet.is_none());

        let midnight = parse_timestamp("2024-05-05T00:00:00").unwrap();
        assert_eq!(window_start(midnight), NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
    }

    #[test]
    fn zero_closes_are_left_out_of_mape() {
        let actual: HashMap<NaiveDate, f64> = [
            (NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 0.0),
            (NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), 50.0),
        ]
        .into_iter()
        .collect();
        let payload = json!([
            {"ds": "2024-03-01", "yhat": 2.0},
            {"ds": "2024-03-02", "yhat": 55.0}
        ]);

        let result = score_model(Some(&payload), &actual).unwrap().unwrap();
        assert_eq!(result.days_verified, 2);
        assert!((result.mae - 3.5).abs() < 1e-9);
        assert!((result.mape - 10.0).abs() < 1e-9);

        let only_zero = json!([{"ds": "2024-03-01", "yhat": 2.0}]);
        let result = score_model(Some(&only_zero), &actual).unwrap().unwrap();
        assert!(result.mape.is_nan());
        assert!((result.mae - 2.0).abs() < 1e-9);
    }

    #[test]
    fn accepts_common_timestamp_shapes() {
        assert!(parse_timestamp("2024-03-10T12:30:00Z").is_ok());
        assert!(parse_timestamp("2024-03-10 12:30:00.123").is_ok());
        assert!(parse_timestamp("2024-03-10").is_ok());
        assert!(parse_timestamp("10/03/2024").is_err());
    }
}
