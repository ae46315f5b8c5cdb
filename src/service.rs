//! Caller-facing facade: fetch, preprocess, train, forecast and score.

use crate::catalog::AssetCatalog;
use crate::config::{horizon_in_range, EngineSettings, FULL_HISTORY_PERIOD};
use crate::error::{ForecastError, ForecastResult};
use crate::forecast::{SequenceConfig, SequenceForecaster, TrendConfig, TrendForecaster};
use crate::market_data::MarketDataSource;
use crate::market_scan::{self, CorrelationReport, MoversReport};
use crate::models::{
    AssetInfo, AssetSeries, ClosePoint, ForecastMetrics, ForecastPoint, IndicatorRecord,
    OhlcvRecord, SearchResult, DATE_FORMAT,
};
use crate::preprocess;
use crate::verify::{self, StoredPrediction, VerificationReport};
use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    Prophet,
    Lstm,
    Both,
}

impl ModelChoice {
    fn includes_trend(self) -> bool {
        matches!(self, ModelChoice::Prophet | ModelChoice::Both)
    }

    fn includes_sequence(self) -> bool {
        matches!(self, ModelChoice::Lstm | ModelChoice::Both)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub symbol: String,
    pub model: ModelChoice,
    /// `"Nd"` trims training rows to the last N days; anything else trains on
    /// the full fetched history.
    pub training_period: String,
    pub horizon: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelForecast {
    pub predictions: Vec<ForecastPoint>,
    pub metrics: ForecastMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub symbol: String,
    pub name: String,
    pub historical_data: Vec<ClosePoint>,
    pub training_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prophet: Option<ModelForecast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lstm: Option<ModelForecast>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesResponse {
    pub symbol: String,
    pub name: String,
    pub data: Vec<OhlcvRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndicatorsResponse {
    pub symbol: String,
    pub name: String,
    pub indicators: Vec<IndicatorRecord>,
}

fn training_days(period: &str) -> Option<i64> {
    period.trim().strip_suffix('d')?.parse().ok()
}

pub struct ForecastService {
    source: Arc<MarketDataSource>,
    catalog: &'static AssetCatalog,
    prophet_model_dir: PathBuf,
    lstm_model_dir: PathBuf,
    trend_config: TrendConfig,
    sequence_config: SequenceConfig,
}

impl ForecastService {
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let source = MarketDataSource::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(source),
            settings.prophet_model_dir.clone(),
            settings.lstm_model_dir.clone(),
        ))
    }

    pub fn new(
        source: Arc<MarketDataSource>,
        prophet_model_dir: impl Into<PathBuf>,
        lstm_model_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            catalog: AssetCatalog::global(),
            prophet_model_dir: prophet_model_dir.into(),
            lstm_model_dir: lstm_model_dir.into(),
            trend_config: TrendConfig::default(),
            sequence_config: SequenceConfig::default(),
        }
    }

    pub fn with_trend_config(mut self, config: TrendConfig) -> Self {
        self.trend_config = config;
        self
    }

    pub fn with_sequence_config(mut self, config: SequenceConfig) -> Self {
        self.sequence_config = config;
        self
    }

    pub fn source(&self) -> &MarketDataSource {
        &self.source
    }

    fn load_clean(&self, symbol: &str, period: &str) -> AssetSeries {
        preprocess::clean(&self.source.fetch(symbol, period))
    }

    pub fn fetch_series(&self, symbol: &str, period: &str) -> SeriesResponse {
        let series = self.load_clean(symbol, period);
        SeriesResponse {
            symbol: symbol.to_string(),
            name: self.catalog.display_name(symbol),
            data: series.ohlcv_records(),
        }
    }

    pub fn train_and_forecast(&self, request: &ForecastRequest) -> ForecastResult<ForecastResponse> {
        if !horizon_in_range(request.horizon) {
            return Err(ForecastError::InvalidHorizon {
                horizon: request.horizon,
            });
        }
        let symbol = request.symbol.as_str();
        log::info!(
            "Forecasting {} with {:?} (training period {}, horizon {} days)",
            symbol,
            request.model,
            request.training_period,
            request.horizon
        );

        let full = self.load_clean(symbol, FULL_HISTORY_PERIOD);
        if full.is_empty() {
            return Err(ForecastError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no rows for period {}", FULL_HISTORY_PERIOD),
            });
        }
        let mut training = full.clone();
        let mut training_start_date = None;
        if let (Some(days), Some(last)) = (training_days(&request.training_period), full.last_date()) {
            training = full.since(last - Duration::days(days));
            if let Some(first) = training.bars.first() {
                training_start_date = Some(first.date.format(DATE_FORMAT).to_string());
                log::info!(
                    "Trimmed training data to {} days starting {} ({} of {} rows)",
                    days,
                    first.date,
                    training.len(),
                    full.len()
                );
            }
        }

        let prophet = if request.model.includes_trend() {
            let mut model =
                TrendForecaster::with_config(&self.prophet_model_dir, self.trend_config.clone());
            let metrics = model.train(&training, symbol)?;
            Some(ModelForecast {
                predictions: model.predict(request.horizon)?,
                metrics,
            })
        } else {
            None
        };

        let lstm = if request.model.includes_sequence() {
            let mut model =
                SequenceForecaster::with_config(&self.lstm_model_dir, self.sequence_config.clone());
            let metrics = model.train(&training, symbol)?;
            Some(ModelForecast {
                predictions: model.predict(&training, request.horizon)?,
                metrics,
            })
        } else {
            None
        };

        Ok(ForecastResponse {
            symbol: symbol.to_string(),
            name: self.catalog.display_name(symbol),
            historical_data: full.close_records(),
            training_start_date,
            prophet,
            lstm,
        })
    }

    pub fn compute_indicators(&self, symbol: &str, period: &str) -> IndicatorsResponse {
        let series = preprocess::calculate_indicators(&self.load_clean(symbol, period));
        IndicatorsResponse {
            symbol: symbol.to_string(),
            name: self.catalog.display_name(symbol),
            indicators: preprocess::indicator_records(&series),
        }
    }

    pub fn verify(&self, stored: StoredPrediction) -> VerificationReport {
        verify::verify(stored, &self.source)
    }

    pub fn assets(&self) -> &[AssetInfo] {
        self.catalog.all()
    }

    pub fn search_assets(&self, keywords: &str) -> Vec<SearchResult> {
        self.source.search_assets(keywords)
    }

    pub fn correlation(&self) -> Result<CorrelationReport> {
        market_scan::correlation_matrix(&self.source, self.catalog)
    }

    pub fn movers(&self) -> MoversReport {
        market_scan::market_movers(Arc::clone(&self.source), self.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_training_periods_only() {
        assert_eq!(training_days("90d"), Some(90));
        assert_eq!(training_days("2y"), None);
        assert_eq!(training_days("xd"), None);
    }

    #[test]
    fn model_choice_selects_families() {
        assert!(ModelChoice::Both.includes_trend() && ModelChoice::Both.includes_sequence());
        assert!(!ModelChoice::Prophet.includes_sequence());
        assert!(!ModelChoice::Lstm.includes_trend());
        assert_eq!(serde_json::to_string(&ModelChoice::Lstm).unwrap(), "\"lstm\"");
    }
}
