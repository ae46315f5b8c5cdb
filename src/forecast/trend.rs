//! Additive trend + seasonality model: piecewise-linear trend with changepoints
//! and optional Fourier seasonality, fitted as penalized least squares.

use crate::error::{ForecastError, ForecastResult};
use crate::forecast::{error_metrics, future_dates, load_artifact, safe_symbol, save_artifact};
use crate::models::{AssetSeries, ForecastMetrics, ForecastPoint};
use chrono::{Datelike, NaiveDate};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::path::PathBuf;

pub const MIN_TRAINING_POINTS: usize = 30;
const MODEL_NAME: &str = "prophet";
const ARTIFACT_VERSION: u32 = 1;
const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const WEEKLY_ORDER: usize = 3;
const YEARLY_PERIOD_DAYS: f64 = 365.25;
const YEARLY_ORDER: usize = 10;
const MIN_NOISE_VARIANCE: f64 = 1e-12;
const DIAGONAL_JITTER: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub weekly_seasonality: bool,
    pub yearly_seasonality: bool,
    pub interval_width: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            n_changepoints: 25,
            changepoint_range: 0.85,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 0.01,
            weekly_seasonality: false,
            yearly_seasonality: false,
            interval_width: 0.95,
        }
    }
}

impl TrendConfig {
    fn seasonal_terms(&self) -> Vec<(f64, usize)> {
        let mut terms = Vec::new();
        if self.weekly_seasonality {
            terms.push((WEEKLY_PERIOD_DAYS, WEEKLY_ORDER));
        }
        if self.yearly_seasonality {
            terms.push((YEARLY_PERIOD_DAYS, YEARLY_ORDER));
        }
        terms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrendArtifact {
    version: u32,
    symbol: String,
    config: TrendConfig,
    start: NaiveDate,
    span_days: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    k: f64,
    m: f64,
    deltas: Vec<f64>,
    seasonal_betas: Vec<f64>,
    noise_variance: f64,
    history_dates: Vec<NaiveDate>,
    last_close: f64,
}

impl TrendArtifact {
    fn scaled_time(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }

    fn trend_at(&self, t: f64) -> f64 {
        let bends: f64 = self
            .changepoints
            .iter()
            .zip(self.deltas.iter())
            .map(|(s, delta)| delta * (t - s).max(0.0))
            .sum();
        self.k * t + self.m + bends
    }

    fn seasonal_at(&self, date: NaiveDate) -> f64 {
        seasonal_features(&self.config.seasonal_terms(), date)
            .iter()
            .zip(self.seasonal_betas.iter())
            .map(|(x, beta)| x * beta)
            .sum()
    }

    /// Variance added by changepoints that may occur past the history.
    fn future_trend_variance(&self, t: f64) -> f64 {
        let horizon = (t - 1.0).max(0.0);
        if horizon == 0.0 || self.deltas.is_empty() {
            return 0.0;
        }
        let rate = self.changepoints.len() as f64;
        let b = self.deltas.iter().map(|d| d.abs()).sum::<f64>() / self.deltas.len() as f64;
        rate * 2.0 * b * b * horizon.powi(3) / 3.0
    }

    fn forecast_points(&self, dates: &[NaiveDate]) -> Vec<ForecastPoint> {
        let z = interval_z(self.config.interval_width);
        dates
            .iter()
            .map(|&date| {
                let t = self.scaled_time(date);
                let yhat = self.trend_at(t) + self.seasonal_at(date);
                let sd = (self.noise_variance + self.future_trend_variance(t)).sqrt();
                ForecastPoint {
                    date,
                    value: yhat * self.y_scale,
                    lower: Some((yhat - z * sd) * self.y_scale),
                    upper: Some((yhat + z * sd) * self.y_scale),
                }
            })
            .collect()
    }
}

enum TrendState {
    Untrained,
    Trained(Box<TrendArtifact>),
}

/// One forecaster per symbol; `train` replaces any previous fit.
pub struct TrendForecaster {
    model_dir: PathBuf,
    config: TrendConfig,
    state: TrendState,
}

impl TrendForecaster {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(model_dir, TrendConfig::default())
    }

    pub fn with_config(model_dir: impl Into<PathBuf>, config: TrendConfig) -> Self {
        Self {
            model_dir: model_dir.into(),
            config,
            state: TrendState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, TrendState::Trained(_))
    }

    pub fn model_path(&self, symbol: &str) -> PathBuf {
        self.model_dir
            .join(format!("{}_{}.bin", safe_symbol(symbol), MODEL_NAME))
    }

    /// Fits on (date, close) and returns in-sample metrics. The fitted model is
    /// persisted per symbol; a write failure is only logged.
    pub fn train(&mut self, series: &AssetSeries, symbol: &str) -> ForecastResult<ForecastMetrics> {
        if series.len() < MIN_TRAINING_POINTS {
            return Err(ForecastError::InsufficientHistory {
                model: MODEL_NAME,
                required: MIN_TRAINING_POINTS,
                actual: series.len(),
            });
        }
        log::info!("Training trend model for {} on {} rows", symbol, series.len());

        let artifact = fit(series, symbol, &self.config);
        let fitted = artifact.forecast_points(&artifact.history_dates);
        let predicted: Vec<f64> = fitted.iter().map(|point| point.value).collect();
        let metrics = error_metrics(&series.closes(), &predicted, 0.0);

        if let Err(err) = save_artifact(&self.model_path(symbol), &artifact) {
            log::warn!("Failed to save trend model for {}: {}", symbol, err);
        }
        self.state = TrendState::Trained(Box::new(artifact));

        log::info!(
            "Trend model trained for {}. RMSE: {:.2}, MAE: {:.2}",
            symbol,
            metrics.rmse,
            metrics.mae
        );
        Ok(metrics)
    }

    fn artifact(&self) -> ForecastResult<&TrendArtifact> {
        match &self.state {
            TrendState::Trained(artifact) => Ok(artifact.as_ref()),
            TrendState::Untrained => Err(ForecastError::ModelNotTrained { model: MODEL_NAME }),
        }
    }

    /// The next `periods` calendar days, shifted so the fit passes through the
    /// last known close, floored at zero.
    pub fn predict(&self, periods: usize) -> ForecastResult<Vec<ForecastPoint>> {
        let artifact = self.artifact()?;
        let mut points = self.predict_with_history(periods)?;

        let gap = artifact
            .history_dates
            .len()
            .checked_sub(1)
            .and_then(|last_hist_idx| points.get(last_hist_idx))
            .map(|last_fitted| artifact.last_close - last_fitted.value);
        if let Some(gap) = gap {
            for point in points.iter_mut() {
                point.value += gap;
                point.lower = point.lower.map(|v| v + gap);
                point.upper = point.upper.map(|v| v + gap);
            }
        }

        let tail = points.split_off(points.len().saturating_sub(periods));
        Ok(tail
            .into_iter()
            .map(|point| ForecastPoint {
                date: point.date,
                value: point.value.max(0.0),
                lower: point.lower.map(|v| v.max(0.0)),
                upper: point.upper.map(|v| v.max(0.0)),
            })
            .collect())
    }

    /// Un-anchored fitted values for the history followed by `periods` future days.
    pub fn predict_with_history(&self, periods: usize) -> ForecastResult<Vec<ForecastPoint>> {
        let artifact = self.artifact()?;
        let mut dates = artifact.history_dates.clone();
        if let Some(&last) = dates.last() {
            dates.extend(future_dates(last, periods));
        }
        Ok(artifact.forecast_points(&dates))
    }

    /// Restores a persisted fit. `Ok(false)` when nothing was saved for `symbol`.
    pub fn load(&mut self, symbol: &str) -> ForecastResult<bool> {
        let path = self.model_path(symbol);
        let Some(artifact) = load_artifact::<TrendArtifact>(&path)? else {
            return Ok(false);
        };
        if artifact.version != ARTIFACT_VERSION {
            return Err(ForecastError::Artifact(format!(
                "{} has version {}, expected {}",
                path.display(),
                artifact.version,
                ARTIFACT_VERSION
            )));
        }
        log::info!("Loaded trend model from {}", path.display());
        self.state = TrendState::Trained(Box::new(artifact));
        Ok(true)
    }
}

fn interval_z(width: f64) -> f64 {
    let quantile = 0.5 + width.clamp(0.0, 0.999_999) / 2.0;
    Normal::new(0.0, 1.0)
        .map(|normal| normal.inverse_cdf(quantile))
        .unwrap_or(1.959_963_984_540_054)
}

fn seasonal_features(terms: &[(f64, usize)], date: NaiveDate) -> Vec<f64> {
    let days = date.num_days_from_ce() as f64;
    let mut features = Vec::new();
    for &(period, order) in terms {
        for n in 1..=order {
            let angle = 2.0 * PI * n as f64 * days / period;
            features.push(angle.sin());
            features.push(angle.cos());
        }
    }
    features
}

fn changepoint_times(t: &[f64], config: &TrendConfig) -> Vec<f64> {
    let hist_size = (t.len() as f64 * config.changepoint_range).floor() as usize;
    let count = config.n_changepoints.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }
    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|i| {
            let idx = (last * i as f64 / count as f64).round() as usize;
            t[idx]
        })
        .collect()
}

fn fit(series: &AssetSeries, symbol: &str, config: &TrendConfig) -> TrendArtifact {
    let dates = series.dates();
    let closes = series.closes();
    let n = dates.len();
    let start = dates[0];
    let span_days = ((dates[n - 1] - start).num_days() as f64).max(1.0);
    let y_scale = closes
        .iter()
        .fold(0.0f64, |acc, y| acc.max(y.abs()))
        .max(f64::MIN_POSITIVE);

    let t: Vec<f64> = dates
        .iter()
        .map(|&d| (d - start).num_days() as f64 / span_days)
        .collect();
    let y: Array1<f64> = closes.iter().map(|c| c / y_scale).collect();
    let changepoints = changepoint_times(&t, config);
    let seasonal_terms = config.seasonal_terms();
    let seasonal_width: usize = seasonal_terms.iter().map(|(_, order)| order * 2).sum();
    let n_cp = changepoints.len();
    let width = 2 + n_cp + seasonal_width;

    let mut x = Array2::<f64>::zeros((n, width));
    for (row, (&ti, &date)) in t.iter().zip(dates.iter()).enumerate() {
        x[[row, 0]] = ti;
        x[[row, 1]] = 1.0;
        for (j, s) in changepoints.iter().enumerate() {
            x[[row, 2 + j]] = (ti - s).max(0.0);
        }
        for (j, feature) in seasonal_features(&seasonal_terms, date).into_iter().enumerate() {
            x[[row, 2 + n_cp + j]] = feature;
        }
    }

    let prefit_variance = linear_residual_variance(&t, y.as_slice().unwrap_or(&[]));
    let delta_penalty = prefit_variance / config.changepoint_prior_scale.powi(2);
    let seasonal_penalty = prefit_variance / config.seasonality_prior_scale.powi(2);

    let mut xtx = x.t().dot(&x);
    let xty = x.t().dot(&y);
    for i in 0..width {
        xtx[[i, i]] += DIAGONAL_JITTER;
        if (2..2 + n_cp).contains(&i) {
            xtx[[i, i]] += delta_penalty;
        } else if i >= 2 + n_cp {
            xtx[[i, i]] += seasonal_penalty;
        }
    }
    let beta = solve_normal_equations(&xtx, &xty).unwrap_or_else(|| {
        log::warn!("Normal equations singular for {}; using flat trend", symbol);
        let mut flat = Array1::zeros(width);
        flat[1] = y.mean().unwrap_or(0.0);
        flat
    });

    let residuals = &y - &x.dot(&beta);
    let noise_variance =
        (residuals.mapv(|r| r * r).sum() / n as f64).max(MIN_NOISE_VARIANCE);

    TrendArtifact {
        version: ARTIFACT_VERSION,
        symbol: symbol.to_string(),
        config: config.clone(),
        start,
        span_days,
        y_scale,
        changepoints,
        k: beta[0],
        m: beta[1],
        deltas: beta.slice(ndarray::s![2..2 + n_cp]).to_vec(),
        seasonal_betas: beta.slice(ndarray::s![2 + n_cp..]).to_vec(),
        noise_variance,
        history_dates: dates,
        last_close: closes[n - 1],
    }
}

/// Residual variance of an ordinary least-squares line, floored above zero.
fn linear_residual_variance(t: &[f64], y: &[f64]) -> f64 {
    let n = t.len() as f64;
    if t.is_empty() {
        return MIN_NOISE_VARIANCE;
    }
    let t_mean = t.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (ti, yi) in t.iter().zip(y.iter()) {
        cov += (ti - t_mean) * (yi - y_mean);
        var += (ti - t_mean).powi(2);
    }
    let slope = if var > 0.0 { cov / var } else { 0.0 };
    let intercept = y_mean - slope * t_mean;
    let sse: f64 = t
        .iter()
        .zip(y.iter())
        .map(|(ti, yi)| (yi - (slope * ti + intercept)).powi(2))
        .sum();
    (sse / n).max(MIN_NOISE_VARIANCE)
}

/// Cholesky solve of a symmetric positive-definite system, with Gaussian
/// elimination as a fallback.
fn solve_normal_equations(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve(a, b).or_else(|| gaussian_solve(a, b))
}

fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    Some(x)
}

fn gaussian_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut m = a.clone();
    let mut rhs = b.clone();
    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| {
            m[[r1, col]]
                .abs()
                .partial_cmp(&m[[r2, col]].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if m[[pivot, col]].abs() < 1e-15 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
            }
            rhs.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = m[[row, col]] / m[[col, col]];
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for k in (i + 1)..n {
            sum -= m[[i, k]] * x[k];
        }
        x[i] = sum / m[[i, i]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::Duration as ChronoDuration;

    fn series_from(closes: &[f64]) -> AssetSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(start + ChronoDuration::days(i as i64), c, c, c, c, 1.0))
            .collect();
        AssetSeries::new("TEST", bars)
    }

    fn wavy(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 0.4 * i as f64 + 3.0 * (i as f64 / 5.0).sin())
            .collect()
    }

    #[test]
    fn needs_thirty_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = TrendForecaster::new(dir.path());
        let err = model.train(&series_from(&wavy(29)), "TEST").unwrap_err();
        match err {
            ForecastError::InsufficientHistory {
                required, actual, ..
            } => {
                assert_eq!(required, 30);
                assert_eq!(actual, 29);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!model.is_trained());
    }

    #[test]
    fn predict_requires_training() {
        let model = TrendForecaster::new("/nonexistent");
        assert!(matches!(
            model.predict(7),
            Err(ForecastError::ModelNotTrained { .. })
        ));
    }

    #[test]
    fn linear_history_is_fitted_closely() {
        let dir = tempfile::tempdir().unwrap();
        let closes: Vec<f64> = (0..120).map(|i| 50.0 + 2.0 * i as f64).collect();
        let mut model = TrendForecaster::new(dir.path());
        let metrics = model.train(&series_from(&closes), "LINE").unwrap();
        assert!(metrics.mae < 0.5, "mae {}", metrics.mae);
        assert!(metrics.mape < 1.0);
    }

    #[test]
    fn forecast_has_requested_length_and_ordered_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let series = series_from(&wavy(200));
        let mut model = TrendForecaster::new(dir.path());
        model.train(&series, "TEST").unwrap();

        let forecast = model.predict(14).unwrap();
        assert_eq!(forecast.len(), 14);
        let last = series.last_date().unwrap();
        assert_eq!(forecast[0].date, last + ChronoDuration::days(1));
        assert_eq!(forecast[13].date, last + ChronoDuration::days(14));
        for point in &forecast {
            let (lower, upper) = (point.lower.unwrap(), point.upper.unwrap());
            assert!(lower <= point.value && point.value <= upper);
            assert!(lower >= 0.0);
        }
        let widths: Vec<f64> = forecast
            .iter()
            .map(|p| p.upper.unwrap() - p.lower.unwrap())
            .collect();
        assert!(widths[13] >= widths[0]);
    }

    #[test]
    fn anchoring_shifts_forecast_by_last_close_gap() {
        let dir = tempfile::tempdir().unwrap();
        let series = series_from(&wavy(150));
        let mut model = TrendForecaster::new(dir.path());
        model.train(&series, "TEST").unwrap();

        let raw = model.predict_with_history(7).unwrap();
        assert_eq!(raw.len(), 157);
        let last_fitted = raw[149].value;
        let gap = series.last_close().unwrap() - last_fitted;
        assert!((last_fitted + gap - series.last_close().unwrap()).abs() < 1e-9);

        let anchored = model.predict(7).unwrap();
        for (i, point) in anchored.iter().enumerate() {
            assert!((point.value - (raw[150 + i].value + gap)).abs() < 1e-9);
        }
    }

    #[test]
    fn forecasts_are_floored_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 400.0 - 10.0 * i as f64).collect();
        let mut model = TrendForecaster::new(dir.path());
        model.train(&series_from(&closes), "DOWN").unwrap();
        let forecast = model.predict(10).unwrap();
        assert!(forecast.iter().all(|p| p.value >= 0.0));
        assert_eq!(forecast[9].value, 0.0);
        assert_eq!(forecast[9].lower, Some(0.0));
    }

    #[test]
    fn persisted_model_reloads_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = TrendForecaster::new(dir.path());
        model.train(&series_from(&wavy(90)), "BTC-USD").unwrap();
        assert!(dir.path().join("BTC_USD_prophet.bin").exists());

        let mut reloaded = TrendForecaster::new(dir.path());
        assert!(reloaded.load("BTC-USD").unwrap());
        assert_eq!(reloaded.predict(7).unwrap(), model.predict(7).unwrap());
        assert!(!reloaded.load("ETH-USD").unwrap());
    }

    #[test]
    fn weekly_seasonality_can_be_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let closes: Vec<f64> = (0..140)
            .map(|i| 100.0 + if i % 7 == 0 { 5.0 } else { 0.0 })
            .collect();
        let config = TrendConfig {
            weekly_seasonality: true,
            seasonality_prior_scale: 10.0,
            ..TrendConfig::default()
        };
        let mut seasonal = TrendForecaster::with_config(dir.path(), config);
        let mut plain = TrendForecaster::new(dir.path());
        let series = series_from(&closes);
        let with = seasonal.train(&series, "WEEK").unwrap();
        let without = plain.train(&series, "WEEK").unwrap();
        assert!(with.mae < without.mae);
    }
}
