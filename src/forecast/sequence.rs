//! Difference-based recurrent forecaster. Learns the next scaled daily change
//! from a fixed window of previous changes and rolls forward autoregressively.

use crate::error::{ForecastError, ForecastResult};
use crate::forecast::lstm::{mse, AdamState, LstmNetwork};
use crate::forecast::scaler::MinMaxScaler;
use crate::forecast::{error_metrics, future_dates, load_artifact, safe_symbol, save_artifact};
use crate::models::{AssetSeries, ForecastMetrics, ForecastPoint};
use ndarray::{Array1, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;

const MODEL_NAME: &str = "lstm";
const ARTIFACT_VERSION: u32 = 1;
/// Training needs this many rows beyond the lookback window.
const HISTORY_MARGIN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub lookback: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub patience: usize,
    pub train_split: f64,
    pub validation_split: f64,
    pub seed: u64,
    pub mape_epsilon: f64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            lookback: 60,
            hidden_size: 50,
            num_layers: 2,
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 16,
            epochs: 30,
            patience: 10,
            train_split: 0.8,
            validation_split: 0.1,
            seed: 42,
            mape_epsilon: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SequenceArtifact {
    version: u32,
    lookback: usize,
    network: LstmNetwork,
}

enum SequenceState {
    Untrained,
    Trained {
        network: Box<LstmNetwork>,
        scaler: MinMaxScaler,
        lookback: usize,
    },
}

struct Windows {
    inputs: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl Windows {
    fn build(values: &[f64], lookback: usize) -> Self {
        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        for i in lookback..values.len() {
            inputs.push(values[i - lookback..i].to_vec());
            targets.push(values[i]);
        }
        Self { inputs, targets }
    }
}

fn to_tensor(windows: &[Vec<f64>]) -> Array3<f64> {
    let steps = windows.first().map(Vec::len).unwrap_or(0);
    Array3::from_shape_fn((windows.len(), steps, 1), |(b, t, _)| windows[b][t])
}

fn differences(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

fn cumulative_from(base: f64, diffs: &[f64]) -> Vec<f64> {
    diffs
        .iter()
        .scan(base, |level, diff| {
            *level += diff;
            Some(*level)
        })
        .collect()
}

pub struct SequenceForecaster {
    model_dir: PathBuf,
    config: SequenceConfig,
    state: SequenceState,
}

impl SequenceForecaster {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(model_dir, SequenceConfig::default())
    }

    pub fn with_config(model_dir: impl Into<PathBuf>, config: SequenceConfig) -> Self {
        Self {
            model_dir: model_dir.into(),
            config,
            state: SequenceState::Untrained,
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, SequenceState::Trained { .. })
    }

    pub fn model_path(&self, symbol: &str) -> PathBuf {
        self.model_dir
            .join(format!("{}_{}.bin", safe_symbol(symbol), MODEL_NAME))
    }

    pub fn scaler_path(&self, symbol: &str) -> PathBuf {
        self.model_dir
            .join(format!("{}_scaler.bin", safe_symbol(symbol)))
    }

    /// Trains on the close series and reports metrics on the chronological
    /// test tail, measured on reconstructed prices.
    pub fn train(&mut self, series: &AssetSeries, symbol: &str) -> ForecastResult<ForecastMetrics> {
        let cfg = self.config.clone();
        let required = cfg.lookback + HISTORY_MARGIN + 1;
        if series.len() < required {
            return Err(ForecastError::InsufficientHistory {
                model: MODEL_NAME,
                required,
                actual: series.len(),
            });
        }
        log::info!("Training sequence model for {} on {} rows", symbol, series.len());

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let closes = series.closes();
        let diffs = differences(&closes);
        let scaler = MinMaxScaler::fit(&diffs);
        let scaled = scaler.transform_all(&diffs);
        let windows = Windows::build(&scaled, cfg.lookback);

        let split_idx = (windows.inputs.len() as f64 * cfg.train_split) as usize;
        let (train_x, test_x) = windows.inputs.split_at(split_idx);
        let (train_y, test_y) = windows.targets.split_at(split_idx);

        let val_size = match (train_x.len() as f64 * cfg.validation_split) as usize {
            0 if train_x.len() >= 2 => 1,
            n => n,
        };
        let (fit_x, fit_y, val_x, val_y) = if val_size == 0 || val_size >= train_x.len() {
            (train_x, train_y, train_x, train_y)
        } else {
            let cut = train_x.len() - val_size;
            (&train_x[..cut], &train_y[..cut], &train_x[cut..], &train_y[cut..])
        };

        let mut network = LstmNetwork::new(1, cfg.hidden_size, cfg.num_layers, cfg.dropout, &mut rng);
        let mut adam = AdamState::new(&network, cfg.learning_rate);
        let val_tensor = to_tensor(val_x);
        let val_targets = Array1::from(val_y.to_vec());
        let batch_size = cfg.batch_size.max(1);

        let mut best_val = f64::INFINITY;
        let mut stale_epochs = 0;
        for epoch in 0..cfg.epochs {
            let mut train_loss = 0.0;
            let mut batches = 0;
            for start in (0..fit_x.len()).step_by(batch_size) {
                let end = (start + batch_size).min(fit_x.len());
                let x = to_tensor(&fit_x[start..end]);
                let y = Array1::from(fit_y[start..end].to_vec());
                train_loss += network.train_batch(&x, &y, &mut adam, &mut rng);
                batches += 1;
            }
            let val_loss = mse(&network.predict(&val_tensor), &val_targets);
            log::debug!(
                "Epoch {}/{}: train loss {:.6}, val loss {:.6}",
                epoch + 1,
                cfg.epochs,
                train_loss / batches.max(1) as f64,
                val_loss
            );

            if val_loss < best_val {
                best_val = val_loss;
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
                if stale_epochs >= cfg.patience {
                    log::info!("Early stopping at epoch {}", epoch + 1);
                    break;
                }
            }
        }

        let predicted_scaled = network.predict(&to_tensor(test_x)).to_vec();
        let predicted_diffs = scaler.inverse_all(&predicted_scaled);
        let actual_diffs = scaler.inverse_all(test_y);
        // Close just before the first test target.
        let base_price = closes[cfg.lookback + split_idx];
        let predicted_prices = cumulative_from(base_price, &predicted_diffs);
        let actual_prices = cumulative_from(base_price, &actual_diffs);
        let metrics = error_metrics(&actual_prices, &predicted_prices, cfg.mape_epsilon);

        let artifact = SequenceArtifact {
            version: ARTIFACT_VERSION,
            lookback: cfg.lookback,
            network,
        };
        if let Err(err) = save_artifact(&self.model_path(symbol), &artifact)
            .and_then(|_| save_artifact(&self.scaler_path(symbol), &scaler))
        {
            log::warn!("Failed to save sequence model for {}: {}", symbol, err);
        }
        self.state = SequenceState::Trained {
            network: Box::new(artifact.network),
            scaler,
            lookback: cfg.lookback,
        };

        log::info!(
            "Sequence model trained for {}. RMSE: {:.2}, MAE: {:.2}",
            symbol,
            metrics.rmse,
            metrics.mae
        );
        Ok(metrics)
    }

    /// Rolls the trained model forward `periods` days from the end of `series`.
    pub fn predict(&self, series: &AssetSeries, periods: usize) -> ForecastResult<Vec<ForecastPoint>> {
        let SequenceState::Trained {
            network,
            scaler,
            lookback,
        } = &self.state
        else {
            return Err(ForecastError::ModelNotTrained { model: MODEL_NAME });
        };

        let closes = series.closes();
        let diffs = differences(&closes);
        let (Some(last_close), Some(last_date)) = (series.last_close(), series.last_date()) else {
            return Err(ForecastError::InsufficientHistory {
                model: MODEL_NAME,
                required: lookback + 1,
                actual: series.len(),
            });
        };
        if diffs.len() < *lookback {
            return Err(ForecastError::InsufficientHistory {
                model: MODEL_NAME,
                required: lookback + 1,
                actual: series.len(),
            });
        }

        let mut window: VecDeque<f64> = scaler
            .transform_all(&diffs[diffs.len() - lookback..])
            .into_iter()
            .collect();
        let mut predicted_scaled = Vec::with_capacity(periods);
        for _ in 0..periods {
            let x = Array3::from_shape_fn((1, *lookback, 1), |(_, t, _)| window[t]);
            let next = network.predict(&x)[0];
            predicted_scaled.push(next);
            window.pop_front();
            window.push_back(next);
        }

        let prices = cumulative_from(last_close, &scaler.inverse_all(&predicted_scaled));
        Ok(future_dates(last_date, periods)
            .into_iter()
            .zip(prices)
            .map(|(date, price)| ForecastPoint {
                date,
                value: price.max(0.0),
                lower: None,
                upper: None,
            })
            .collect())
    }

    /// Restores weights and scaler. `Ok(false)` when either file is missing.
    pub fn load(&mut self, symbol: &str) -> ForecastResult<bool> {
        let model_path = self.model_path(symbol);
        let Some(artifact) = load_artifact::<SequenceArtifact>(&model_path)? else {
            return Ok(false);
        };
        let Some(scaler) = load_artifact::<MinMaxScaler>(&self.scaler_path(symbol))? else {
            return Ok(false);
        };
        if artifact.version != ARTIFACT_VERSION {
            return Err(ForecastError::Artifact(format!(
                "{} has version {}, expected {}",
                model_path.display(),
                artifact.version,
                ARTIFACT_VERSION
            )));
        }
        log::info!("Loaded sequence model from {}", model_path.display());
        self.state = SequenceState::Trained {
            network: Box::new(artifact.network),
            scaler,
            lookback: artifact.lookback,
        };
        Ok(true)
    }
}
