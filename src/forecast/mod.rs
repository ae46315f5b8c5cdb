pub mod lstm;
pub mod scaler;
pub mod sequence;
pub mod trend;

pub use sequence::{SequenceConfig, SequenceForecaster};
pub use trend::{TrendConfig, TrendForecaster};

use crate::error::{ForecastError, ForecastResult};
use crate::models::ForecastMetrics;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Model file prefix: `^GSPC` -> `GSPC`, `BTC-USD` -> `BTC_USD`.
pub fn safe_symbol(symbol: &str) -> String {
    symbol.replace('^', "").replace('-', "_")
}

/// `periods` consecutive calendar days after `last`.
pub fn future_dates(last: NaiveDate, periods: usize) -> Vec<NaiveDate> {
    (1..=periods as i64)
        .map(|offset| last + ChronoDuration::days(offset))
        .collect()
}

/// MAE, RMSE and MAPE (percent). `mape_epsilon` is added to the denominator.
pub fn error_metrics(actual: &[f64], predicted: &[f64], mape_epsilon: f64) -> ForecastMetrics {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return ForecastMetrics {
            mae: f64::NAN,
            rmse: f64::NAN,
            mape: f64::NAN,
        };
    }
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut pct_sum = 0.0;
    for (a, p) in actual.iter().zip(predicted.iter()).take(n) {
        let err = a - p;
        abs_sum += err.abs();
        sq_sum += err * err;
        pct_sum += (err / (a + mape_epsilon)).abs();
    }
    ForecastMetrics {
        mae: abs_sum / n as f64,
        rmse: (sq_sum / n as f64).sqrt(),
        mape: pct_sum / n as f64 * 100.0,
    }
}

pub(crate) fn save_artifact<T: Serialize>(path: &Path, artifact: &T) -> ForecastResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ForecastError::Artifact(format!("create {}: {}", parent.display(), e))
            })?;
        }
    }
    let file = File::create(path)
        .map_err(|e| ForecastError::Artifact(format!("create {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, artifact)
        .map_err(|e| ForecastError::Artifact(format!("encode {}: {}", path.display(), e)))?;
    writer
        .flush()
        .map_err(|e| ForecastError::Artifact(format!("flush {}: {}", path.display(), e)))?;
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn load_artifact<T: DeserializeOwned>(path: &Path) -> ForecastResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)
        .map_err(|e| ForecastError::Artifact(format!("open {}: {}", path.display(), e)))?;
    let artifact = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| ForecastError::Artifact(format!("decode {}: {}", path.display(), e)))?;
    Ok(Some(artifact))
}
