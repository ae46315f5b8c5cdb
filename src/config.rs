use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HISTORY_PERIOD: &str = "2y";
pub const FULL_HISTORY_PERIOD: &str = "5y";
pub const MIN_HORIZON_DAYS: usize = 7;
pub const MAX_HORIZON_DAYS: usize = 30;

const DEFAULT_CACHE_DIR: &str = "data/cache";
const DEFAULT_PROPHET_MODEL_DIR: &str = "saved_models/prophet";
const DEFAULT_LSTM_MODEL_DIR: &str = "saved_models/lstm";
const DEFAULT_CACHE_EXPIRY_HOURS: f64 = 1.0;
const MAX_CACHE_EXPIRY_HOURS: f64 = 24.0 * 366.0;
const DEFAULT_HTTP_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_PROVIDER_RETRIES: usize = 2;

const SETTING_KEYS: [&str; 7] = [
    "CACHE_DIR",
    "PROPHET_MODEL_DIR",
    "LSTM_MODEL_DIR",
    "ALPHA_VANTAGE_API_KEY",
    "CACHE_EXPIRY_HOURS",
    "HTTP_TIMEOUT_SECS",
    "PROVIDER_RETRIES",
];

/// Runtime settings shared by the data layer and both forecasters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_dir: PathBuf,
    pub prophet_model_dir: PathBuf,
    pub lstm_model_dir: PathBuf,
    pub alpha_vantage_api_key: Option<String>,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub provider_retries: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            prophet_model_dir: PathBuf::from(DEFAULT_PROPHET_MODEL_DIR),
            lstm_model_dir: PathBuf::from(DEFAULT_LSTM_MODEL_DIR),
            alpha_vantage_api_key: None,
            cache_ttl: Duration::from_secs((DEFAULT_CACHE_EXPIRY_HOURS * 3600.0) as u64),
            http_timeout: Duration::from_secs_f64(DEFAULT_HTTP_TIMEOUT_SECS),
            provider_retries: DEFAULT_PROVIDER_RETRIES,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        let settings = SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect::<HashMap<_, _>>();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let cache_dir = optional_setting(settings, "CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);
        let prophet_model_dir = optional_setting(settings, "PROPHET_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.prophet_model_dir);
        let lstm_model_dir = optional_setting(settings, "LSTM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.lstm_model_dir);
        let alpha_vantage_api_key =
            optional_setting(settings, "ALPHA_VANTAGE_API_KEY").map(str::to_string);
        let cache_expiry_hours = setting_f64_or(
            settings,
            "CACHE_EXPIRY_HOURS",
            DEFAULT_CACHE_EXPIRY_HOURS,
            Some(0.0),
            Some(MAX_CACHE_EXPIRY_HOURS),
        )?;
        let http_timeout_secs = setting_f64_or(
            settings,
            "HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
            Some(0.1),
            Some(300.0),
        )?;
        let provider_retries =
            setting_usize_or(settings, "PROVIDER_RETRIES", DEFAULT_PROVIDER_RETRIES, 0)?;

        Ok(Self {
            cache_dir,
            prophet_model_dir,
            lstm_model_dir,
            alpha_vantage_api_key,
            cache_ttl: hours(cache_expiry_hours)?,
            http_timeout: Duration::from_secs_f64(http_timeout_secs),
            provider_retries,
        })
    }

    /// Settings rooted in a scratch directory, with no external API key.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join("cache"),
            prophet_model_dir: root.join("models").join("prophet"),
            lstm_model_dir: root.join("models").join("lstm"),
            ..Self::default()
        }
    }
}

/// Validates the caller-supplied horizon before any data is fetched.
pub fn horizon_in_range(horizon: usize) -> bool {
    (MIN_HORIZON_DAYS..=MAX_HORIZON_DAYS).contains(&horizon)
}

fn hours(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value * 3600.0)
        .map_err(|err| anyhow!("{} hours is not a valid duration: {}", value, err))
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_yields_defaults() {
        let parsed = EngineSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.cache_dir, PathBuf::from("data/cache"));
        assert_eq!(parsed.cache_ttl, Duration::from_secs(3600));
        assert_eq!(parsed.provider_retries, 2);
        assert!(parsed.alpha_vantage_api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed_and_validated() {
        let parsed = EngineSettings::from_settings_map(&settings(&[
            ("CACHE_DIR", " /tmp/prices "),
            ("CACHE_EXPIRY_HOURS", "0.5"),
            ("ALPHA_VANTAGE_API_KEY", "demo"),
        ]))
        .unwrap();
        assert_eq!(parsed.cache_dir, PathBuf::from("/tmp/prices"));
        assert_eq!(parsed.cache_ttl, Duration::from_secs(1800));
        assert_eq!(parsed.alpha_vantage_api_key.as_deref(), Some("demo"));

        let err = EngineSettings::from_settings_map(&settings(&[("HTTP_TIMEOUT_SECS", "abc")]))
            .unwrap_err();
        assert!(err.to_string().contains("HTTP_TIMEOUT_SECS"));
        assert!(
            EngineSettings::from_settings_map(&settings(&[("CACHE_EXPIRY_HOURS", "-1")])).is_err()
        );
    }

    #[test]
    fn oversized_cache_expiry_is_rejected() {
        for raw in ["1e20", "9000"] {
            let err = EngineSettings::from_settings_map(&settings(&[("CACHE_EXPIRY_HOURS", raw)]))
                .unwrap_err();
            assert!(err.to_string().contains("CACHE_EXPIRY_HOURS"), "{}", err);
        }
        let year = EngineSettings::from_settings_map(&settings(&[("CACHE_EXPIRY_HOURS", "8760")]))
            .unwrap();
        assert_eq!(year.cache_ttl, Duration::from_secs(8760 * 3600));
        assert!(hours(f64::MAX).is_err());
        assert!(hours(-1.0).is_err());
    }

    #[test]
    fn horizon_bounds_are_inclusive() {
        assert!(!horizon_in_range(6));
        assert!(horizon_in_range(7));
        assert!(horizon_in_range(30));
        assert!(!horizon_in_range(31));
    }
}
