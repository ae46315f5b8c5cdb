use crate::error::{ForecastError, ForecastResult};
use crate::models::{AssetSeries, Bar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CACHE_FORMAT_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    version: u32,
    written_at: DateTime<Utc>,
    symbol: String,
    period: String,
    bars: Vec<Bar>,
}

/// On-disk TTL cache of raw provider series, one file per (symbol, period).
#[derive(Debug, Clone)]
pub struct DataCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DataCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `^GSPC` + `5d` -> `GSPC_5d_v2`, `BTC-USD` + `2y` -> `BTC_USD_2y_v2`.
    pub fn cache_key(symbol: &str, period: &str) -> String {
        let safe_symbol = symbol.replace('^', "").replace('-', "_");
        format!("{}_{}_v{}", safe_symbol, period, CACHE_FORMAT_VERSION)
    }

    pub fn path_for(&self, symbol: &str, period: &str) -> PathBuf {
        self.dir
            .join(format!("{}.bin", Self::cache_key(symbol, period)))
    }

    pub fn get(&self, symbol: &str, period: &str) -> Option<AssetSeries> {
        self.get_as_of(symbol, period, Utc::now())
    }

    /// Missing, expired, corrupted and version-mismatched entries are all misses.
    pub fn get_as_of(&self, symbol: &str, period: &str, now: DateTime<Utc>) -> Option<AssetSeries> {
        let path = self.path_for(symbol, period);
        if !path.exists() {
            return None;
        }
        let entry = match read_entry(&path) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Ignoring cache entry {}: {}", path.display(), err);
                return None;
            }
        };

        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let age = now.signed_duration_since(entry.written_at);
        if age >= ttl {
            log::debug!(
                "Cache entry {} expired ({}s old)",
                path.display(),
                age.num_seconds()
            );
            return None;
        }
        log::debug!("Cache hit for {} {}", symbol, period);
        Some(AssetSeries::new(symbol, entry.bars))
    }

    /// Failures are logged and swallowed; the caller already has the series.
    pub fn put(&self, symbol: &str, period: &str, series: &AssetSeries) {
        self.put_as_of(symbol, period, series, Utc::now());
    }

    pub fn put_as_of(&self, symbol: &str, period: &str, series: &AssetSeries, now: DateTime<Utc>) {
        let path = self.path_for(symbol, period);
        let entry = CacheEntry {
            version: CACHE_FORMAT_VERSION,
            written_at: now,
            symbol: symbol.to_string(),
            period: period.to_string(),
            bars: series.bars.clone(),
        };
        if let Err(err) = write_entry(&path, &entry) {
            log::warn!("Error caching data for {} {}: {}", symbol, period, err);
        }
    }
}

fn read_entry(path: &Path) -> ForecastResult<CacheEntry> {
    let file = File::open(path).map_err(|e| ForecastError::CacheRead(e.to_string()))?;
    let entry: CacheEntry = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| ForecastError::CacheRead(format!("decode failed: {}", e)))?;
    if entry.version != CACHE_FORMAT_VERSION {
        return Err(ForecastError::CacheRead(format!(
            "version mismatch (found {}, expected {})",
            entry.version, CACHE_FORMAT_VERSION
        )));
    }
    Ok(entry)
}

fn write_entry(path: &Path, entry: &CacheEntry) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory {}", parent.display())
            })?;
        }
    }
    let tmp_path = path.with_extension(format!("tmp{}", std::process::id()));
    let file = File::create(&tmp_path)
        .with_context(|| format!("Unable to create cache file {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, entry).context("Failed to serialize cache entry")?;
    writer.flush().context("Failed to flush cache entry to disk")?;
    drop(writer);
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move cache entry into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_series(symbol: &str) -> AssetSeries {
        let bars = (1..=5)
            .map(|day| {
                let close = 100.0 + day as f64;
                Bar::new(
                    NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
                    close - 0.5,
                    close + 1.0,
                    close - 1.0,
                    close,
                    1_000.0,
                )
            })
            .collect();
        AssetSeries::new(symbol, bars)
    }

    #[test]
    fn key_strips_caret_and_replaces_dash() {
        assert_eq!(DataCache::cache_key("^GSPC", "5d"), "GSPC_5d_v2");
        assert_eq!(DataCache::cache_key("BTC-USD", "2y"), "BTC_USD_2y_v2");
        let cache = DataCache::new("/tmp/prices", Duration::from_secs(3600));
        assert_eq!(
            cache.path_for("BTC-USD", "2y"),
            PathBuf::from("/tmp/prices/BTC_USD_2y_v2.bin")
        );
    }

    #[test]
    fn put_then_get_returns_same_bars_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new(dir.path(), Duration::from_secs(3600));
        let series = sample_series("BTC-USD");
        let written = Utc::now();
        cache.put_as_of("BTC-USD", "5d", &series, written);

        let hit = cache
            .get_as_of("BTC-USD", "5d", written + chrono::Duration::minutes(59))
            .unwrap();
        assert_eq!(hit, series);

        assert!(cache
            .get_as_of("BTC-USD", "5d", written + chrono::Duration::hours(1))
            .is_none());
        assert!(cache.get("BTC-USD", "1y").is_none());
    }

    #[test]
    fn corrupted_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new(dir.path(), Duration::from_secs(3600));
        fs::write(cache.path_for("AAPL", "2y"), b"definitely not bincode").unwrap();
        assert!(cache.get("AAPL", "2y").is_none());
    }

    #[test]
    fn version_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new(dir.path(), Duration::from_secs(3600));
        let entry = CacheEntry {
            version: 1,
            written_at: Utc::now(),
            symbol: "AAPL".to_string(),
            period: "2y".to_string(),
            bars: sample_series("AAPL").bars,
        };
        write_entry(&cache.path_for("AAPL", "2y"), &entry).unwrap();
        assert!(cache.get("AAPL", "2y").is_none());
    }

    #[test]
    fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let cache = DataCache::new(&blocker, Duration::from_secs(3600));
        cache.put("AAPL", "2y", &sample_series("AAPL"));
        assert!(cache.get("AAPL", "2y").is_none());
    }
}
