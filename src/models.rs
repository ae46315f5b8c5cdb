use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One daily OHLCV row. Missing provider values are carried as `NaN` until the
/// preprocessor fills them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub derived: Option<DerivedFields>,
    #[serde(default)]
    pub indicators: Option<IndicatorFields>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            derived: None,
            indicators: None,
        }
    }

    pub fn has_gaps(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .any(|value| !value.is_finite())
    }
}

/// Rolling statistics added by `preprocess::clean`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFields {
    pub ma7: f64,
    pub ma30: f64,
    pub volatility: f64,
}

/// Technical indicators added by `preprocess::calculate_indicators`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFields {
    pub rsi: f64,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl AssetSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|bar| bar.date).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|bar| bar.close)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|bar| bar.date)
    }

    /// Rows dated on or after `start`.
    pub fn since(&self, start: NaiveDate) -> AssetSeries {
        AssetSeries {
            symbol: self.symbol.clone(),
            bars: self
                .bars
                .iter()
                .filter(|bar| bar.date >= start)
                .cloned()
                .collect(),
        }
    }

    pub fn ohlcv_records(&self) -> Vec<OhlcvRecord> {
        self.bars.iter().map(OhlcvRecord::from).collect()
    }

    pub fn close_records(&self) -> Vec<ClosePoint> {
        self.bars
            .iter()
            .map(|bar| ClosePoint {
                date: bar.date.format(DATE_FORMAT).to_string(),
                close: bar.close,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
}

impl From<&Bar> for OhlcvRecord {
    fn from(bar: &Bar) -> Self {
        Self {
            date: bar.date.format(DATE_FORMAT).to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePoint {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Close")]
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "RSI")]
    pub rsi: f64,
    #[serde(rename = "MACD")]
    pub macd: f64,
    #[serde(rename = "Signal_Line")]
    pub signal_line: f64,
    #[serde(rename = "MACD_Histogram")]
    pub macd_histogram: f64,
    #[serde(rename = "BB_Upper")]
    pub bb_upper: f64,
    #[serde(rename = "BB_Middle")]
    pub bb_middle: f64,
    #[serde(rename = "BB_Lower")]
    pub bb_lower: f64,
}

/// One forecasted day in the `{ds, yhat, yhat_lower?, yhat_upper?}` exchange shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    #[serde(rename = "ds")]
    pub date: NaiveDate,
    #[serde(rename = "yhat")]
    pub value: f64,
    #[serde(rename = "yhat_lower", default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(rename = "yhat_upper", default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Percentage, not a ratio.
    pub mape: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub days_verified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Index,
    Stock,
    Crypto,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Index => "index",
            AssetClass::Stock => "stock",
            AssetClass::Crypto => "crypto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
}

/// One symbol-search hit. `asset_type` is a free-form label (`stock`, `etf`, `crypto`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub region: String,
    pub match_score: f64,
}

/// Converts a history period such as `"2y"`, `"6mo"` or `"45d"` into calendar days.
pub fn period_days(period: &str) -> i64 {
    let trimmed = period.trim();
    if let Some(days) = trimmed
        .strip_suffix('d')
        .and_then(|raw| raw.parse::<i64>().ok())
    {
        return days;
    }
    match trimmed {
        "1mo" => 30,
        "3mo" => 90,
        "6mo" => 180,
        "1y" => 365,
        "2y" => 730,
        "5y" => 1825,
        "max" => 36500,
        _ => 730,
    }
}
