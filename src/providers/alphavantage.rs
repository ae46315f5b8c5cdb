use crate::error::ProviderError;
use crate::http_client::{retry_with_backoff, RetryPolicy};
use crate::models::{Bar, SearchResult};
use crate::providers::{PriceProvider, SymbolSearch};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const MIN_MATCH_SCORE: f64 = 0.1;

/// Quota-limited daily series API. Only the last ~100 sessions (`compact`).
pub struct AlphaVantageProvider {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(client: reqwest::blocking::Client, retry: RetryPolicy, api_key: String) -> Self {
        Self {
            client,
            retry,
            api_key,
        }
    }

    fn query(&self, params: &[(&str, &str)]) -> Result<String, ProviderError> {
        retry_with_backoff(self.retry, "alpha-vantage", ProviderError::is_retryable, || {
            let response = self
                .client
                .get(BASE_URL)
                .query(params)
                .query(&[("apikey", self.api_key.as_str())])
                .send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    detail: "alpha-vantage query rejected".to_string(),
                });
            }
            Ok(response.text()?)
        })
    }
}

impl PriceProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        "alpha-vantage"
    }

    fn fetch_bars(&self, symbol: &str, _period: &str) -> Result<Vec<Bar>, ProviderError> {
        let body = self.query(&[
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("outputsize", "compact"),
        ])?;
        parse_daily_series(symbol, &body)
    }
}

impl SymbolSearch for AlphaVantageProvider {
    fn search(&self, keywords: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let body = self.query(&[("function", "SYMBOL_SEARCH"), ("keywords", keywords)])?;
        parse_search_matches(&body)
    }
}

#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<BTreeMap<String, HashMap<String, String>>>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
}

pub(crate) fn parse_daily_series(symbol: &str, body: &str) -> Result<Vec<Bar>, ProviderError> {
    let response: DailySeriesResponse = serde_json::from_str(body)?;
    let Some(series) = response.series else {
        let reason = response
            .error_message
            .or(response.note)
            .or(response.information)
            .unwrap_or_else(|| "missing daily time series".to_string());
        return Err(ProviderError::Payload(reason));
    };

    let mut bars = Vec::with_capacity(series.len());
    for (raw_date, fields) in series {
        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
            .map_err(|e| ProviderError::Payload(format!("bad date {}: {}", raw_date, e)))?;
        let field = |key: &str| -> Result<f64, ProviderError> {
            match fields.get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ProviderError::Payload(format!("bad {} on {}: {}", key, raw_date, raw))),
                None => Ok(f64::NAN),
            }
        };
        let volume = field("5. volume")?;
        bars.push(Bar::new(
            date,
            field("1. open")?,
            field("2. high")?,
            field("3. low")?,
            field("4. close")?,
            if volume.is_nan() { 0.0 } else { volume },
        ));
    }

    if bars.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }
    Ok(bars)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<HashMap<String, String>>,
}

pub(crate) fn parse_search_matches(body: &str) -> Result<Vec<SearchResult>, ProviderError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let mut results = Vec::new();
    for entry in response.best_matches {
        let get = |key: &str| entry.get(key).cloned().unwrap_or_default();
        let match_score = get("9. matchScore").parse::<f64>().unwrap_or(0.0);
        if match_score < MIN_MATCH_SCORE {
            continue;
        }
        let raw_type = get("3. type");
        let asset_type = match raw_type.as_str() {
            "ETF" => "etf",
            "Equity" => "stock",
            other if other.contains("Crypto") => "crypto",
            _ => "stock",
        };
        results.push(SearchResult {
            symbol: get("1. symbol"),
            name: get("2. name"),
            asset_type: asset_type.to_string(),
            region: get("4. region"),
            match_score,
        });
    }
    Ok(results)
}
