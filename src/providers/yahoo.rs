use crate::error::ProviderError;
use crate::http_client::{retry_with_backoff, truncate_for_log, RetryPolicy};
use crate::models::{period_days, Bar};
use crate::providers::PriceProvider;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const RANGE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Chart endpoint with explicit `period1`/`period2` epoch bounds.
pub struct YahooChartProvider {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    base_url: String,
}

impl YahooChartProvider {
    pub fn new(client: reqwest::blocking::Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            base_url: CHART_URL.to_string(),
        }
    }
}

impl PriceProvider for YahooChartProvider {
    fn name(&self) -> &'static str {
        "yahoo-chart"
    }

    fn fetch_bars(&self, symbol: &str, period: &str) -> Result<Vec<Bar>, ProviderError> {
        let end = Utc::now();
        let start = end - ChronoDuration::days(period_days(period));
        let url = format!("{}/{}", self.base_url, symbol);
        let query = [
            ("period1", start.timestamp().to_string()),
            ("period2", end.timestamp().to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];
        let body = retry_with_backoff(self.retry, self.name(), ProviderError::is_retryable, || {
            get_text(&self.client, &url, &query)
        })?;
        parse_chart_payload(symbol, &body)
    }
}

/// The same chart schema requested with a `range=` parameter, as Yahoo client
/// libraries do.
pub struct YahooRangeProvider {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    base_url: String,
}

impl YahooRangeProvider {
    pub fn new(client: reqwest::blocking::Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            base_url: RANGE_URL.to_string(),
        }
    }
}

impl PriceProvider for YahooRangeProvider {
    fn name(&self) -> &'static str {
        "yahoo-range"
    }

    fn fetch_bars(&self, symbol: &str, period: &str) -> Result<Vec<Bar>, ProviderError> {
        let url = format!("{}/{}", self.base_url, symbol);
        let query = [
            ("range", period.to_string()),
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];
        let body = retry_with_backoff(self.retry, self.name(), ProviderError::is_retryable, || {
            get_text(&self.client, &url, &query)
        })?;
        parse_chart_payload(symbol, &body)
    }
}

fn get_text(
    client: &reqwest::blocking::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, ProviderError> {
    let response = client.get(url).query(query).send()?;
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            detail: format!("url={} body={}", url, truncate_for_log(&body)),
        });
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Maps a v8 chart payload to bars. Rows with a missing OHLC value are
/// dropped; a missing volume becomes 0.
pub(crate) fn parse_chart_payload(symbol: &str, body: &str) -> Result<Vec<Bar>, ProviderError> {
    let response: ChartResponse = serde_json::from_str(body)?;
    if let Some(error) = response.chart.error.filter(|value| !value.is_null()) {
        return Err(ProviderError::Payload(format!("chart API error: {}", error)));
    }
    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::Payload("no chart result in response".to_string()))?;
    let timestamps = result
        .timestamp
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))?;
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Payload("no quote block in response".to_string()))?;
    if quote.close.is_empty() {
        return Err(ProviderError::Payload(format!(
            "no close prices for {}",
            symbol
        )));
    }

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };
        if let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
            quote.open.get(i),
            quote.high.get(i),
            quote.low.get(i),
            quote.close.get(i),
        ) {
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
            bars.push(Bar::new(date, *open, *high, *low, *close, volume));
        }
    }

    if bars.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }
    Ok(bars)
}
