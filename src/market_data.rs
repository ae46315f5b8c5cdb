use crate::cache::DataCache;
use crate::catalog::AssetCatalog;
use crate::config::EngineSettings;
use crate::http_client::{build_blocking_client, RetryPolicy};
use crate::models::{AssetSeries, SearchResult};
use crate::providers::{
    normalize_bars, AlphaVantageProvider, PriceProvider, SymbolSearch, SyntheticGenerator,
    YahooChartProvider, YahooRangeProvider,
};
use anyhow::Result;
use std::cmp::Ordering;

const CATALOG_MATCH_SCORE: f64 = 0.9;
const MIN_SEARCH_KEYWORD_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Cache,
    Provider(&'static str),
    Synthetic,
}

/// Cache-first provider chain that always yields a series: when every provider
/// fails the synthetic generator fills in.
pub struct MarketDataSource {
    cache: DataCache,
    providers: Vec<Box<dyn PriceProvider>>,
    search: Option<Box<dyn SymbolSearch>>,
    synthetic: SyntheticGenerator,
}

impl MarketDataSource {
    pub fn new(
        cache: DataCache,
        providers: Vec<Box<dyn PriceProvider>>,
        search: Option<Box<dyn SymbolSearch>>,
    ) -> Self {
        Self {
            cache,
            providers,
            search,
            synthetic: SyntheticGenerator,
        }
    }

    /// Yahoo chart, Yahoo range, then Alpha Vantage when an API key is configured.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let client = build_blocking_client(Some(settings.http_timeout))?;
        let retry = RetryPolicy::new(settings.provider_retries);
        let mut providers: Vec<Box<dyn PriceProvider>> = vec![
            Box::new(YahooChartProvider::new(client.clone(), retry)),
            Box::new(YahooRangeProvider::new(client.clone(), retry)),
        ];
        let mut search: Option<Box<dyn SymbolSearch>> = None;
        if let Some(api_key) = settings.alpha_vantage_api_key.clone() {
            providers.push(Box::new(AlphaVantageProvider::new(
                client.clone(),
                retry,
                api_key.clone(),
            )));
            search = Some(Box::new(AlphaVantageProvider::new(client, retry, api_key)));
        } else {
            log::debug!("ALPHA_VANTAGE_API_KEY not set; Alpha Vantage provider disabled");
        }
        let cache = DataCache::new(settings.cache_dir.clone(), settings.cache_ttl);
        Ok(Self::new(cache, providers, search))
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn fetch(&self, symbol: &str, period: &str) -> AssetSeries {
        self.fetch_with_origin(symbol, period).0
    }

    pub fn fetch_with_origin(&self, symbol: &str, period: &str) -> (AssetSeries, DataOrigin) {
        if let Some(series) = self.cache.get(symbol, period) {
            return (series, DataOrigin::Cache);
        }

        for provider in &self.providers {
            match provider.fetch_bars(symbol, period) {
                Ok(bars) => {
                    let bars = normalize_bars(bars);
                    if bars.is_empty() {
                        log::warn!("{} returned no rows for {}", provider.name(), symbol);
                        continue;
                    }
                    log::info!(
                        "Fetched {} rows for {} ({}) from {}",
                        bars.len(),
                        symbol,
                        period,
                        provider.name()
                    );
                    let series = AssetSeries::new(symbol, bars);
                    self.cache.put(symbol, period, &series);
                    return (series, DataOrigin::Provider(provider.name()));
                }
                Err(err) => {
                    log::warn!("{} failed for {} ({}): {}", provider.name(), symbol, period, err);
                }
            }
        }

        log::warn!(
            "All data sources failed for {}; generating synthetic {} series",
            symbol,
            period
        );
        let bars = self.synthetic.generate(symbol, period);
        (AssetSeries::new(symbol, bars), DataOrigin::Synthetic)
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.fetch(symbol, "1d").last_close()
    }

    /// Remote symbol search merged with catalog matches. Remote failures degrade
    /// to catalog-only results.
    pub fn search_assets(&self, keywords: &str) -> Vec<SearchResult> {
        let keywords = keywords.trim();
        if keywords.chars().count() < MIN_SEARCH_KEYWORD_CHARS {
            return Vec::new();
        }

        let mut results = match &self.search {
            Some(search) => search.search(keywords).unwrap_or_else(|err| {
                log::warn!("Symbol search failed for '{}': {}", keywords, err);
                Vec::new()
            }),
            None => Vec::new(),
        };

        for asset in AssetCatalog::global().matching(keywords) {
            if results.iter().any(|result| result.symbol == asset.symbol) {
                continue;
            }
            results.push(SearchResult {
                symbol: asset.symbol.clone(),
                name: asset.name.clone(),
                asset_type: asset.asset_class.as_str().to_string(),
                region: "Global".to_string(),
                match_score: CATALOG_MATCH_SCORE,
            });
        }

        results.sort_by(|a, b| {
            let a_us = a.region == "United States";
            let b_us = b.region == "United States";
            b_us.cmp(&a_us).then_with(|| {
                b.match_score
                    .partial_cmp(&a.match_score)
                    .unwrap_or(Ordering::Equal)
            })
        });
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::Bar;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PriceProvider for CountingProvider {
        fn name(&self) -> &'static str {
            if self.fail {
                "failing"
            } else {
                "counting"
            }
        }

        fn fetch_bars(&self, symbol: &str, _period: &str) -> Result<Vec<Bar>, ProviderError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(ProviderError::Http(format!("offline for {}", symbol)));
            }
            Ok((1..=5)
                .rev()
                .map(|day| {
                    let close = 40_000.0 + day as f64 * 100.0;
                    Bar::new(
                        NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                        close,
                        close + 50.0,
                        close - 50.0,
                        close,
                        10.0,
                    )
                })
                .collect())
        }
    }

    struct StaticSearch(Vec<SearchResult>);

    impl SymbolSearch for StaticSearch {
        fn search(&self, _keywords: &str) -> Result<Vec<SearchResult>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSearch;

    impl SymbolSearch for BrokenSearch {
        fn search(&self, _keywords: &str) -> Result<Vec<SearchResult>, ProviderError> {
            Err(ProviderError::Http("quota exceeded".to_string()))
        }
    }

    fn provider(calls: &Arc<AtomicUsize>, fail: bool) -> Box<dyn PriceProvider> {
        Box::new(CountingProvider {
            calls: Arc::clone(calls),
            fail,
        })
    }

    #[test]
    fn falls_through_failing_providers_and_caches_success() {
        let dir = tempfile::tempdir().unwrap();
        let failing_calls = Arc::new(AtomicUsize::new(0));
        let good_calls = Arc::new(AtomicUsize::new(0));
        let source = MarketDataSource::new(
            DataCache::new(dir.path(), Duration::from_secs(3600)),
            vec![provider(&failing_calls, true), provider(&good_calls, false)],
            None,
        );

        let (first, origin) = source.fetch_with_origin("BTC-USD", "5d");
        assert_eq!(origin, DataOrigin::Provider("counting"));
        assert_eq!(first.len(), 5);
        assert!(first.bars.windows(2).all(|w| w[0].date < w[1].date));

        let (second, origin) = source.fetch_with_origin("BTC-USD", "5d");
        assert_eq!(origin, DataOrigin::Cache);
        assert_eq!(first, second);
        assert_eq!(failing_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(good_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(source.latest_price("BTC-USD").map(|p| p > 0.0), Some(true));
    }

    #[test]
    fn all_failures_degrade_to_uncached_synthetic_series() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = MarketDataSource::new(
            DataCache::new(dir.path(), Duration::from_secs(3600)),
            vec![provider(&calls, true)],
            None,
        );

        let (series, origin) = source.fetch_with_origin("ETH-USD", "2y");
        assert_eq!(origin, DataOrigin::Synthetic);
        assert_eq!(series.len(), 731);

        let (again, origin) = source.fetch_with_origin("ETH-USD", "2y");
        assert_eq!(origin, DataOrigin::Synthetic);
        assert_eq!(series, again);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn search_merges_catalog_and_ranks_us_first() {
        let dir = tempfile::tempdir().unwrap();
        let remote = vec![
            SearchResult {
                symbol: "BTCS".to_string(),
                name: "BTCS Inc".to_string(),
                asset_type: "stock".to_string(),
                region: "United States".to_string(),
                match_score: 0.5,
            },
            SearchResult {
                symbol: "BTC-USD".to_string(),
                name: "Bitcoin USD".to_string(),
                asset_type: "crypto".to_string(),
                region: "Global".to_string(),
                match_score: 0.95,
            },
        ];
        let source = MarketDataSource::new(
            DataCache::new(dir.path(), Duration::from_secs(3600)),
            Vec::new(),
            Some(Box::new(StaticSearch(remote))),
        );
        let results = source.search_assets("bitcoin");
        let symbols: Vec<&str> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCS", "BTC-USD", "BCH-USD"]);
        assert_eq!(results[2].match_score, 0.9);
        assert!(source.search_assets("b").is_empty());
    }

    #[test]
    fn search_failure_falls_back_to_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let source = MarketDataSource::new(
            DataCache::new(dir.path(), Duration::from_secs(3600)),
            Vec::new(),
            Some(Box::new(BrokenSearch)),
        );
        let results = source.search_assets("Solana");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "SOL-USD");
        assert_eq!(results[0].asset_type, "crypto");
    }
}
