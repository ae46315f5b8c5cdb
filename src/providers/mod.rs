pub mod alphavantage;
pub mod synthetic;
pub mod yahoo;

pub use alphavantage::AlphaVantageProvider;
pub use synthetic::SyntheticGenerator;
pub use yahoo::{YahooChartProvider, YahooRangeProvider};

use crate::error::ProviderError;
use crate::models::{Bar, SearchResult};

/// A single upstream source of daily bars. Implementations return rows in any
/// order; `normalize_bars` is applied by the caller.
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch_bars(&self, symbol: &str, period: &str) -> Result<Vec<Bar>, ProviderError>;
}

pub trait SymbolSearch: Send + Sync {
    fn search(&self, keywords: &str) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Sorts by date and keeps the last row seen for each date.
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    // stable sort keeps arrival order within a date, so the last one wins below
    bars.sort_by_key(|bar| bar.date);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}
