//! Catalog-wide scans: daily movers and the close-price correlation matrix.

use crate::catalog::AssetCatalog;
use crate::market_data::MarketDataSource;
use crate::models::{AssetClass, AssetInfo};
use crate::providers::synthetic::symbol_seed;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MOVERS_PERIOD: &str = "5d";
const MOVERS_WORKERS: usize = 10;
const MOVERS_DEADLINE: Duration = Duration::from_secs(3);
const MOVERS_LIMIT: usize = 20;
const MIN_COVERAGE: f64 = 0.5;
const CORRELATION_PERIOD: &str = "6mo";
const CORRELATION_THREADS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverQuote {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
    pub price: f64,
    pub change_amount: f64,
    /// Percent change from the previous close.
    pub change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoversReport {
    pub gainers: Vec<MoverQuote>,
    pub losers: Vec<MoverQuote>,
    pub all: BTreeMap<String, MoverQuote>,
}

fn quote_from_source(source: &MarketDataSource, asset: &AssetInfo) -> Option<MoverQuote> {
    let closes: Vec<f64> = source
        .fetch(&asset.symbol, MOVERS_PERIOD)
        .closes()
        .into_iter()
        .filter(|close| close.is_finite())
        .collect();
    let [.., prev, last] = closes.as_slice() else {
        return None;
    };
    if *prev <= 0.0 {
        return None;
    }
    let change_amount = last - prev;
    Some(MoverQuote {
        symbol: asset.symbol.clone(),
        name: asset.name.clone(),
        asset_class: asset.asset_class,
        price: *last,
        change_amount,
        change: change_amount / prev * 100.0,
    })
}

/// Stand-in quote when live coverage is too thin. Seeded per symbol so repeated
/// scans agree.
fn synthetic_quote(asset: &AssetInfo) -> MoverQuote {
    let mut rng = StdRng::seed_from_u64(symbol_seed(&asset.symbol));
    let volatility = if asset.asset_class == AssetClass::Crypto {
        10.0
    } else {
        5.0
    };
    let change = rng.gen_range(-volatility..volatility);
    let random_price = 100.0 * rng.gen_range(0.5..2.0);
    let price = match asset.symbol.as_str() {
        "BTC-USD" => 45_000.0,
        "ETH-USD" => 2_500.0,
        "AAPL" => 180.0,
        "MSFT" => 350.0,
        "NVDA" => 500.0,
        _ => random_price,
    };
    MoverQuote {
        symbol: asset.symbol.clone(),
        name: asset.name.clone(),
        asset_class: asset.asset_class,
        price,
        change_amount: price * change / 100.0,
        change,
    }
}

pub fn market_movers(source: Arc<MarketDataSource>, catalog: &AssetCatalog) -> MoversReport {
    market_movers_with_deadline(source, catalog, MOVERS_DEADLINE)
}

/// Fetches every catalog symbol on a fixed worker pool and collects whatever
/// finished before `deadline`. Late workers are left running; their sends fail
/// once the result receiver is gone.
pub fn market_movers_with_deadline(
    source: Arc<MarketDataSource>,
    catalog: &AssetCatalog,
    deadline: Duration,
) -> MoversReport {
    let assets = catalog.all();
    if assets.is_empty() {
        return MoversReport::default();
    }
    log::info!("Fetching movers for {} assets", assets.len());

    let (job_tx, job_rx): (Sender<AssetInfo>, Receiver<AssetInfo>) = bounded(assets.len());
    let (result_tx, result_rx): (Sender<Option<MoverQuote>>, Receiver<Option<MoverQuote>>) =
        bounded(assets.len());

    let workers = MOVERS_WORKERS.min(assets.len());
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let source = Arc::clone(&source);
        thread::spawn(move || {
            while let Ok(asset) = job_rx.recv() {
                let quote = quote_from_source(&source, &asset);
                if result_tx.send(quote).is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    for asset in assets {
        if job_tx.send(asset.clone()).is_err() {
            break;
        }
    }
    drop(job_tx);

    let until = Instant::now() + deadline;
    let mut quotes = Vec::new();
    let mut completed = 0;
    while completed < assets.len() {
        match result_rx.recv_deadline(until) {
            Ok(quote) => {
                completed += 1;
                quotes.extend(quote);
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Movers scan hit its deadline after {}/{} assets",
                    completed,
                    assets.len()
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(result_rx);

    if (quotes.len() as f64) < assets.len() as f64 * MIN_COVERAGE {
        log::warn!(
            "Only {} of {} live quotes; backfilling with synthetic quotes",
            quotes.len(),
            assets.len()
        );
        let live: HashSet<String> = quotes.iter().map(|q| q.symbol.clone()).collect();
        quotes.extend(
            assets
                .iter()
                .filter(|asset| !live.contains(&asset.symbol))
                .map(synthetic_quote),
        );
    }

    build_report(quotes)
}

fn build_report(mut quotes: Vec<MoverQuote>) -> MoversReport {
    quotes.sort_by(|a, b| b.change.partial_cmp(&a.change).unwrap_or(Ordering::Equal));

    let gainers: Vec<MoverQuote> = quotes
        .iter()
        .filter(|q| q.change > 0.0)
        .take(MOVERS_LIMIT)
        .cloned()
        .collect();
    let losers: Vec<MoverQuote> = quotes
        .iter()
        .rev()
        .filter(|q| q.change < 0.0)
        .take(MOVERS_LIMIT)
        .cloned()
        .collect();
    let all = quotes
        .into_iter()
        .map(|quote| (quote.symbol.clone(), quote))
        .collect();

    MoversReport {
        gainers,
        losers,
        all,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCell {
    pub x: String,
    pub y: String,
    /// `None` when either series is constant.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub assets: Vec<AssetInfo>,
    pub matrix: Vec<CorrelationCell>,
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let sd_x = x.std_dev();
    let sd_y = y.std_dev();
    if !(sd_x > 0.0 && sd_y > 0.0) {
        return None;
    }
    let value = x.covariance(y) / (sd_x * sd_y);
    Some(value.clamp(-1.0, 1.0))
}

/// Places each series on the shared date axis, then forward- and back-fills.
fn align_closes(columns: &[BTreeMap<NaiveDate, f64>]) -> Vec<Vec<f64>> {
    let dates: BTreeSet<NaiveDate> = columns.iter().flat_map(|c| c.keys().copied()).collect();
    columns
        .iter()
        .map(|column| {
            let mut values: Vec<Option<f64>> = dates.iter().map(|d| column.get(d).copied()).collect();
            let mut last = None;
            for value in values.iter_mut() {
                match value {
                    Some(v) => last = Some(*v),
                    None => *value = last,
                }
            }
            let mut next = None;
            for value in values.iter_mut().rev() {
                match value {
                    Some(v) => next = Some(*v),
                    None => *value = next,
                }
            }
            values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
        })
        .collect()
}

pub fn correlation_matrix(source: &MarketDataSource, catalog: &AssetCatalog) -> Result<CorrelationReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(CORRELATION_THREADS)
        .build()
        .context("Failed to build correlation thread pool")?;
    log::info!("Fetching data for correlation matrix");

    let fetched: Vec<(AssetInfo, BTreeMap<NaiveDate, f64>)> = pool.install(|| {
        catalog
            .all()
            .par_iter()
            .map(|asset| {
                let series = source.fetch(&asset.symbol, CORRELATION_PERIOD);
                let closes = series
                    .bars
                    .iter()
                    .filter(|bar| bar.close.is_finite())
                    .map(|bar| (bar.date, bar.close))
                    .collect();
                (asset.clone(), closes)
            })
            .collect()
    });

    let (assets, columns): (Vec<AssetInfo>, Vec<BTreeMap<NaiveDate, f64>>) = fetched
        .into_iter()
        .filter(|(asset, closes)| {
            if closes.is_empty() {
                log::warn!("No data for {}; dropping it from the correlation matrix", asset.symbol);
            }
            !closes.is_empty()
        })
        .unzip();
    let aligned = align_closes(&columns);

    let mut matrix = Vec::with_capacity(assets.len() * assets.len());
    for (xi, x_asset) in assets.iter().enumerate() {
        for (yi, y_asset) in assets.iter().enumerate() {
            matrix.push(CorrelationCell {
                x: x_asset.symbol.clone(),
                y: y_asset.symbol.clone(),
                value: pearson(&aligned[xi], &aligned[yi]),
            });
        }
    }

    Ok(CorrelationReport { assets, matrix })
}
