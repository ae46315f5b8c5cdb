use crate::indicators::{
    calculate_bollinger_bands, calculate_macd, calculate_rolling_std, calculate_rsi,
    calculate_sma, fill_warmup, mean, sample_std,
};
use crate::models::{AssetSeries, Bar, DerivedFields, IndicatorFields, IndicatorRecord, DATE_FORMAT};
use crate::providers::normalize_bars;

const SHORT_MA_WINDOW: usize = 7;
const LONG_MA_WINDOW: usize = 30;
const VOLATILITY_WINDOW: usize = 30;
const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;

/// Forward-fills then back-fills NaN gaps in place; an all-NaN column becomes 0.
fn fill_gaps<F>(bars: &mut [Bar], field: F)
where
    F: Fn(&mut Bar) -> &mut f64,
{
    let mut last: Option<f64> = None;
    for bar in bars.iter_mut() {
        let value = field(bar);
        if value.is_finite() {
            last = Some(*value);
        } else if let Some(prev) = last {
            *value = prev;
        }
    }
    let mut next: Option<f64> = None;
    for bar in bars.iter_mut().rev() {
        let value = field(bar);
        if value.is_finite() {
            next = Some(*value);
        } else {
            *value = next.unwrap_or(0.0);
        }
    }
}

/// Sorts, de-duplicates, fills OHLCV gaps and attaches MA7 / MA30 / 30-day
/// volatility to every row.
pub fn clean(series: &AssetSeries) -> AssetSeries {
    let mut bars = normalize_bars(series.bars.clone());

    fill_gaps(&mut bars, |bar| &mut bar.open);
    fill_gaps(&mut bars, |bar| &mut bar.high);
    fill_gaps(&mut bars, |bar| &mut bar.low);
    fill_gaps(&mut bars, |bar| &mut bar.close);
    fill_gaps(&mut bars, |bar| &mut bar.volume);

    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let overall_mean = mean(&closes);
    let overall_std = sample_std(&closes);

    let ma7 = fill_warmup(&calculate_sma(&closes, SHORT_MA_WINDOW), overall_mean);
    let ma30 = fill_warmup(&calculate_sma(&closes, LONG_MA_WINDOW), overall_mean);
    let volatility = fill_warmup(
        &calculate_rolling_std(&closes, VOLATILITY_WINDOW),
        overall_std,
    );

    for (i, bar) in bars.iter_mut().enumerate() {
        bar.derived = Some(DerivedFields {
            ma7: ma7[i],
            ma30: ma30[i],
            volatility: volatility[i],
        });
    }

    AssetSeries::new(series.symbol.clone(), bars)
}

/// RSI(14), MACD(12, 26, 9) and Bollinger(20, 2) for every row. Runs `clean`
/// first when derived fields are missing.
pub fn calculate_indicators(series: &AssetSeries) -> AssetSeries {
    let mut cleaned = if series.bars.iter().all(|bar| bar.derived.is_some()) {
        series.clone()
    } else {
        clean(series)
    };

    let closes = cleaned.closes();
    let overall_mean = mean(&closes);
    let overall_std = sample_std(&closes);

    let rsi = fill_warmup(&calculate_rsi(&closes, RSI_PERIOD), 50.0);
    let macd = calculate_macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let bands = calculate_bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH);
    let bb_middle = fill_warmup(&bands.middle, overall_mean);
    let bb_upper = fill_warmup(&bands.upper, overall_mean + BOLLINGER_WIDTH * overall_std);
    let bb_lower = fill_warmup(&bands.lower, overall_mean - BOLLINGER_WIDTH * overall_std);

    for (i, bar) in cleaned.bars.iter_mut().enumerate() {
        bar.indicators = Some(IndicatorFields {
            rsi: rsi[i],
            macd: macd.macd[i],
            signal: macd.signal[i],
            histogram: macd.histogram[i],
            bb_upper: bb_upper[i],
            bb_middle: bb_middle[i],
            bb_lower: bb_lower[i],
        });
    }

    cleaned
}

pub fn indicator_records(series: &AssetSeries) -> Vec<IndicatorRecord> {
    let with_indicators = if series.bars.iter().all(|bar| bar.indicators.is_some()) {
        series.clone()
    } else {
        calculate_indicators(series)
    };
    with_indicators
        .bars
        .iter()
        .filter_map(|bar| {
            let ind = bar.indicators?;
            Some(IndicatorRecord {
                date: bar.date.format(DATE_FORMAT).to_string(),
                close: bar.close,
                rsi: ind.rsi,
                macd: ind.macd,
                signal_line: ind.signal,
                macd_histogram: ind.histogram,
                bb_upper: ind.bb_upper,
                bb_middle: ind.bb_middle,
                bb_lower: ind.bb_lower,
            })
        })
        .collect()
}
