//! Rolling-window indicator math over close prices. Warm-up rows are `None`;
//! `fill_warmup` turns them into defined values.

use statrs::statistics::Statistics;

/// Simple moving average; the first `period - 1` rows are `None`.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || prices.len() < period {
        return vec![None; prices.len()];
    }

    let mut sma_values = vec![None; period - 1];
    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(Some(window_sum / period as f64));
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(Some(window_sum / period as f64));
    }

    sma_values
}

/// Rolling sample standard deviation (n - 1 denominator).
pub fn calculate_rolling_std(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period < 2 || prices.len() < period {
        return vec![None; prices.len()];
    }
    let mut values = vec![None; period - 1];
    for i in (period - 1)..prices.len() {
        let window = &prices[i + 1 - period..=i];
        values.push(Some(sample_std(window)));
    }
    values
}

/// EMA seeded with the first price, no bias adjustment.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

pub struct MacdOutput {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal = calculate_ema(&macd, signal_period);
    let histogram = macd
        .iter()
        .zip(signal.iter())
        .map(|(m, s)| m - s)
        .collect();

    MacdOutput {
        macd,
        signal,
        histogram,
    }
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI. Rows before the first full `period` of deltas are `None`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || prices.len() < period + 1 {
        return vec![None; prices.len()];
    }

    let mut rsi_values = vec![None; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = Some(rsi_from_avgs(avg_gain, avg_loss));

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = Some(rsi_from_avgs(avg_gain, avg_loss));
    }

    rsi_values
}

pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// SMA(period) +/- `width` rolling sample standard deviations.
pub fn calculate_bollinger_bands(prices: &[f64], period: usize, width: f64) -> BollingerBands {
    let middle = calculate_sma(prices, period);
    let std = calculate_rolling_std(prices, period);
    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(std.iter())
            .map(|(mean, sd)| match (mean, sd) {
                (Some(mean), Some(sd)) => Some(mean + sign * width * sd),
                _ => None,
            })
            .collect()
    };
    let upper = band(1.0);
    let lower = band(-1.0);
    BollingerBands {
        upper,
        middle,
        lower,
    }
}

pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().mean()
}

/// Back-fills then forward-fills `None`s. A column with no defined value at all
/// takes `fallback` everywhere.
pub fn fill_warmup(values: &[Option<f64>], fallback: f64) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = values.to_vec();
    let mut next: Option<f64> = None;
    for value in filled.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => *value = next,
        }
    }
    let mut prev: Option<f64> = None;
    filled
        .into_iter()
        .map(|value| {
            if let Some(v) = value {
                prev = Some(v);
            }
            value.or(prev).unwrap_or(fallback)
        })
        .collect()
}
