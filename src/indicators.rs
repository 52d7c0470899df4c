//! Technical indicators.
//!
//! Every function is a pure transform `series -> series` of equal length:
//! the leading `period - 1` positions are `f64::NAN` ("warm-up"), and the
//! rest hold the computed value. If the input is shorter than the period,
//! the result is empty -- callers treat that as insufficient data.

use crate::types::Candle;

/// Simple moving average. Uses a sliding-window running sum plus a
/// valid-sample count so that NaN inputs (from upstream composition, e.g.
/// feeding `atr`'s true-range series back through `sma`) are skipped
/// rather than poisoning the whole window.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if n < period || period == 0 {
        return Vec::new();
    }

    let mut result = vec![f64::NAN; n];
    let mut sum = 0.0;
    let mut count = 0usize;

    for i in 0..n {
        if i >= period {
            let dropped = values[i - period];
            if !dropped.is_nan() {
                sum -= dropped;
                count -= 1;
            }
        }
        if !values[i].is_nan() {
            sum += values[i];
            count += 1;
        }
        if i >= period - 1 && count == period {
            result[i] = sum / period as f64;
        }
    }

    result
}

/// Exponential moving average, seeded at index `period - 1` with the SMA
/// over the first `period` samples.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if n < period || period == 0 {
        return Vec::new();
    }

    let mut result = vec![f64::NAN; n];
    let seed = sma(values, period);
    let alpha = 2.0 / (period as f64 + 1.0);

    result[period - 1] = seed[period - 1];
    for i in period..n {
        result[i] = (values[i] - result[i - 1]) * alpha + result[i - 1];
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if n < period + 1 || period == 0 {
        return Vec::new();
    }

    let mut result = vec![f64::NAN; n];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;

    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gain_sum += change;
        } else {
            loss_sum += -change;
        }
    }

    let mut avg_gain = gain_sum / period as f64;
    let mut avg_loss = loss_sum / period as f64;
    result[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..n {
        let change = values[i] - values[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        result[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// MACD line, signal line, and histogram.
pub struct Macd {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    if fast_ema.is_empty() || slow_ema.is_empty() {
        return Macd {
            macd_line: Vec::new(),
            signal_line: Vec::new(),
            histogram: Vec::new(),
        };
    }

    let mut macd_line = vec![f64::NAN; n];
    for i in 0..n {
        if !fast_ema[i].is_nan() && !slow_ema[i].is_nan() {
            macd_line[i] = fast_ema[i] - slow_ema[i];
        }
    }

    // macd_line is only defined from index slow-1 onward; the signal EMA
    // is seeded over that finite suffix, then re-indexed back.
    let signal_line = ema(&macd_line, signal + slow - 1)
        .into_iter()
        .enumerate()
        .map(|(i, v)| if i < slow - 1 { f64::NAN } else { v })
        .collect::<Vec<_>>();
    let signal_line = if signal_line.is_empty() {
        vec![f64::NAN; n]
    } else {
        signal_line
    };

    let mut histogram = vec![f64::NAN; n];
    for i in 0..n {
        if !macd_line[i].is_nan() && !signal_line[i].is_nan() {
            histogram[i] = macd_line[i] - signal_line[i];
        }
    }

    Macd {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Bollinger Bands: middle = SMA, upper/lower = middle +/- k * population
/// stddev over the trailing window.
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(values: &[f64], period: usize, k: f64) -> BollingerBands {
    let n = values.len();
    let middle = sma(values, period);
    if middle.is_empty() {
        return BollingerBands {
            upper: Vec::new(),
            middle: Vec::new(),
            lower: Vec::new(),
        };
    }

    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];

    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        let mean = middle[i];
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let stddev = variance.sqrt();
        upper[i] = mean + k * stddev;
        lower[i] = mean - k * stddev;
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// True range series: `max(h-l, |h-prev_close|, |l-prev_close|)`. The
/// first sample has no previous close and is NaN.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let n = candles.len();
    if n == 0 {
        return Vec::new();
    }
    let mut tr = vec![f64::NAN; n];
    for i in 1..n {
        let hl = candles[i].high - candles[i].low;
        let hc = (candles[i].high - candles[i - 1].close).abs();
        let lc = (candles[i].low - candles[i - 1].close).abs();
        tr[i] = hl.max(hc).max(lc);
    }
    tr
}

/// Average True Range: `sma(true_range, period)`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    sma(&true_range(candles), period)
}

/// Stochastic oscillator: %K and %D.
pub struct Stochastic {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Stochastic {
    let n = candles.len();
    if n < k_period || k_period == 0 {
        return Stochastic {
            k: Vec::new(),
            d: Vec::new(),
        };
    }

    let mut k = vec![f64::NAN; n];
    for i in (k_period - 1)..n {
        let window = &candles[(i + 1 - k_period)..=i];
        let min_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let max_high = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = max_high - min_low;
        k[i] = if range == 0.0 {
            50.0
        } else {
            100.0 * (candles[i].close - min_low) / range
        };
    }

    let d = sma(&k, d_period);
    let d = if d.is_empty() { vec![f64::NAN; n] } else { d };

    Stochastic { k, d }
}

/// On-Balance Volume: cumulative running total, +volume on up-close,
/// -volume on down-close, unchanged on equal close.
pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let n = candles.len();
    if n == 0 {
        return Vec::new();
    }
    let mut result = vec![0.0; n];
    for i in 1..n {
        result[i] = result[i - 1]
            + if candles[i].close > candles[i - 1].close {
                candles[i].volume
            } else if candles[i].close < candles[i - 1].close {
                -candles[i].volume
            } else {
                0.0
            };
    }
    result
}

/// Average Directional Index: Wilder-smoothed +DI/-DI, DX, then
/// period-smoothed ADX seeded from the first DX value.
pub fn adx(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    if n < period * 2 || period == 0 {
        return Vec::new();
    }

    let tr = true_range(candles);
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    // Wilder-smoothed sliding sums of TR, +DM, -DM.
    let mut tr_sum = 0.0;
    let mut plus_sum = 0.0;
    let mut minus_sum = 0.0;
    for i in 1..=period {
        tr_sum += tr[i];
        plus_sum += plus_dm[i];
        minus_sum += minus_dm[i];
    }

    let mut dx = vec![f64::NAN; n];
    let compute_dx = |plus_sum: f64, minus_sum: f64, tr_sum: f64| -> f64 {
        if tr_sum == 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * plus_sum / tr_sum;
        let minus_di = 100.0 * minus_sum / tr_sum;
        let sum_di = plus_di + minus_di;
        if sum_di == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum_di
        }
    };

    dx[period] = compute_dx(plus_sum, minus_sum, tr_sum);

    for i in (period + 1)..n {
        tr_sum = tr_sum - tr_sum / period as f64 + tr[i];
        plus_sum = plus_sum - plus_sum / period as f64 + plus_dm[i];
        minus_sum = minus_sum - minus_sum / period as f64 + minus_dm[i];
        dx[i] = compute_dx(plus_sum, minus_sum, tr_sum);
    }

    let mut result = vec![f64::NAN; n];
    let adx_start = period * 2 - 1;
    if adx_start >= n {
        return Vec::new();
    }

    let seed: f64 = (period..adx_start + 1).map(|i| dx[i]).sum::<f64>() / period as f64;
    result[adx_start] = seed;

    let mut prev = seed;
    for i in (adx_start + 1)..n {
        prev = (prev * (period - 1) as f64 + dx[i]) / period as f64;
        result[i] = prev;
    }

    result
}

/// Commodity Channel Index.
pub fn cci(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let typical: Vec<f64> = candles
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();
    let sma_typical = sma(&typical, period);
    if sma_typical.is_empty() {
        return Vec::new();
    }

    let mut result = vec![f64::NAN; n];
    for i in (period - 1)..n {
        let window = &typical[(i + 1 - period)..=i];
        let mean = sma_typical[i];
        let mad = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
        result[i] = if mad == 0.0 {
            0.0
        } else {
            (typical[i] - mean) / (0.015 * mad)
        };
    }

    result
}
