//! Technical indicators
//!
//! Moving averages and Bollinger Bands wrap the `ta` crate. ATR and RSI use
//! Wilder's smoothing and are implemented here so that the degenerate cases
//! (flat ranges, no losses) resolve to defined values instead of NaN.
//!
//! Series functions return one `Option<f64>` per input value, `None` until
//! the indicator is warmed up.

use statrs::statistics::Statistics;
use ta::indicators::{BollingerBands as TaBB, SimpleMovingAverage};
use ta::Next;

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Trading periods per year used to annualize volatility
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Relative dispersion treated as no dispersion at all
const STD_DEV_EPSILON: f64 = 1e-12;

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Latest SMA value, if enough data
pub fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    sma(values, period).last().copied().flatten()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR) using Wilder's smoothing
///
/// ATR = (prev_ATR * (period - 1) + current_TR) / period, seeded with the SMA
/// of the first `period` true ranges.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(high.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else {
            atr_value = atr_value.map(|prev| (prev * (period - 1) as f64 + tr[i]) / period as f64);
            result.push(atr_value);
        }
    }

    result
}

/// Latest ATR value, if enough data
pub fn atr_last(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    atr(high, low, close, period).last().copied().flatten()
}

/// Calculate Bollinger Bands using ta crate
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let mut indicator = match TaBB::new(period, num_std) {
        Ok(i) => i,
        Err(_) => {
            return (
                vec![None; values.len()],
                vec![None; values.len()],
                vec![None; values.len()],
            )
        }
    };

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            upper.push(Some(bb.upper));
            middle.push(Some(bb.average));
            lower.push(Some(bb.lower));
        } else {
            upper.push(None);
            middle.push(None);
            lower.push(None);
        }
    }

    (upper, middle, lower)
}

/// Latest (upper, middle, lower) band, if enough data
pub fn bollinger_last(values: &[f64], period: usize, num_std: f64) -> Option<(f64, f64, f64)> {
    let (upper, middle, lower) = bollinger_bands(values, period, num_std);
    Some((
        upper.last().copied().flatten()?,
        middle.last().copied().flatten()?,
        lower.last().copied().flatten()?,
    ))
}

// =============================================================================
// Momentum Indicators
// =============================================================================

/// Latest RSI using Wilder's smoothing
///
/// Returns `None` until `period + 1` values are available, 100.0 when the
/// average loss is zero and 50.0 when the window has no movement at all.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let initial = &changes[..period];

    let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>()
        / period as f64;

    for &change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

// =============================================================================
// Return Statistics
// =============================================================================

/// Simple returns between consecutive values (0.0 where the prior value is 0)
pub fn returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Sample standard deviation, 0.0 for fewer than two values.
///
/// Dispersion below rounding level relative to the mean (a constant-return
/// window) is reported as exactly 0.0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sd = values.std_dev();
    let scale = values.mean().abs().max(1.0);
    if sd.is_finite() && sd > STD_DEV_EPSILON * scale {
        sd
    } else {
        0.0
    }
}

/// Mean, 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

/// Annualized standard deviation of a return series
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    std_dev(returns) * PERIODS_PER_YEAR.sqrt()
}

/// Highest value of the last `lookback` entries
pub fn highest(values: &[f64], lookback: usize) -> Option<f64> {
    if values.is_empty() || lookback == 0 {
        return None;
    }
    let start = values.len().saturating_sub(lookback);
    values[start..].iter().copied().reduce(f64::max)
}

/// Lowest value of the last `lookback` entries
pub fn lowest(values: &[f64], lookback: usize) -> Option<f64> {
    if values.is_empty() || lookback == 0 {
        return None;
    }
    let start = values.len().saturating_sub(lookback);
    values[start..].iter().copied().reduce(f64::min)
}

/// Fractional decline of `price` from `peak`, 0.0 when the peak is not positive
pub fn drawdown(peak: f64, price: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - price) / peak).max(0.0)
}

// =============================================================================
// Tests
// =============================================================================
