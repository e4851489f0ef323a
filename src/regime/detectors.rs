//! Sub-classifiers
//!
//! Each detector reads one aspect of the close series and returns `None`
//! when the series is too short for its lookback.

use crate::config::ClassifierConfig;
use crate::indicators::{annualized_volatility, returns, sma_last};
use crate::{MarketRegime, TrendDirection, VolatilityLevel};

/// Recent realized volatility relative to the window before it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityReading {
    pub level: VolatilityLevel,
    pub ratio: f64,
    pub annualized: f64,
    pub prior_annualized: f64,
    /// Fractional price change across the recent window
    pub price_change: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendReading {
    pub direction: TrendDirection,
    pub strength: f64,
    pub avg_up: f64,
    pub avg_down: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingAverageReading {
    pub regime: MarketRegime,
    pub short_ma: f64,
    pub long_ma: f64,
    /// `|short - long| / long`, 0.0 when the long average is zero
    pub spread: f64,
    pub confidence: f64,
}

// =============================================================================
// Volatility cluster
// =============================================================================

/// Annualized volatility of the last `volatility_lookback` returns against
/// the window before it.
///
/// Two windows without dispersion (a flat or constant-growth series) read as
/// ratio 1.0, which buckets as high volatility under the default thresholds
/// (`vol_medium_ratio` is exclusive). A flat prior window followed by any
/// movement reads as `vol_high_ratio`, i.e. extreme.
pub fn volatility_cluster(closes: &[f64], config: &ClassifierConfig) -> Option<VolatilityReading> {
    let lookback = config.volatility_lookback;
    if closes.len() < 2 * lookback + 1 {
        return None;
    }

    let rets = returns(&closes[closes.len() - (2 * lookback + 1)..]);
    let (prior, recent) = rets.split_at(lookback);

    let annualized = annualized_volatility(recent);
    let prior_annualized = annualized_volatility(prior);

    let ratio = if prior_annualized > 0.0 {
        annualized / prior_annualized
    } else if annualized == 0.0 {
        1.0
    } else {
        // Volatility appeared out of a flat window
        config.vol_high_ratio
    };

    let level = if ratio < config.vol_low_ratio {
        VolatilityLevel::Low
    } else if ratio < config.vol_medium_ratio {
        VolatilityLevel::Medium
    } else if ratio < config.vol_high_ratio {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Extreme
    };

    let window_start = closes[closes.len() - 1 - lookback];
    let last = closes[closes.len() - 1];
    let price_change = if window_start != 0.0 {
        (last - window_start) / window_start
    } else {
        0.0
    };

    Some(VolatilityReading {
        level,
        ratio,
        annualized,
        prior_annualized,
        price_change,
        confidence: (0.5 + (ratio - 1.0).abs()).min(config.vol_confidence_cap),
    })
}

/// Regime implied by volatility alone
pub fn volatility_regime(reading: &VolatilityReading) -> MarketRegime {
    match reading.level {
        VolatilityLevel::Low | VolatilityLevel::Medium => MarketRegime::SidewaysLowVol,
        VolatilityLevel::High => MarketRegime::SidewaysHighVol,
        VolatilityLevel::Extreme if reading.price_change < 0.0 => MarketRegime::Crisis,
        VolatilityLevel::Extreme => MarketRegime::BullVolatile,
    }
}

// =============================================================================
// Trend strength
// =============================================================================

pub fn trend_strength(closes: &[f64], config: &ClassifierConfig) -> Option<TrendReading> {
    let lookback = config.trend_lookback;
    if closes.len() < lookback + 1 {
        return None;
    }

    let window = &closes[closes.len() - (lookback + 1)..];
    let (up_sum, down_sum) = window.windows(2).fold((0.0, 0.0), |(up, down), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (up + change, down)
        } else {
            (up, down - change)
        }
    });

    let avg_up = up_sum / lookback as f64;
    let avg_down = down_sum / lookback as f64;
    let total = avg_up + avg_down;

    let strength = if total > 0.0 {
        ((avg_up - avg_down).abs() / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let direction = if strength == 0.0 {
        TrendDirection::Neutral
    } else if avg_up > avg_down {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    Some(TrendReading {
        direction,
        strength,
        avg_up,
        avg_down,
        confidence: (0.4 + 0.6 * strength).min(0.95),
    })
}

/// Regime implied by trend alone
pub fn trend_regime(reading: &TrendReading, config: &ClassifierConfig) -> MarketRegime {
    if reading.strength < config.sideways_strength {
        return MarketRegime::SidewaysLowVol;
    }
    let trending = reading.strength >= config.trending_strength;
    match (reading.direction, trending) {
        (TrendDirection::Up, true) => MarketRegime::BullTrending,
        (TrendDirection::Up, false) => MarketRegime::BullVolatile,
        (TrendDirection::Down, true) => MarketRegime::BearTrending,
        (TrendDirection::Down, false) => MarketRegime::BearVolatile,
        (TrendDirection::Neutral, _) => MarketRegime::SidewaysLowVol,
    }
}

// =============================================================================
// Moving averages
// =============================================================================

pub fn moving_average(closes: &[f64], config: &ClassifierConfig) -> Option<MovingAverageReading> {
    let short_ma = sma_last(closes, config.ma_short_period)?;
    let long_ma = sma_last(closes, config.ma_long_period)?;
    let price = *closes.last()?;

    let regime = match (short_ma >= long_ma, price >= short_ma) {
        (true, true) => MarketRegime::BullTrending,
        (true, false) => MarketRegime::BullVolatile,
        (false, false) => MarketRegime::BearTrending,
        (false, true) => MarketRegime::BearVolatile,
    };

    let spread = if long_ma != 0.0 {
        (short_ma - long_ma).abs() / long_ma.abs()
    } else {
        0.0
    };

    Some(MovingAverageReading {
        regime,
        short_ma,
        long_ma,
        spread,
        confidence: (0.5 + spread * 10.0).min(0.9),
    })
}

// =============================================================================
// Ensemble decision table
// =============================================================================

/// Combine trend direction, trend-ness and volatility level into a regime.
///
/// Crisis is reached only through a trending down-move with extreme
/// volatility; the caller applies the unconditional extreme-and-down
/// override on top.
pub fn decide(direction: TrendDirection, trending: bool, level: VolatilityLevel) -> MarketRegime {
    use MarketRegime::*;
    use VolatilityLevel::*;

    match (direction, trending, level) {
        (TrendDirection::Up, true, Low | Medium) => BullTrending,
        (TrendDirection::Up, true, High | Extreme) => BullVolatile,
        (TrendDirection::Down, true, Low | Medium) => BearTrending,
        (TrendDirection::Down, true, High) => BearVolatile,
        (TrendDirection::Down, true, Extreme) => Crisis,
        (TrendDirection::Up | TrendDirection::Down, false, Low | Medium) => SidewaysLowVol,
        (TrendDirection::Up | TrendDirection::Down, false, High | Extreme) => SidewaysHighVol,
        (TrendDirection::Neutral, _, Low | Medium) => SidewaysLowVol,
        (TrendDirection::Neutral, _, High | Extreme) => SidewaysHighVol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn test_volatility_needs_two_windows() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        assert!(volatility_cluster(&closes, &config()).is_none());
        let closes: Vec<f64> = (0..41).map(|i| 100.0 + i as f64).collect();
        assert!(volatility_cluster(&closes, &config()).is_some());
    }

    #[test]
    fn test_volatility_spike_is_extreme() {
        // Calm window followed by a violent one
        let mut closes = vec![100.0];
        for i in 0..20 {
            let last = closes[closes.len() - 1];
            closes.push(last * if i % 2 == 0 { 1.001 } else { 0.999 });
        }
        for i in 0..20 {
            let last = closes[closes.len() - 1];
            closes.push(last * if i % 2 == 0 { 1.05 } else { 0.95 });
        }
        let reading = volatility_cluster(&closes, &config()).unwrap();
        assert_eq!(reading.level, VolatilityLevel::Extreme);
        assert!(reading.ratio > 1.5);
        assert_abs_diff_eq!(reading.confidence, 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_series_has_unit_ratio() {
        let closes = vec![100.0; 60];
        let reading = volatility_cluster(&closes, &config()).unwrap();
        assert_eq!(reading.ratio, 1.0);
        assert_eq!(reading.level, VolatilityLevel::High);
        assert_abs_diff_eq!(reading.confidence, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_growth_is_deterministic() {
        for g in [1.001, 1.002, 1.005] {
            let closes: Vec<f64> = (0..60).map(|i| 100.0 * f64::powi(g, i)).collect();
            let reading = volatility_cluster(&closes, &config()).unwrap();
            assert_eq!(reading.annualized, 0.0, "growth {g}");
            assert_eq!(reading.prior_annualized, 0.0, "growth {g}");
            assert_eq!(reading.ratio, 1.0, "growth {g}");
            assert_eq!(reading.level, VolatilityLevel::High, "growth {g}");
            assert_eq!(volatility_regime(&reading), MarketRegime::SidewaysHighVol);
        }
    }

    #[test]
    fn test_trend_strength_monotonic() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let reading = trend_strength(&closes, &config()).unwrap();
        assert_eq!(reading.direction, TrendDirection::Up);
        assert_abs_diff_eq!(reading.strength, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(reading.confidence, 0.95, epsilon = 1e-12);
        assert_eq!(trend_regime(&reading, &config()), MarketRegime::BullTrending);
    }

    #[test]
    fn test_trend_flat_is_neutral() {
        let reading = trend_strength(&[100.0; 51], &config()).unwrap();
        assert_eq!(reading.direction, TrendDirection::Neutral);
        assert_eq!(reading.strength, 0.0);
        assert_eq!(trend_regime(&reading, &config()), MarketRegime::SidewaysLowVol);
    }

    #[test]
    fn test_moving_average_quadrants() {
        // Rising series, last price above the short average
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let reading = moving_average(&rising, &config()).unwrap();
        assert_eq!(reading.regime, MarketRegime::BullTrending);
        assert!(reading.spread > 0.0);

        // Rising series with a sharp last-bar drop below the short average
        let mut pullback = rising.clone();
        *pullback.last_mut().unwrap() = 120.0;
        let reading = moving_average(&pullback, &config()).unwrap();
        assert_eq!(reading.regime, MarketRegime::BullVolatile);

        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let reading = moving_average(&falling, &config()).unwrap();
        assert_eq!(reading.regime, MarketRegime::BearTrending);
    }

    #[test]
    fn test_decision_table() {
        use TrendDirection::*;
        assert_eq!(decide(Up, true, VolatilityLevel::Low), MarketRegime::BullTrending);
        assert_eq!(decide(Up, true, VolatilityLevel::Extreme), MarketRegime::BullVolatile);
        assert_eq!(decide(Down, true, VolatilityLevel::High), MarketRegime::BearVolatile);
        assert_eq!(decide(Down, true, VolatilityLevel::Extreme), MarketRegime::Crisis);
        assert_eq!(decide(Down, false, VolatilityLevel::Medium), MarketRegime::SidewaysLowVol);
        assert_eq!(decide(Up, false, VolatilityLevel::High), MarketRegime::SidewaysHighVol);
        assert_eq!(decide(Neutral, true, VolatilityLevel::Extreme), MarketRegime::SidewaysHighVol);
    }
}
