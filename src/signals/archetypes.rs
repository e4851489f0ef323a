//! Archetype builders
//!
//! Each builder inspects precomputed [`Readings`] and returns a [`Draft`]
//! when its precondition holds. Identifiers, expiry and the risk-reward
//! ratio are attached by the generator.

use std::collections::BTreeMap;

use crate::config::{GeneratorConfig, RegimeProfile};
use crate::data::PriceSeries;
use crate::indicators::{
    annualized_volatility, atr_last, bollinger_last, drawdown, highest, lowest, returns, rsi,
    sma_last, std_dev,
};
use crate::{Direction, Metadata, SignalType};

// =============================================================================
// Effective parameters
// =============================================================================

pub const STOP_MULTIPLIER: &str = "atr.stop_multiplier";
pub const TARGET_MULTIPLIER: &str = "atr.target_multiplier";
pub const SMA_PERIOD: &str = "sma.period";
pub const RSI_PERIOD: &str = "rsi.period";
pub const RSI_OVERBOUGHT: &str = "rsi.overbought";
pub const RSI_OVERSOLD: &str = "rsi.oversold";
pub const SIZE_FACTOR: &str = "position.size_factor";

/// Parameters a builder runs with: the regime profile overlaid with any
/// tuned values from the parameter store
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
    pub sma_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub size_factor: f64,
}

impl Tunables {
    pub fn resolve(profile: &RegimeProfile, effective: &BTreeMap<String, f64>) -> Self {
        let get = |key: &str, default: f64| effective.get(key).copied().unwrap_or(default);
        let period = |key: &str, default: usize| {
            effective
                .get(key)
                .filter(|v| v.is_finite() && **v >= 1.0)
                .map(|v| v.round() as usize)
                .unwrap_or(default)
        };

        Self {
            stop_multiplier: get(STOP_MULTIPLIER, profile.atr_stop_multiplier),
            target_multiplier: get(TARGET_MULTIPLIER, profile.atr_target_multiplier),
            sma_period: period(SMA_PERIOD, profile.sma_period),
            rsi_period: period(RSI_PERIOD, profile.rsi_period),
            rsi_overbought: get(RSI_OVERBOUGHT, profile.rsi_overbought),
            rsi_oversold: get(RSI_OVERSOLD, profile.rsi_oversold),
            size_factor: get(SIZE_FACTOR, profile.position_size_factor),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (STOP_MULTIPLIER.to_string(), self.stop_multiplier),
            (TARGET_MULTIPLIER.to_string(), self.target_multiplier),
            (SMA_PERIOD.to_string(), self.sma_period as f64),
            (RSI_PERIOD.to_string(), self.rsi_period as f64),
            (RSI_OVERBOUGHT.to_string(), self.rsi_overbought),
            (RSI_OVERSOLD.to_string(), self.rsi_oversold),
            (SIZE_FACTOR.to_string(), self.size_factor),
        ])
    }
}

// =============================================================================
// Readings
// =============================================================================

/// Series views and indicators shared by every builder in one generation
pub struct Readings<'a> {
    pub closes: &'a [f64],
    pub highs: &'a [f64],
    pub lows: &'a [f64],
    pub price: f64,
    /// ATR, or a fixed fraction of price when ATR is unavailable or flat
    pub atr: f64,
    pub atr_is_fallback: bool,
}

impl<'a> Readings<'a> {
    pub fn new(series: &'a PriceSeries, config: &GeneratorConfig) -> Self {
        let closes = series.closes();
        let highs = series.highs_or_closes();
        let lows = series.lows_or_closes();
        let price = series.last_close();

        let measured = atr_last(highs, lows, closes, config.atr_period).filter(|a| *a > 0.0);
        Self {
            closes,
            highs,
            lows,
            price,
            atr: measured.unwrap_or(price.abs() * config.fallback_atr_pct),
            atr_is_fallback: measured.is_none(),
        }
    }

    fn len(&self) -> usize {
        self.closes.len()
    }

    /// Entry at the current price with ATR-multiple stop and target
    fn atr_levels(&self, direction: Direction, stop_mult: f64, target_mult: f64) -> Levels {
        let p = self.price;
        let (stop, target) = match direction {
            Direction::Short => (p + stop_mult * self.atr, p - target_mult * self.atr),
            _ => (p - stop_mult * self.atr, p + target_mult * self.atr),
        };
        Levels {
            entry: Some(p),
            stop: Some(stop),
            target: Some(target),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub entry: Option<f64>,
    pub stop: Option<f64>,
    pub target: Option<f64>,
}

/// A built signal before identity and timing are attached
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub signal_type: SignalType,
    pub direction: Direction,
    pub strength: f64,
    /// Multiplier applied to the blended confidence
    pub confidence_factor: f64,
    pub levels: Levels,
    pub notes: String,
    pub metadata: Metadata,
}

impl Draft {
    fn new(signal_type: SignalType, direction: Direction, strength: f64, levels: Levels) -> Self {
        Self {
            signal_type,
            direction,
            strength: strength.clamp(0.0, 1.0),
            confidence_factor: 1.0,
            levels,
            notes: String::new(),
            metadata: Metadata::new(),
        }
    }

    fn note(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    fn meta(mut self, key: &str, value: f64) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Indicator names each archetype consults
pub fn indicators_for(signal_type: SignalType) -> &'static [&'static str] {
    match signal_type {
        SignalType::Momentum => &["sma", "rsi", "atr"],
        SignalType::MeanReversion => &["bollinger_bands", "rsi", "atr"],
        SignalType::Breakout | SignalType::Breakdown => &["price_channel", "atr"],
        SignalType::TrendFollowing => &["sma_fast", "sma_slow", "atr"],
        SignalType::CounterTrend => &["rsi", "sma", "atr"],
        SignalType::VolatilityExpansion | SignalType::VolatilityContraction => {
            &["realized_volatility", "atr"]
        }
        SignalType::Defensive => &["realized_volatility", "drawdown"],
        SignalType::Aggressive => &["price_channel", "momentum", "rsi", "atr"],
    }
}

/// Closes an archetype needs before it can be evaluated
pub fn required_bars(signal_type: SignalType, t: &Tunables, config: &GeneratorConfig) -> usize {
    match signal_type {
        SignalType::Momentum => t.sma_period.max(t.rsi_period + 1),
        SignalType::MeanReversion => config.bollinger_period.max(t.rsi_period + 1),
        SignalType::Breakout | SignalType::Breakdown => config.breakout_lookback + 1,
        SignalType::TrendFollowing => trend_periods(t).1 + 1,
        SignalType::CounterTrend => t.sma_period.max(t.rsi_period + 1),
        SignalType::VolatilityExpansion => {
            config.volatility_short_window + config.volatility_prior_window + 1
        }
        SignalType::VolatilityContraction => {
            (config.volatility_short_window + config.volatility_prior_window + 1).max(t.sma_period)
        }
        SignalType::Defensive => config.defensive_lookback + 1,
        SignalType::Aggressive => (config.aggressive_lookback)
            .max(config.aggressive_momentum_period + 1)
            .max(t.rsi_period + 1),
    }
}

pub fn build(
    signal_type: SignalType,
    r: &Readings,
    t: &Tunables,
    config: &GeneratorConfig,
) -> Option<Draft> {
    // Stops and targets are ATR multiples
    if r.atr <= 0.0 && signal_type != SignalType::Defensive {
        return None;
    }

    match signal_type {
        SignalType::Momentum => momentum(r, t),
        SignalType::MeanReversion => mean_reversion(r, t, config),
        SignalType::Breakout => breakout(r, t, config),
        SignalType::Breakdown => breakdown(r, t, config),
        SignalType::TrendFollowing => trend_following(r, t, config),
        SignalType::CounterTrend => counter_trend(r, t, config),
        SignalType::VolatilityExpansion => volatility_expansion(r, t, config),
        SignalType::VolatilityContraction => volatility_contraction(r, t, config),
        SignalType::Defensive => defensive(r, config),
        SignalType::Aggressive => aggressive(r, t, config),
    }
}

// =============================================================================
// Builders
// =============================================================================

fn momentum(r: &Readings, t: &Tunables) -> Option<Draft> {
    let sma = sma_last(r.closes, t.sma_period)?;
    let rsi = rsi(r.closes, t.rsi_period)?;

    let direction = if r.price > sma && rsi > 50.0 && rsi < t.rsi_overbought {
        Direction::Long
    } else if r.price < sma && rsi < 50.0 && rsi > t.rsi_oversold {
        Direction::Short
    } else {
        return None;
    };

    let strength = ((rsi - 50.0).abs() / 25.0).min(1.0);
    let levels = r.atr_levels(direction, t.stop_multiplier, t.target_multiplier);

    Some(
        Draft::new(SignalType::Momentum, direction, strength, levels)
            .note(format!("RSI {:.1} with price on the trend side of SMA{}", rsi, t.sma_period))
            .meta("sma", sma)
            .meta("rsi", rsi)
            .meta("atr", r.atr),
    )
}

fn mean_reversion(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let (upper, middle, lower) = bollinger_last(r.closes, config.bollinger_period, config.bollinger_std)?;
    let rsi = rsi(r.closes, t.rsi_period)?;
    let half_width = upper - middle;

    let (direction, excess) = if r.price < lower && rsi < t.rsi_oversold {
        (Direction::Long, lower - r.price)
    } else if r.price > upper && rsi > t.rsi_overbought {
        (Direction::Short, r.price - upper)
    } else {
        return None;
    };

    let strength = if half_width > 0.0 {
        (0.5 + excess / half_width).min(1.0)
    } else {
        0.5
    };

    let stop_distance = config.mean_reversion_stop_factor * t.stop_multiplier * r.atr;
    let stop = match direction {
        Direction::Short => r.price + stop_distance,
        _ => r.price - stop_distance,
    };
    let levels = Levels {
        entry: Some(r.price),
        stop: Some(stop),
        target: Some(middle),
    };

    Some(
        Draft::new(SignalType::MeanReversion, direction, strength, levels)
            .note(format!("Price outside the {:.1}σ band with RSI {:.1}", config.bollinger_std, rsi))
            .meta("bb_upper", upper)
            .meta("bb_middle", middle)
            .meta("bb_lower", lower)
            .meta("rsi", rsi)
            .meta("atr", r.atr),
    )
}

/// Highest high and lowest low of the `lookback` bars before the current one
fn prior_channel(r: &Readings, lookback: usize) -> Option<(f64, f64)> {
    let n = r.len();
    if n < lookback + 1 {
        return None;
    }
    let high = highest(&r.highs[..n - 1], lookback)?;
    let low = lowest(&r.lows[..n - 1], lookback)?;
    Some((high, low))
}

fn breakout(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let (level, _) = prior_channel(r, config.breakout_lookback)?;
    if r.price <= level {
        return None;
    }

    let strength = 0.5 + 0.5 * (r.price - level) / r.atr;
    let levels = Levels {
        entry: Some(r.price),
        stop: Some(level - config.breakout_stop_buffer_atr * r.atr),
        target: Some(r.price + t.target_multiplier * r.atr),
    };

    Some(
        Draft::new(SignalType::Breakout, Direction::Long, strength, levels)
            .note(format!("Close above the {}-bar high {:.4}", config.breakout_lookback, level))
            .meta("breakout_level", level)
            .meta("atr", r.atr),
    )
}

fn breakdown(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let (_, level) = prior_channel(r, config.breakout_lookback)?;
    if r.price >= level {
        return None;
    }

    let strength = 0.5 + 0.5 * (level - r.price) / r.atr;
    let levels = Levels {
        entry: Some(r.price),
        stop: Some(level + config.breakout_stop_buffer_atr * r.atr),
        target: Some(r.price - t.target_multiplier * r.atr),
    };

    Some(
        Draft::new(SignalType::Breakdown, Direction::Short, strength, levels)
            .note(format!("Close below the {}-bar low {:.4}", config.breakout_lookback, level))
            .meta("breakdown_level", level)
            .meta("atr", r.atr),
    )
}

/// Fast and slow periods derived from the regime SMA period
fn trend_periods(t: &Tunables) -> (usize, usize) {
    ((t.sma_period / 2).max(5), t.sma_period * 2)
}

fn trend_following(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let (fast_period, slow_period) = trend_periods(t);
    let n = r.len();
    if n < slow_period + 1 {
        return None;
    }

    let fast = sma_last(r.closes, fast_period)?;
    let slow = sma_last(r.closes, slow_period)?;
    let prev_fast = sma_last(&r.closes[..n - 1], fast_period)?;
    let prev_slow = sma_last(&r.closes[..n - 1], slow_period)?;

    let (direction, fresh_cross) = if fast > slow && r.price > fast {
        (Direction::Long, prev_fast <= prev_slow)
    } else if fast < slow && r.price < fast {
        (Direction::Short, prev_fast >= prev_slow)
    } else {
        return None;
    };

    let spread = if slow != 0.0 { (fast - slow).abs() / slow.abs() } else { 0.0 };
    let mut strength = 0.4 + (spread * 10.0).min(0.4);
    if fresh_cross {
        strength += config.crossover_boost;
    }

    let buffer = 0.5 * r.atr;
    let (stop, target) = match direction {
        Direction::Short => (slow + buffer, r.price - t.target_multiplier * r.atr),
        _ => (slow - buffer, r.price + t.target_multiplier * r.atr),
    };
    let levels = Levels {
        entry: Some(r.price),
        stop: Some(stop),
        target: Some(target),
    };

    let note = match (direction, fresh_cross) {
        (Direction::Long, true) => "Golden cross".to_string(),
        (Direction::Short, true) => "Death cross".to_string(),
        _ => format!("SMA{} / SMA{} aligned with price", fast_period, slow_period),
    };

    Some(
        Draft::new(SignalType::TrendFollowing, direction, strength, levels)
            .note(note)
            .meta("sma_fast", fast)
            .meta("sma_slow", slow)
            .meta("ma_spread", spread)
            .meta("atr", r.atr),
    )
}

fn counter_trend(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let rsi = rsi(r.closes, t.rsi_period)?;
    let sma = sma_last(r.closes, t.sma_period)?;

    let direction = if rsi < config.counter_trend_oversold {
        Direction::Long
    } else if rsi > config.counter_trend_overbought {
        Direction::Short
    } else {
        return None;
    };

    let mut levels = r.atr_levels(direction, t.stop_multiplier, t.target_multiplier);
    // Revert to the mean when it lies ahead of price
    let mean_ahead = match direction {
        Direction::Short => sma < r.price,
        _ => sma > r.price,
    };
    if mean_ahead {
        levels.target = Some(sma);
    }

    let strength = ((rsi - 50.0).abs() / 50.0).min(1.0);
    let mut draft = Draft::new(SignalType::CounterTrend, direction, strength, levels)
        .note(format!("Contrarian entry on RSI {:.1}", rsi))
        .meta("rsi", rsi)
        .meta("sma", sma)
        .meta("atr", r.atr);
    draft.confidence_factor = config.counter_trend_confidence;
    Some(draft)
}

/// Sample volatility of the short window relative to the window before it
fn volatility_ratio(r: &Readings, config: &GeneratorConfig) -> Option<f64> {
    let short = config.volatility_short_window;
    let prior = config.volatility_prior_window;
    let n = r.len();
    if n < short + prior + 1 {
        return None;
    }

    let rets = returns(&r.closes[n - (short + prior + 1)..]);
    let (prior_rets, short_rets) = rets.split_at(prior);
    let prior_std = std_dev(prior_rets);
    if prior_std <= 0.0 {
        return None;
    }
    Some(std_dev(short_rets) / prior_std)
}

fn volatility_expansion(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let ratio = volatility_ratio(r, config)?;
    if ratio <= config.expansion_multiple {
        return None;
    }

    let n = r.len();
    let reference = r.closes[n.checked_sub(4)?];
    let direction = if r.price > reference {
        Direction::Long
    } else if r.price < reference {
        Direction::Short
    } else {
        return None;
    };

    let strength = (0.5 * ratio / config.expansion_multiple).min(1.0);
    let levels = r.atr_levels(direction, t.stop_multiplier, t.target_multiplier);

    Some(
        Draft::new(SignalType::VolatilityExpansion, direction, strength, levels)
            .note(format!("Short-window volatility {:.2}x the prior window", ratio))
            .meta("volatility_ratio", ratio)
            .meta("atr", r.atr),
    )
}

fn volatility_contraction(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let ratio = volatility_ratio(r, config)?;
    if ratio >= config.contraction_ratio {
        return None;
    }

    let sma = sma_last(r.closes, t.sma_period)?;
    let direction = if r.price > sma {
        Direction::Long
    } else if r.price < sma {
        Direction::Short
    } else {
        return None;
    };

    let strength = 0.5 + 0.5 * (config.contraction_ratio - ratio) / config.contraction_ratio;
    let levels = r.atr_levels(
        direction,
        t.stop_multiplier,
        t.target_multiplier * config.contraction_target_factor,
    );

    Some(
        Draft::new(SignalType::VolatilityContraction, direction, strength, levels)
            .note(format!("Volatility squeeze at {:.2}x the prior window", ratio))
            .meta("volatility_ratio", ratio)
            .meta("sma", sma)
            .meta("atr", r.atr),
    )
}

fn defensive(r: &Readings, config: &GeneratorConfig) -> Option<Draft> {
    let lookback = config.defensive_lookback;
    let n = r.len();
    if n < lookback + 1 {
        return None;
    }

    let volatility = annualized_volatility(&returns(&r.closes[n - (lookback + 1)..]));
    let peak = highest(r.highs, lookback)?;
    let dd = drawdown(peak, r.price);

    if volatility <= config.defensive_volatility && dd <= config.defensive_drawdown {
        return None;
    }

    let severity = (volatility / config.defensive_volatility).max(dd / config.defensive_drawdown);
    let strength = (0.5 * severity).min(1.0);

    // Entry only, so an opened defensive signal is measured from here
    let levels = Levels {
        entry: Some(r.price),
        ..Levels::default()
    };

    Some(
        Draft::new(SignalType::Defensive, Direction::Neutral, strength, levels)
            .note(format!(
                "Reduce exposure: volatility {:.0}%, drawdown {:.1}%",
                volatility * 100.0,
                dd * 100.0
            ))
            .meta("annualized_volatility", volatility)
            .meta("drawdown", dd)
            .meta("recent_high", peak),
    )
}

fn aggressive(r: &Readings, t: &Tunables, config: &GeneratorConfig) -> Option<Draft> {
    let n = r.len();
    let recent_low = lowest(r.lows, config.aggressive_lookback)?;
    if recent_low <= 0.0 {
        return None;
    }

    let bounce = (r.price - recent_low) / recent_low;
    let momentum = r.price - r.closes[n.checked_sub(config.aggressive_momentum_period + 1)?];
    let rsi = rsi(r.closes, t.rsi_period)?;

    if bounce < config.aggressive_min_bounce
        || momentum <= 0.0
        || rsi < config.aggressive_rsi_low
        || rsi > config.aggressive_rsi_high
    {
        return None;
    }

    let strength = (0.4 + bounce * 10.0).min(1.0);
    let levels = Levels {
        entry: Some(r.price),
        stop: Some(recent_low - 0.5 * r.atr),
        target: Some(r.price + t.target_multiplier * r.atr),
    };

    Some(
        Draft::new(SignalType::Aggressive, Direction::Long, strength, levels)
            .note(format!("Bounce {:.1}% off the recent low", bounce * 100.0))
            .meta("recent_low", recent_low)
            .meta("bounce", bounce)
            .meta("momentum", momentum)
            .meta("rsi", rsi)
            .meta("atr", r.atr),
    )
}
