//! Configuration management
//!
//! Every threshold and weight the engine uses is a named field with a
//! default, loadable from a JSON file in which any section may be omitted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::{MarketRegime, SignalType};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub generator: GeneratorConfig,
    pub optimizer: OptimizerConfig,
    pub tracker: TrackerConfig,
    pub replay: ReplayConfig,
    pub regimes: RegimeTable,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.classifier.validate()?;
        self.generator.validate()?;
        self.optimizer.validate()
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

// =============================================================================
// Classifier
// =============================================================================

/// Weights of the three sub-classifiers in the combined confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub volatility: f64,
    pub trend: f64,
    pub moving_average: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            volatility: 0.3,
            trend: 0.4,
            moving_average: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Window for realized volatility; compared against the window before it
    pub volatility_lookback: usize,
    /// Window for up/down move averages
    pub trend_lookback: usize,
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    /// Volatility ratio below this is low
    pub vol_low_ratio: f64,
    /// Volatility ratio below this (and above low) is medium
    pub vol_medium_ratio: f64,
    /// Volatility ratio below this (and above medium) is high, else extreme
    pub vol_high_ratio: f64,
    pub vol_confidence_cap: f64,
    /// Trend strength below this reads as sideways
    pub sideways_strength: f64,
    /// Trend strength at or above this reads as trending
    pub trending_strength: f64,
    pub ensemble_weights: EnsembleWeights,
    /// Confidence reported when the series is shorter than the lookback
    pub insufficient_confidence: f64,
    pub default_transition_probability: f64,
    /// History length below which the default transition probability is used
    pub min_transition_history: usize,
    /// Promote up-moves out of crisis/bear-volatile regimes to recovery
    pub detect_recovery: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            volatility_lookback: 20,
            trend_lookback: 50,
            ma_short_period: 20,
            ma_long_period: 50,
            vol_low_ratio: 0.7,
            vol_medium_ratio: 1.0,
            vol_high_ratio: 1.5,
            vol_confidence_cap: 0.9,
            sideways_strength: 0.2,
            trending_strength: 0.3,
            ensemble_weights: EnsembleWeights::default(),
            insufficient_confidence: 0.3,
            default_transition_probability: 0.2,
            min_transition_history: 10,
            detect_recovery: true,
        }
    }
}

impl ClassifierConfig {
    pub fn with_lookbacks(mut self, volatility: usize, trend: usize) -> Self {
        self.volatility_lookback = volatility;
        self.trend_lookback = trend;
        self
    }

    pub fn with_moving_averages(mut self, short: usize, long: usize) -> Self {
        self.ma_short_period = short;
        self.ma_long_period = long;
        self
    }

    pub fn with_ensemble_weights(mut self, weights: EnsembleWeights) -> Self {
        self.ensemble_weights = weights;
        self
    }

    pub fn with_recovery_detection(mut self, enabled: bool) -> Self {
        self.detect_recovery = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.volatility_lookback < 2 || self.trend_lookback < 2 {
            return Err(invalid("classifier lookbacks must be at least 2"));
        }
        if self.ma_short_period == 0 || self.ma_short_period >= self.ma_long_period {
            return Err(invalid("ma_short_period must be positive and below ma_long_period"));
        }
        if !(self.vol_low_ratio < self.vol_medium_ratio && self.vol_medium_ratio < self.vol_high_ratio) {
            return Err(invalid("volatility ratio buckets must be increasing"));
        }
        if self.sideways_strength > self.trending_strength {
            return Err(invalid("sideways_strength must not exceed trending_strength"));
        }
        let w = &self.ensemble_weights;
        if w.volatility < 0.0 || w.trend < 0.0 || w.moving_average < 0.0 {
            return Err(invalid("ensemble weights must be non-negative"));
        }
        if w.volatility + w.trend + w.moving_average <= 0.0 {
            return Err(invalid("ensemble weights must sum to a positive value"));
        }
        Ok(())
    }
}

// =============================================================================
// Signal generator
// =============================================================================

/// Expiry horizon per archetype, in hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalHorizons {
    pub momentum: i64,
    pub mean_reversion: i64,
    pub breakout: i64,
    pub trend_following: i64,
    pub counter_trend: i64,
    pub volatility_expansion: i64,
    pub volatility_contraction: i64,
    pub defensive: i64,
    pub aggressive: i64,
}

impl Default for SignalHorizons {
    fn default() -> Self {
        Self {
            momentum: 24,
            mean_reversion: 48,
            breakout: 12,
            trend_following: 120,
            counter_trend: 24,
            volatility_expansion: 12,
            volatility_contraction: 48,
            defensive: 24,
            aggressive: 72,
        }
    }
}

impl SignalHorizons {
    pub fn hours(&self, signal_type: SignalType) -> i64 {
        match signal_type {
            SignalType::Momentum => self.momentum,
            SignalType::MeanReversion => self.mean_reversion,
            SignalType::Breakout | SignalType::Breakdown => self.breakout,
            SignalType::TrendFollowing => self.trend_following,
            SignalType::CounterTrend => self.counter_trend,
            SignalType::VolatilityExpansion => self.volatility_expansion,
            SignalType::VolatilityContraction => self.volatility_contraction,
            SignalType::Defensive => self.defensive,
            SignalType::Aggressive => self.aggressive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Signals weaker than this are dropped
    pub min_strength: f64,
    pub atr_period: usize,
    /// Stop/target distance as a fraction of price when ATR is unavailable or flat
    pub fallback_atr_pct: f64,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    /// Mean-reversion stops use this fraction of the regime stop multiplier
    pub mean_reversion_stop_factor: f64,
    pub breakout_lookback: usize,
    /// Stop distance inside the broken level, in ATRs
    pub breakout_stop_buffer_atr: f64,
    /// Strength added on a fresh golden/death cross
    pub crossover_boost: f64,
    pub defensive_lookback: usize,
    /// Annualized volatility that triggers a defensive advisory
    pub defensive_volatility: f64,
    /// Drawdown from the recent high that triggers a defensive advisory
    pub defensive_drawdown: f64,
    pub aggressive_lookback: usize,
    pub aggressive_min_bounce: f64,
    pub aggressive_momentum_period: usize,
    pub aggressive_rsi_low: f64,
    pub aggressive_rsi_high: f64,
    pub volatility_short_window: usize,
    pub volatility_prior_window: usize,
    pub expansion_multiple: f64,
    pub contraction_ratio: f64,
    pub contraction_target_factor: f64,
    pub counter_trend_oversold: f64,
    pub counter_trend_overbought: f64,
    pub counter_trend_confidence: f64,
    pub horizons: SignalHorizons,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_strength: 0.3,
            atr_period: 14,
            fallback_atr_pct: 0.02,
            bollinger_period: 20,
            bollinger_std: 2.0,
            mean_reversion_stop_factor: 0.75,
            breakout_lookback: 20,
            breakout_stop_buffer_atr: 0.5,
            crossover_boost: 0.2,
            defensive_lookback: 20,
            defensive_volatility: 0.6,
            defensive_drawdown: 0.10,
            aggressive_lookback: 10,
            aggressive_min_bounce: 0.02,
            aggressive_momentum_period: 5,
            aggressive_rsi_low: 40.0,
            aggressive_rsi_high: 65.0,
            volatility_short_window: 5,
            volatility_prior_window: 10,
            expansion_multiple: 1.5,
            contraction_ratio: 0.6,
            contraction_target_factor: 1.25,
            counter_trend_oversold: 25.0,
            counter_trend_overbought: 75.0,
            counter_trend_confidence: 0.8,
            horizons: SignalHorizons::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_min_strength(mut self, min_strength: f64) -> Self {
        self.min_strength = min_strength;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.min_strength) {
            return Err(invalid("min_strength must be within [0, 1]"));
        }
        if self.atr_period == 0 || self.bollinger_period < 2 || self.breakout_lookback == 0 {
            return Err(invalid("indicator periods must be positive"));
        }
        if self.volatility_short_window < 2 || self.volatility_prior_window < 2 {
            return Err(invalid("volatility windows must be at least 2"));
        }
        if self.counter_trend_oversold >= self.counter_trend_overbought {
            return Err(invalid("counter-trend oversold level must be below overbought"));
        }
        Ok(())
    }
}

// =============================================================================
// Optimizer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Outcomes a (regime, signal type) bucket needs before it is tuned
    pub min_samples: usize,
    pub low_win_rate: f64,
    pub high_win_rate: f64,
    /// Stop multiplier factor applied below `low_win_rate`
    pub stop_tighten_factor: f64,
    /// Stop multiplier factor applied above `high_win_rate`
    pub stop_loosen_factor: f64,
    /// Average return (percent) above which targets are extended
    pub target_return_threshold: f64,
    pub target_extend_factor: f64,
    pub target_shrink_factor: f64,
    pub stop_bounds: (f64, f64),
    pub target_bounds: (f64, f64),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            low_win_rate: 0.40,
            high_win_rate: 0.60,
            stop_tighten_factor: 0.9,
            stop_loosen_factor: 1.1,
            target_return_threshold: 0.5,
            target_extend_factor: 1.2,
            target_shrink_factor: 0.8,
            stop_bounds: (0.5, 5.0),
            target_bounds: (1.0, 10.0),
        }
    }
}

impl OptimizerConfig {
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_win_rate_band(mut self, low: f64, high: f64) -> Self {
        self.low_win_rate = low;
        self.high_win_rate = high;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_samples == 0 {
            return Err(invalid("optimizer min_samples must be at least 1"));
        }
        if self.low_win_rate > self.high_win_rate {
            return Err(invalid("low_win_rate must not exceed high_win_rate"));
        }
        if self.stop_bounds.0 > self.stop_bounds.1 || self.target_bounds.0 > self.target_bounds.1 {
            return Err(invalid("parameter bounds must be ordered (min, max)"));
        }
        Ok(())
    }
}

// =============================================================================
// Tracker / replay
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Returns within +/- this many percent are breakeven
    pub breakeven_band_pct: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            breakeven_band_pct: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Bars skipped before the first analysis
    pub warmup_bars: usize,
    /// Most recent bars handed to each analysis
    pub window_bars: usize,
    /// Run the optimizer every this many bars (0 disables)
    pub optimize_every: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            warmup_bars: 60,
            window_bars: 200,
            optimize_every: 50,
        }
    }
}

// =============================================================================
// Regime profiles
// =============================================================================

/// Static per-regime parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeProfile {
    pub preferred_signals: Vec<SignalType>,
    pub sma_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub atr_stop_multiplier: f64,
    pub atr_target_multiplier: f64,
    pub position_size_factor: f64,
}

impl RegimeProfile {
    pub fn default_for(regime: MarketRegime) -> Self {
        use SignalType::*;

        let (preferred_signals, sma, rsi, ob, os, stop, target, size) = match regime {
            MarketRegime::BullTrending => (
                vec![TrendFollowing, Momentum, Breakout],
                20, 14, 75.0, 35.0, 2.0, 4.0, 1.0,
            ),
            MarketRegime::BullVolatile => (
                vec![Momentum, MeanReversion, VolatilityExpansion],
                10, 14, 80.0, 30.0, 2.5, 3.5, 0.7,
            ),
            MarketRegime::BearTrending => (
                vec![TrendFollowing, Breakdown, Defensive],
                20, 14, 65.0, 25.0, 2.0, 4.0, 0.8,
            ),
            MarketRegime::BearVolatile => (
                vec![Defensive, CounterTrend, MeanReversion],
                10, 14, 70.0, 20.0, 2.5, 3.0, 0.5,
            ),
            MarketRegime::SidewaysLowVol => (
                vec![MeanReversion, VolatilityContraction, Breakout],
                20, 14, 70.0, 30.0, 1.5, 2.5, 0.8,
            ),
            MarketRegime::SidewaysHighVol => (
                vec![MeanReversion, CounterTrend, VolatilityExpansion],
                20, 14, 75.0, 25.0, 2.0, 3.0, 0.6,
            ),
            MarketRegime::Crisis => (
                vec![Defensive, CounterTrend],
                10, 7, 80.0, 15.0, 3.0, 2.0, 0.3,
            ),
            MarketRegime::Recovery => (
                vec![Aggressive, Momentum, TrendFollowing],
                20, 14, 70.0, 30.0, 2.0, 4.5, 0.9,
            ),
        };

        RegimeProfile {
            preferred_signals,
            sma_period: sma,
            rsi_period: rsi,
            rsi_overbought: ob,
            rsi_oversold: os,
            atr_stop_multiplier: stop,
            atr_target_multiplier: target,
            position_size_factor: size,
        }
    }
}

/// Profiles keyed by regime; regimes missing from a config file use defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegimeTable(BTreeMap<MarketRegime, RegimeProfile>);

impl RegimeTable {
    pub fn profile(&self, regime: MarketRegime) -> RegimeProfile {
        self.0
            .get(&regime)
            .cloned()
            .unwrap_or_else(|| RegimeProfile::default_for(regime))
    }

    pub fn with_profile(mut self, regime: MarketRegime, profile: RegimeProfile) -> Self {
        self.0.insert(regime, profile);
        self
    }

    pub fn preferred_signals(&self, regime: MarketRegime) -> Vec<SignalType> {
        self.profile(regime).preferred_signals
    }
}
