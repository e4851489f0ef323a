//! Market Regime Classification
//!
//! Turns a price series into a [`RegimeState`] using one of three
//! sub-classifiers or their weighted ensemble, and keeps an append-only
//! per-symbol history from which regime duration and transition
//! probability are derived.

pub mod detectors;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::ClassifierConfig;
use crate::data::PriceSeries;
use crate::indicators::mean;
use crate::{DetectionMethod, MarketRegime, Metadata, RegimeState, Symbol, TrendDirection};

pub use detectors::{MovingAverageReading, TrendReading, VolatilityReading};

/// Aggregate view over one symbol's regime history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeStatistics {
    pub symbol: Symbol,
    pub observations: usize,
    pub current_regime: Option<MarketRegime>,
    /// Fraction of observations spent in each regime seen
    pub regime_shares: BTreeMap<MarketRegime, f64>,
    pub average_confidence: f64,
    /// Mean length of consecutive runs of the same regime
    pub average_run_length: f64,
    pub transitions: usize,
}

/// Outcome of the detection step, before history-derived fields are added
struct Detection {
    regime: MarketRegime,
    confidence: f64,
    trend: Option<TrendReading>,
    volatility: Option<VolatilityReading>,
    metadata: Metadata,
}

/// Regime classifier with per-symbol history
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: ClassifierConfig,
    history: BTreeMap<Symbol, Vec<RegimeState>>,
}

impl RegimeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            history: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Minimum number of closes the method needs for a full reading
    pub fn required_observations(&self, method: DetectionMethod) -> usize {
        let volatility = 2 * self.config.volatility_lookback + 1;
        let trend = self.config.trend_lookback + 1;
        let moving_average = self.config.ma_long_period;
        match method {
            DetectionMethod::VolatilityCluster => volatility,
            DetectionMethod::TrendStrength => trend,
            DetectionMethod::MovingAverage => moving_average,
            DetectionMethod::Combined => volatility.max(trend).max(moving_average),
        }
    }

    /// Classify the series and append the result to the symbol's history
    pub fn classify(
        &mut self,
        symbol: &Symbol,
        series: &PriceSeries,
        method: DetectionMethod,
    ) -> RegimeState {
        self.classify_at(symbol, series, method, Utc::now())
    }

    pub fn classify_at(
        &mut self,
        symbol: &Symbol,
        series: &PriceSeries,
        method: DetectionMethod,
        now: DateTime<Utc>,
    ) -> RegimeState {
        let closes = series.closes();
        let required = self.required_observations(method);

        let detection = if closes.len() < required {
            debug!(
                symbol = %symbol,
                observations = closes.len(),
                required,
                "Insufficient data for regime detection"
            );
            None
        } else {
            self.detect(symbol, closes, method)
        };
        let mut detection =
            detection.unwrap_or_else(|| self.insufficient(closes.len(), required));

        if let Some(ratio) = series.volumes().and_then(|v| self.volume_ratio(v)) {
            detection.metadata.insert("volume_ratio".into(), ratio.into());
        }

        let history = self.history.entry(symbol.clone()).or_default();
        let previous = history.last().map(|s| s.regime);
        let duration = 1 + history
            .iter()
            .rev()
            .take_while(|s| s.regime == detection.regime)
            .count();
        let transition_probability = transition_probability(
            history,
            detection.regime,
            self.config.min_transition_history,
            self.config.default_transition_probability,
        );

        let state = RegimeState {
            symbol: symbol.clone(),
            regime: detection.regime,
            method,
            confidence: detection.confidence.clamp(0.0, 1.0),
            trend_direction: detection.trend.map(|t| t.direction),
            trend_strength: detection.trend.map(|t| t.strength),
            volatility_level: detection.volatility.map(|v| v.level),
            duration,
            transition_probability: Some(transition_probability),
            timestamp: now,
            metadata: detection.metadata,
        };

        if let Some(from) = previous.filter(|p| *p != state.regime) {
            info!(
                symbol = %symbol,
                "Regime change: {} -> {} (confidence {:.2})",
                from,
                state.regime,
                state.confidence
            );
        }

        history.push(state.clone());
        state
    }

    fn insufficient(&self, observations: usize, required: usize) -> Detection {
        let mut metadata = Metadata::new();
        metadata.insert("observations".into(), observations.into());
        metadata.insert("required_observations".into(), required.into());
        metadata.insert("insufficient_data".into(), true.into());
        Detection {
            regime: MarketRegime::SidewaysLowVol,
            confidence: self.config.insufficient_confidence,
            trend: None,
            volatility: None,
            metadata,
        }
    }

    fn detect(&self, symbol: &Symbol, closes: &[f64], method: DetectionMethod) -> Option<Detection> {
        let config = &self.config;
        let mut metadata = Metadata::new();
        metadata.insert("observations".into(), closes.len().into());

        let detection = match method {
            DetectionMethod::VolatilityCluster => {
                let vol = detectors::volatility_cluster(closes, config)?;
                record_volatility(&mut metadata, &vol);
                Detection {
                    regime: detectors::volatility_regime(&vol),
                    confidence: vol.confidence,
                    trend: None,
                    volatility: Some(vol),
                    metadata,
                }
            }
            DetectionMethod::TrendStrength => {
                let trend = detectors::trend_strength(closes, config)?;
                record_trend(&mut metadata, &trend);
                Detection {
                    regime: detectors::trend_regime(&trend, config),
                    confidence: trend.confidence,
                    trend: Some(trend),
                    volatility: None,
                    metadata,
                }
            }
            DetectionMethod::MovingAverage => {
                let ma = detectors::moving_average(closes, config)?;
                record_moving_average(&mut metadata, &ma);
                Detection {
                    regime: ma.regime,
                    confidence: ma.confidence,
                    trend: None,
                    volatility: None,
                    metadata,
                }
            }
            DetectionMethod::Combined => {
                let vol = detectors::volatility_cluster(closes, config)?;
                let trend = detectors::trend_strength(closes, config)?;
                let ma = detectors::moving_average(closes, config)?;
                record_volatility(&mut metadata, &vol);
                record_trend(&mut metadata, &trend);
                record_moving_average(&mut metadata, &ma);

                let trending = trend.strength >= config.trending_strength;
                let mut regime = detectors::decide(trend.direction, trending, vol.level);

                if vol.level == crate::VolatilityLevel::Extreme
                    && trend.direction == TrendDirection::Down
                {
                    regime = MarketRegime::Crisis;
                }

                if config.detect_recovery && trend.direction == TrendDirection::Up {
                    let previous = self
                        .history
                        .get(symbol)
                        .and_then(|h| h.last())
                        .map(|s| s.regime);
                    if let Some(from) = previous.filter(|p| {
                        matches!(
                            p,
                            MarketRegime::Crisis | MarketRegime::BearVolatile | MarketRegime::Recovery
                        )
                    }) {
                        if regime != MarketRegime::Crisis {
                            metadata.insert("recovery_from".into(), from.name().into());
                            regime = MarketRegime::Recovery;
                        }
                    }
                }

                let w = &config.ensemble_weights;
                let total = w.volatility + w.trend + w.moving_average;
                let confidence = (w.volatility * vol.confidence
                    + w.trend * trend.confidence
                    + w.moving_average * ma.confidence)
                    / total;

                debug!(
                    symbol = %symbol,
                    regime = %regime,
                    "Ensemble: volatility {:?} (ratio {:.3}), trend {:?} (strength {:.3}), MA {}",
                    vol.level,
                    vol.ratio,
                    trend.direction,
                    trend.strength,
                    ma.regime
                );

                Detection {
                    regime,
                    confidence,
                    trend: Some(trend),
                    volatility: Some(vol),
                    metadata,
                }
            }
        };

        Some(detection)
    }

    /// Mean volume of the recent window relative to the window before it
    fn volume_ratio(&self, volumes: &[f64]) -> Option<f64> {
        let lookback = self.config.volatility_lookback;
        if volumes.len() < 2 * lookback {
            return None;
        }
        let tail = &volumes[volumes.len() - 2 * lookback..];
        let (prior, recent) = tail.split_at(lookback);
        let prior_mean = mean(prior);
        (prior_mean > 0.0).then(|| mean(recent) / prior_mean)
    }

    // =========================================================================
    // History accessors
    // =========================================================================

    /// All classifications for the symbol, oldest first
    pub fn history(&self, symbol: &Symbol) -> &[RegimeState] {
        self.history.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn current(&self, symbol: &Symbol) -> Option<&RegimeState> {
        self.history.get(symbol).and_then(|h| h.last())
    }

    pub fn symbols(&self) -> Vec<&Symbol> {
        self.history.keys().collect()
    }

    pub fn statistics(&self, symbol: &Symbol) -> Option<RegimeStatistics> {
        let history = self.history.get(symbol).filter(|h| !h.is_empty())?;
        let observations = history.len();

        let regime_shares = history
            .iter()
            .map(|s| s.regime)
            .counts()
            .into_iter()
            .map(|(regime, count)| (regime, count as f64 / observations as f64))
            .collect();

        let runs = history.iter().dedup_by(|a, b| a.regime == b.regime).count();
        let confidences: Vec<f64> = history.iter().map(|s| s.confidence).collect();

        Some(RegimeStatistics {
            symbol: symbol.clone(),
            observations,
            current_regime: history.last().map(|s| s.regime),
            regime_shares,
            average_confidence: mean(&confidences),
            average_run_length: observations as f64 / runs as f64,
            transitions: runs - 1,
        })
    }
}

/// Empirical probability that the regime changes on the next observation,
/// given the symbol was in `regime`.
fn transition_probability(
    history: &[RegimeState],
    regime: MarketRegime,
    min_history: usize,
    default: f64,
) -> f64 {
    if history.len() < min_history {
        return default;
    }

    let (left, total) = history
        .windows(2)
        .filter(|w| w[0].regime == regime)
        .fold((0usize, 0usize), |(left, total), w| {
            (left + usize::from(w[1].regime != regime), total + 1)
        });

    if total == 0 {
        default
    } else {
        left as f64 / total as f64
    }
}

fn record_volatility(metadata: &mut Metadata, vol: &VolatilityReading) {
    metadata.insert("volatility_ratio".into(), vol.ratio.into());
    metadata.insert("annualized_volatility".into(), vol.annualized.into());
    metadata.insert("prior_annualized_volatility".into(), vol.prior_annualized.into());
    metadata.insert("price_change".into(), vol.price_change.into());
    metadata.insert("volatility_confidence".into(), vol.confidence.into());
}

fn record_trend(metadata: &mut Metadata, trend: &TrendReading) {
    metadata.insert("trend_strength".into(), trend.strength.into());
    metadata.insert("avg_up_move".into(), trend.avg_up.into());
    metadata.insert("avg_down_move".into(), trend.avg_down.into());
    metadata.insert("trend_confidence".into(), trend.confidence.into());
}

fn record_moving_average(metadata: &mut Metadata, ma: &MovingAverageReading) {
    metadata.insert("short_ma".into(), ma.short_ma.into());
    metadata.insert("long_ma".into(), ma.long_ma.into());
    metadata.insert("ma_spread".into(), ma.spread.into());
    metadata.insert("ma_confidence".into(), ma.confidence.into());
}
