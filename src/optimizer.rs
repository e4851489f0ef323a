//! Adaptive Parameter Store
//!
//! Holds per-(regime, signal type) risk parameters seeded from the regime
//! profile table and re-tunes the ATR stop/target multipliers from the
//! outcomes fed back into it.
//!
//! Tuning rule per bucket, once it has at least `min_samples` outcomes:
//! ```text
//! win rate < 40%      -> stop multiplier   x 0.9
//! win rate > 60%      -> stop multiplier   x 1.1
//! avg return > 0.5%   -> target multiplier x 1.2
//! avg return < 0%     -> target multiplier x 0.8
//! ```
//! Results are clamped to the parameter's bounds.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{OptimizerConfig, RegimeTable};
use crate::indicators::mean;
use crate::signals::archetypes::{
    RSI_OVERBOUGHT, RSI_OVERSOLD, RSI_PERIOD, SIZE_FACTOR, SMA_PERIOD, STOP_MULTIPLIER,
    TARGET_MULTIPLIER,
};
use crate::{MarketRegime, Outcome, OutcomeState, SignalType};

/// Identifies one tunable knob
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParameterKey {
    pub regime: MarketRegime,
    pub signal_type: SignalType,
    pub indicator: String,
    pub name: String,
}

impl ParameterKey {
    /// Build a key from a dotted label such as `atr.stop_multiplier`
    pub fn new(regime: MarketRegime, signal_type: SignalType, label: &str) -> Self {
        let (indicator, name) = label.split_once('.').unwrap_or(("", label));
        Self {
            regime,
            signal_type,
            indicator: indicator.to_string(),
            name: name.to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.indicator, self.name)
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}.{}", self.regime, self.signal_type, self.indicator, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub default_value: f64,
    pub tuned_value: Option<f64>,
    pub bounds: Option<(f64, f64)>,
    pub optimization_score: f64,
    pub sample_size: usize,
    pub last_tuned: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Parameter {
    fn new(default_value: f64, bounds: Option<(f64, f64)>) -> Self {
        Self {
            default_value,
            tuned_value: None,
            bounds,
            optimization_score: 0.0,
            sample_size: 0,
            last_tuned: None,
            is_active: true,
        }
    }

    /// Tuned value if present, else the default
    pub fn effective(&self) -> f64 {
        self.tuned_value.unwrap_or(self.default_value)
    }

    fn clamp(&self, value: f64) -> f64 {
        match self.bounds {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        }
    }
}

/// One applied parameter change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningEvent {
    pub key: ParameterKey,
    pub old_value: f64,
    pub new_value: f64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub sample_size: usize,
    pub timestamp: DateTime<Utc>,
}

type Bucket = (MarketRegime, SignalType);

/// Per-(regime, signal type) parameter table with outcome-driven tuning
#[derive(Debug, Clone)]
pub struct ParameterStore {
    config: OptimizerConfig,
    parameters: BTreeMap<ParameterKey, Parameter>,
    outcomes: Vec<Outcome>,
    recorded: HashSet<(String, DateTime<Utc>)>,
    /// Sample size each bucket was last evaluated at
    evaluated_at: HashMap<Bucket, usize>,
    log: Vec<TuningEvent>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(OptimizerConfig::default(), &RegimeTable::default())
    }
}

impl ParameterStore {
    /// Seed parameters for every regime and each of its preferred signal types
    pub fn new(config: OptimizerConfig, regimes: &RegimeTable) -> Self {
        let mut parameters = BTreeMap::new();

        for regime in MarketRegime::ALL {
            let profile = regimes.profile(regime);
            let seeds = [
                (STOP_MULTIPLIER, profile.atr_stop_multiplier, Some(config.stop_bounds)),
                (TARGET_MULTIPLIER, profile.atr_target_multiplier, Some(config.target_bounds)),
                (SMA_PERIOD, profile.sma_period as f64, None),
                (RSI_PERIOD, profile.rsi_period as f64, None),
                (RSI_OVERBOUGHT, profile.rsi_overbought, None),
                (RSI_OVERSOLD, profile.rsi_oversold, None),
                (SIZE_FACTOR, profile.position_size_factor, None),
            ];

            for &signal_type in &profile.preferred_signals {
                for (label, value, bounds) in seeds {
                    // Untuned knobs are pinned to their default
                    let bounds = bounds.or(Some((value, value)));
                    parameters.insert(
                        ParameterKey::new(regime, signal_type, label),
                        Parameter::new(value, bounds),
                    );
                }
            }
        }

        debug!(parameters = parameters.len(), "Parameter store seeded");

        Self {
            config,
            parameters,
            outcomes: Vec::new(),
            recorded: HashSet::new(),
            evaluated_at: HashMap::new(),
            log: Vec::new(),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn get_effective(
        &self,
        regime: MarketRegime,
        signal_type: SignalType,
        indicator: &str,
        name: &str,
    ) -> Option<f64> {
        let key = ParameterKey {
            regime,
            signal_type,
            indicator: indicator.to_string(),
            name: name.to_string(),
        };
        self.parameters
            .get(&key)
            .filter(|p| p.is_active)
            .map(Parameter::effective)
    }

    /// Effective values for one bucket keyed by `indicator.name`
    pub fn snapshot(&self, regime: MarketRegime, signal_type: SignalType) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .filter(|(k, p)| k.regime == regime && k.signal_type == signal_type && p.is_active)
            .map(|(k, p)| (k.label(), p.effective()))
            .collect()
    }

    pub fn parameter(&self, key: &ParameterKey) -> Option<&Parameter> {
        self.parameters.get(key)
    }

    pub fn parameters(&self) -> &BTreeMap<ParameterKey, Parameter> {
        &self.parameters
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn tuning_log(&self) -> &[TuningEvent] {
        &self.log
    }

    /// Add a terminal outcome to the tuning history. Pending outcomes and
    /// repeats of an already recorded outcome are ignored.
    pub fn record_outcome(&mut self, outcome: &Outcome) -> bool {
        if !outcome.is_terminal() {
            debug!(signal_id = %outcome.signal_id, "Ignoring pending outcome");
            return false;
        }
        if !self
            .recorded
            .insert((outcome.signal_id.clone(), outcome.opened_at))
        {
            warn!(signal_id = %outcome.signal_id, "Outcome already recorded");
            return false;
        }
        self.outcomes.push(outcome.clone());
        true
    }

    pub fn optimize(
        &mut self,
        regime: Option<MarketRegime>,
        signal_type: Option<SignalType>,
    ) -> Vec<ParameterKey> {
        self.optimize_at(regime, signal_type, Utc::now())
    }

    /// Re-tune every matching bucket whose sample has grown since it was
    /// last evaluated. Returns the keys whose effective value changed.
    pub fn optimize_at(
        &mut self,
        regime: Option<MarketRegime>,
        signal_type: Option<SignalType>,
        now: DateTime<Utc>,
    ) -> Vec<ParameterKey> {
        let buckets: BTreeMap<Bucket, Vec<(bool, f64)>> = self
            .outcomes
            .iter()
            .filter(|o| regime.map_or(true, |r| o.regime == r))
            .filter(|o| signal_type.map_or(true, |t| o.signal_type == t))
            .filter_map(|o| {
                let ret = o.return_pct?;
                Some(((o.regime, o.signal_type), (o.state == OutcomeState::Win, ret)))
            })
            .into_group_map()
            .into_iter()
            .collect();

        let mut changed = Vec::new();

        for (bucket, samples) in buckets {
            let (bucket_regime, bucket_type) = bucket;
            let sample_size = samples.len();

            if sample_size < self.config.min_samples {
                debug!(
                    regime = %bucket_regime,
                    signal_type = %bucket_type,
                    sample_size,
                    "Bucket below minimum sample size"
                );
                continue;
            }
            if self.evaluated_at.get(&bucket) == Some(&sample_size) {
                continue;
            }
            self.evaluated_at.insert(bucket, sample_size);

            let wins = samples.iter().filter(|(win, _)| *win).count();
            let returns: Vec<f64> = samples.iter().map(|(_, ret)| *ret).collect();
            let win_rate = wins as f64 / sample_size as f64;
            let avg_return = mean(&returns);

            let stop_factor = if win_rate < self.config.low_win_rate {
                Some(self.config.stop_tighten_factor)
            } else if win_rate > self.config.high_win_rate {
                Some(self.config.stop_loosen_factor)
            } else {
                None
            };

            let target_factor = if avg_return > self.config.target_return_threshold {
                Some(self.config.target_extend_factor)
            } else if avg_return < 0.0 {
                Some(self.config.target_shrink_factor)
            } else {
                None
            };

            let stats = BucketStats {
                win_rate,
                avg_return,
                sample_size,
            };
            let adjustments = [
                (STOP_MULTIPLIER, stop_factor, win_rate),
                (TARGET_MULTIPLIER, target_factor, avg_return),
            ];

            for (label, factor, score) in adjustments {
                let key = ParameterKey::new(bucket_regime, bucket_type, label);
                if let Some(factor) = factor {
                    if self.adjust(&key, factor, score, &stats, now) {
                        changed.push(key);
                    }
                }
            }
        }

        if !changed.is_empty() {
            info!("Tuned {} parameters", changed.len());
        }
        changed
    }

    fn adjust(
        &mut self,
        key: &ParameterKey,
        factor: f64,
        score: f64,
        stats: &BucketStats,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(param) = self.parameters.get_mut(key) else {
            debug!(key = %key, "No parameter to tune");
            return false;
        };

        let old_value = param.effective();
        let new_value = param.clamp(old_value * factor);
        param.optimization_score = score;
        param.sample_size = stats.sample_size;
        param.last_tuned = Some(now);

        if new_value == old_value {
            return false;
        }
        param.tuned_value = Some(new_value);

        info!(
            key = %key,
            win_rate = stats.win_rate,
            avg_return = stats.avg_return,
            samples = stats.sample_size,
            "Parameter tuned {:.3} -> {:.3}",
            old_value,
            new_value
        );

        self.log.push(TuningEvent {
            key: key.clone(),
            old_value,
            new_value,
            win_rate: stats.win_rate,
            avg_return: stats.avg_return,
            sample_size: stats.sample_size,
            timestamp: now,
        });
        true
    }

    /// Clear tuned values back to defaults, for one regime or all. Returns
    /// how many parameters were reset.
    pub fn reset(&mut self, regime: Option<MarketRegime>) -> usize {
        let mut count = 0;
        for (key, param) in self.parameters.iter_mut() {
            if regime.is_some_and(|r| key.regime != r) {
                continue;
            }
            if param.tuned_value.take().is_some() {
                param.optimization_score = 0.0;
                param.sample_size = 0;
                param.last_tuned = None;
                count += 1;
            }
        }
        self.evaluated_at
            .retain(|(bucket_regime, _), _| regime.is_some_and(|r| *bucket_regime != r));

        info!(regime = ?regime, count, "Parameters reset");
        count
    }
}

struct BucketStats {
    win_rate: f64,
    avg_return: f64,
    sample_size: usize,
}
