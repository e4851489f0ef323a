//! Regime-Conditioned Signal Generation
//!
//! Classifies the regime, then runs the builder of every signal type the
//! regime prefers with that bucket's effective parameters. Signals below
//! the minimum strength are dropped and the rest sorted strongest first.

pub mod archetypes;

use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{GeneratorConfig, RegimeTable};
use crate::data::PriceSeries;
use crate::optimizer::ParameterStore;
use crate::regime::RegimeClassifier;
use crate::{risk_reward_ratio, DetectionMethod, RegimeState, Signal, Symbol};

use archetypes::{Draft, Readings, Tunables};

/// Everything one generation pass produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub signals: Vec<Signal>,
    pub regime_state: RegimeState,
    pub generation_time: DateTime<Utc>,
    pub indicators_used: Vec<String>,
    pub warnings: Vec<String>,
}

impl GenerationResult {
    /// Strongest signal that opens a position
    pub fn strongest_entry(&self) -> Option<&Signal> {
        self.signals.iter().find(|s| s.direction.is_entry())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: GeneratorConfig,
    regimes: RegimeTable,
    method: DetectionMethod,
}

impl SignalGenerator {
    pub fn new(config: GeneratorConfig, regimes: RegimeTable) -> Self {
        Self {
            config,
            regimes,
            method: DetectionMethod::Combined,
        }
    }

    /// Classify with a method other than the ensemble
    pub fn with_method(mut self, method: DetectionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn regimes(&self) -> &RegimeTable {
        &self.regimes
    }

    pub fn generate(
        &self,
        classifier: &mut RegimeClassifier,
        params: &ParameterStore,
        symbol: &Symbol,
        series: &PriceSeries,
    ) -> GenerationResult {
        self.generate_at(classifier, params, symbol, series, Utc::now())
    }

    pub fn generate_at(
        &self,
        classifier: &mut RegimeClassifier,
        params: &ParameterStore,
        symbol: &Symbol,
        series: &PriceSeries,
        now: DateTime<Utc>,
    ) -> GenerationResult {
        let state = classifier.classify_at(symbol, series, self.method, now);
        self.generate_for_state(symbol, series, state, params, now)
    }

    /// Build signals for an already classified regime
    pub fn generate_for_state(
        &self,
        symbol: &Symbol,
        series: &PriceSeries,
        state: RegimeState,
        params: &ParameterStore,
        now: DateTime<Utc>,
    ) -> GenerationResult {
        let profile = self.regimes.profile(state.regime);
        let readings = Readings::new(series, &self.config);

        let mut warnings = Vec::new();
        if !series.has_ranges() {
            warnings.push("highs/lows unavailable, using closes for ATR and price channels".into());
        }
        if readings.atr_is_fallback {
            warnings.push(format!(
                "ATR unavailable, using {:.1}% of price for stops and targets",
                self.config.fallback_atr_pct * 100.0
            ));
        }

        let mut indicators_used = BTreeSet::new();
        let mut signals = Vec::new();

        for &signal_type in &profile.preferred_signals {
            let tunables = Tunables::resolve(&profile, &params.snapshot(state.regime, signal_type));
            let required = archetypes::required_bars(signal_type, &tunables, &self.config);
            if series.len() < required {
                warnings.push(format!(
                    "{} skipped: needs {} bars, have {}",
                    signal_type,
                    required,
                    series.len()
                ));
                continue;
            }

            let indicators = archetypes::indicators_for(signal_type);
            indicators_used.extend(indicators.iter().map(|s| s.to_string()));

            match archetypes::build(signal_type, &readings, &tunables, &self.config) {
                Some(draft) if draft.strength >= self.config.min_strength => {
                    signals.push(self.finish(symbol, &state, draft, &tunables, indicators, now));
                }
                Some(draft) => {
                    debug!(
                        symbol = %symbol,
                        signal_type = %signal_type,
                        "Dropped weak signal (strength {:.2})",
                        draft.strength
                    );
                }
                None => {
                    debug!(symbol = %symbol, signal_type = %signal_type, "No setup");
                }
            }
        }

        signals.sort_by_key(|s| Reverse(OrderedFloat(s.strength)));

        if !signals.is_empty() {
            info!(
                symbol = %symbol,
                regime = %state.regime,
                "Generated {} signals",
                signals.len()
            );
        }

        GenerationResult {
            signals,
            regime_state: state,
            generation_time: now,
            indicators_used: indicators_used.into_iter().collect(),
            warnings,
        }
    }

    fn finish(
        &self,
        symbol: &Symbol,
        state: &RegimeState,
        draft: Draft,
        tunables: &Tunables,
        indicators: &[&str],
        now: DateTime<Utc>,
    ) -> Signal {
        let levels = draft.levels;
        let confidence =
            (0.5 * (state.confidence + draft.strength) * draft.confidence_factor).clamp(0.0, 1.0);
        let horizon = Duration::hours(self.config.horizons.hours(draft.signal_type));

        Signal {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.clone(),
            signal_type: draft.signal_type,
            direction: draft.direction,
            regime: state.regime,
            strength: draft.strength,
            confidence,
            regime_confidence: state.confidence,
            entry_price: levels.entry,
            stop_loss: levels.stop,
            take_profit: levels.target,
            risk_reward_ratio: risk_reward_ratio(levels.entry, levels.stop, levels.target),
            indicators: indicators.iter().map(|s| s.to_string()).collect(),
            parameters: tunables.snapshot(),
            notes: draft.notes,
            is_active: true,
            expires_at: now + horizon,
            created_at: now,
            metadata: draft.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, MarketRegime, SignalType};

    fn trending_candles(n: usize) -> PriceSeries {
        // Steady climb with a shallow zig-zag
        let close: Vec<f64> = (0..n)
            .map(|i| 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 0.6 } else { 0.0 })
            .collect();
        let high = close.iter().map(|c| c + 0.5).collect();
        let low = close.iter().map(|c| c - 0.5).collect();
        PriceSeries::new(close).unwrap().with_high_low(high, low).unwrap()
    }

    #[test]
    fn test_generation_sorted_and_filtered() {
        let generator = SignalGenerator::default();
        let mut classifier = RegimeClassifier::default();
        let params = ParameterStore::default();
        let symbol = Symbol::from("BTC");

        let result = generator.generate(&mut classifier, &params, &symbol, &trending_candles(120));

        assert_eq!(result.regime_state.regime, MarketRegime::BullTrending);
        assert!(!result.signals.is_empty());
        assert!(result
            .signals
            .iter()
            .any(|s| s.signal_type == SignalType::TrendFollowing));
        for pair in result.signals.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
        for signal in &result.signals {
            assert!(signal.strength >= generator.config().min_strength);
            assert!((0.0..=1.0).contains(&signal.confidence));
            assert_eq!(signal.regime, result.regime_state.regime);
            assert!(signal.expires_at > signal.created_at);
            assert!(signal.parameters.contains_key("atr.stop_multiplier"));
        }
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_signal_levels_are_consistent() {
        let generator = SignalGenerator::default();
        let mut classifier = RegimeClassifier::default();
        let params = ParameterStore::default();

        let result = generator.generate(
            &mut classifier,
            &params,
            &Symbol::from("ETH"),
            &trending_candles(150),
        );

        assert!(!result.signals.is_empty());
        for signal in &result.signals {
            let (Some(entry), Some(stop), Some(target)) =
                (signal.entry_price, signal.stop_loss, signal.take_profit)
            else {
                continue;
            };
            match signal.direction {
                Direction::Long => assert!(stop < entry && entry < target, "{signal:?}"),
                Direction::Short => assert!(target < entry && entry < stop, "{signal:?}"),
                _ => {}
            }
            let expected = (target - entry).abs() / (entry - stop).abs();
            assert_eq!(signal.risk_reward_ratio, Some(expected));
        }
    }

    #[test]
    fn test_short_series_warns() {
        let generator = SignalGenerator::default();
        let mut classifier = RegimeClassifier::default();
        let params = ParameterStore::default();
        let series = PriceSeries::new(vec![100.0, 101.0, 100.5]).unwrap();

        let result = generator.generate(&mut classifier, &params, &Symbol::from("X"), &series);
        assert!(result.signals.is_empty());
        assert_eq!(result.regime_state.regime, MarketRegime::SidewaysLowVol);
        assert!(result.warnings.iter().any(|w| w.contains("skipped")));
        assert!(result.warnings.iter().any(|w| w.contains("highs/lows")));
    }

    #[test]
    fn test_tuned_parameters_flow_into_signals() {
        let generator = SignalGenerator::default();
        let mut classifier = RegimeClassifier::default();
        let params = ParameterStore::default();
        let series = trending_candles(120);
        let symbol = Symbol::from("SOL");

        let state = classifier.classify(&symbol, &series, DetectionMethod::Combined);
        let result = generator.generate_for_state(&symbol, &series, state, &params, Utc::now());
        let preferred = generator.regimes().preferred_signals(result.regime_state.regime);
        for signal in &result.signals {
            assert!(preferred.contains(&signal.signal_type));
            let expected = params.snapshot(signal.regime, signal.signal_type);
            assert_eq!(signal.parameters, expected);
        }
    }

    #[test]
    fn test_expiry_horizon() {
        let generator = SignalGenerator::default();
        let mut classifier = RegimeClassifier::default();
        let params = ParameterStore::default();
        let now = Utc::now();

        let result = generator.generate_at(
            &mut classifier,
            &params,
            &Symbol::from("BTC"),
            &trending_candles(120),
            now,
        );
        for signal in &result.signals {
            let hours = (signal.expires_at - now).num_hours();
            assert_eq!(hours, generator.config().horizons.hours(signal.signal_type));
            if signal.signal_type == SignalType::TrendFollowing {
                assert_eq!(hours, 120);
            }
        }
    }
}
