//! Integration tests for the regime-signals engine
//!
//! These tests drive the classifier, generator, tracker and parameter store
//! together on synthetic series.

use approx::assert_abs_diff_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use regime_signals::{
    risk_reward_ratio, Candle, Direction, DetectionMethod, MarketRegime, OutcomeState,
    OutcomeTracker, ParameterStore, PriceSeries, RegimeClassifier, Session, Signal,
    SignalGenerator, SignalType, Symbol, TrendDirection,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Linear climb from `from` to `to`
fn linear(from: f64, to: f64, n: usize) -> Vec<f64> {
    let step = (to - from) / (n - 1) as f64;
    (0..n).map(|i| from + step * i as f64).collect()
}

/// Flat sine wave around 100
fn sinusoid(n: usize, amplitude: f64, period: f64) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + amplitude * (2.0 * std::f64::consts::PI * i as f64 / period).sin())
        .collect()
}

/// Deterministic random-walk-like series with drift
fn walk(n: usize, drift: f64) -> Vec<f64> {
    let mut price = 100.0;
    (0..n)
        .map(|i| {
            let shock = match i % 7 {
                0 => 1.2,
                1 => -0.8,
                2 => 0.4,
                3 => -1.1,
                4 => 0.9,
                5 => -0.3,
                _ => 0.1,
            };
            price *= 1.0 + (shock + drift) / 100.0;
            price
        })
        .collect()
}

fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle {
            datetime: start() + Duration::hours(i as i64),
            open: c,
            high: c * 1.004,
            low: c * 0.996,
            close: c,
            volume: 1_000.0 + (i % 5) as f64 * 50.0,
        })
        .collect()
}

fn signal(
    id: &str,
    direction: Direction,
    regime: MarketRegime,
    signal_type: SignalType,
    entry: f64,
) -> Signal {
    Signal {
        id: id.to_string(),
        symbol: Symbol::from("BTC"),
        signal_type,
        direction,
        regime,
        strength: 0.6,
        confidence: 0.6,
        regime_confidence: 0.6,
        entry_price: Some(entry),
        stop_loss: None,
        take_profit: None,
        risk_reward_ratio: None,
        indicators: vec![],
        parameters: Default::default(),
        notes: String::new(),
        is_active: true,
        expires_at: start() + Duration::days(2),
        created_at: start(),
        metadata: Default::default(),
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_monotonic_rise_is_bullish_uptrend() {
    let mut classifier = RegimeClassifier::default();
    let series = PriceSeries::new(linear(100.0, 150.0, 100)).unwrap();

    let state = classifier.classify(&Symbol::from("BTC"), &series, DetectionMethod::TrendStrength);

    assert!(matches!(
        state.regime,
        MarketRegime::BullTrending | MarketRegime::BullVolatile
    ));
    assert_eq!(state.trend_direction, Some(TrendDirection::Up));
    assert!(state.confidence >= 0.5);
}

#[test]
fn test_sinusoid_is_sideways() {
    let closes = sinusoid(200, 5.0, 20.0);

    for end in (60..=200).step_by(10) {
        let mut classifier = RegimeClassifier::default();
        let series = PriceSeries::new(closes[..end].to_vec()).unwrap();
        let state = classifier.classify(&Symbol::from("ETH"), &series, DetectionMethod::Combined);
        assert!(
            state.regime.is_sideways(),
            "bar {}: classified as {}",
            end,
            state.regime
        );
    }
}

#[test]
fn test_risk_reward_example() {
    assert_eq!(risk_reward_ratio(Some(150.0), Some(145.0), Some(160.0)), Some(2.0));
    assert_eq!(risk_reward_ratio(Some(150.0), Some(150.0), Some(160.0)), None);
    assert_eq!(risk_reward_ratio(Some(150.0), None, Some(160.0)), None);
}

#[test]
fn test_open_close_at_entry_is_breakeven() {
    let mut tracker = OutcomeTracker::default();
    let s = signal("a", Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);

    tracker.open(&s, None).unwrap();
    let outcome = tracker.close("a", 100.0, false, false).unwrap();

    assert_eq!(outcome.return_pct, Some(0.0));
    assert_eq!(outcome.state, OutcomeState::Breakeven);
}

#[test]
fn test_terminal_outcome_is_frozen() {
    let mut tracker = OutcomeTracker::default();
    let s = signal("a", Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);

    tracker.open(&s, None).unwrap();
    let closed = tracker.close("a", 104.0, false, true).unwrap();

    assert!(tracker.close("a", 90.0, true, false).is_err());
    assert!(tracker.expire("a").is_err());
    assert!(tracker.update("a", 50.0, None, None).is_none());
    assert_eq!(tracker.get("a"), Some(&closed));
    assert_eq!(tracker.completed().len(), 1);
}

#[test]
fn test_long_and_short_excursions() {
    let mut tracker = OutcomeTracker::default();
    let long = signal("long", Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);
    let short = signal("short", Direction::Short, MarketRegime::BearTrending, SignalType::Breakdown, 100.0);
    tracker.open(&long, None).unwrap();
    tracker.open(&short, None).unwrap();

    let l = tracker.update("long", 101.0, Some(106.0), Some(98.0)).unwrap().clone();
    let s = tracker.update("short", 101.0, Some(106.0), Some(98.0)).unwrap().clone();

    assert_abs_diff_eq!(l.max_favorable.unwrap(), 6.0);
    assert_abs_diff_eq!(l.max_adverse.unwrap(), 2.0);
    assert_abs_diff_eq!(s.max_favorable.unwrap(), 2.0);
    assert_abs_diff_eq!(s.max_adverse.unwrap(), 6.0);
}

#[test]
fn test_optimize_below_min_samples_is_empty() {
    let mut session = Session::default();
    for i in 0..9 {
        let id = format!("s{}", i);
        let s = signal(&id, Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);
        session.open_signal(&s, None).unwrap();
        session.close_signal(&id, 97.0, true, false).unwrap();
    }

    assert_eq!(session.store().outcome_count(), 9);
    assert!(session.optimize().is_empty());
}

// =============================================================================
// Feedback loop
// =============================================================================

#[test]
fn test_losses_tighten_next_signals() {
    let mut session = Session::default();
    for i in 0..10 {
        let id = format!("loss{}", i);
        let s = signal(&id, Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);
        session.open_signal(&s, None).unwrap();
        session.update_signal(&id, 99.0, Some(100.5), Some(97.0));
        session.close_signal(&id, 97.0, true, false).unwrap();
    }

    let changed = session.optimize();
    assert_eq!(changed.len(), 2);

    let snapshot = session
        .store()
        .snapshot(MarketRegime::BullTrending, SignalType::Momentum);
    assert_abs_diff_eq!(snapshot["atr.stop_multiplier"], 1.8, epsilon = 1e-12);
    assert_abs_diff_eq!(snapshot["atr.target_multiplier"], 3.2, epsilon = 1e-12);

    // Other buckets keep their defaults
    let untouched = session
        .store()
        .snapshot(MarketRegime::BullTrending, SignalType::Breakout);
    assert_eq!(untouched["atr.stop_multiplier"], 2.0);

    let summary = session.report().overall;
    assert_eq!(summary.losses, 10);
    assert_eq!(summary.win_rate, 0.0);
    assert_abs_diff_eq!(summary.avg_max_adverse, 3.0, epsilon = 1e-12);
}

#[test]
fn test_generated_signals_carry_store_parameters() {
    let generator = SignalGenerator::default();
    let mut classifier = RegimeClassifier::default();
    let store = ParameterStore::default();
    let series = PriceSeries::from_candles(&candles(&walk(150, 0.4))).unwrap();

    let result = generator.generate(&mut classifier, &store, &Symbol::from("SOL"), &series);

    for s in &result.signals {
        assert_eq!(s.parameters, store.snapshot(s.regime, s.signal_type));
        assert_eq!(s.regime, result.regime_state.regime);
        assert!(s.strength >= generator.config().min_strength);
    }
}

#[test]
fn test_replay_multiple_symbols_independently() {
    let series = [
        ("UP", walk(300, 0.3)),
        ("DOWN", walk(300, -0.3)),
        ("FLAT", sinusoid(300, 5.0, 20.0)),
    ];

    for (name, closes) in &series {
        let mut session = Session::default();
        let symbol = Symbol::from(*name);
        let report = session.replay(&symbol, &candles(closes)).unwrap();

        assert_eq!(report.bars_processed, 300);
        assert_eq!(report.signals_opened, report.outcomes_closed + report.still_open);
        assert_eq!(report.performance.overall.total, report.outcomes_closed);
        assert!(report.final_regime.is_some());
        assert_eq!(session.store().outcome_count(), report.outcomes_closed);
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_risk_reward_formula(
        entry in 1.0f64..1_000.0,
        stop_offset in 0.01f64..100.0,
        target_offset in 0.0f64..200.0,
    ) {
        let stop = entry - stop_offset;
        let target = entry + target_offset;
        let expected = (target - entry).abs() / (entry - stop).abs();
        prop_assert_eq!(risk_reward_ratio(Some(entry), Some(stop), Some(target)), Some(expected));
    }

    #[test]
    fn prop_short_series_is_low_confidence(
        closes in prop::collection::vec(1.0f64..1_000.0, 1..51),
    ) {
        let mut classifier = RegimeClassifier::default();
        let series = PriceSeries::new(closes).unwrap();
        let state = classifier.classify(&Symbol::from("X"), &series, DetectionMethod::Combined);

        prop_assert!(state.confidence < 0.5);
        prop_assert!(state.trend_direction.is_none());
        prop_assert!(state.trend_strength.is_none());
        prop_assert!(state.volatility_level.is_none());
    }

    #[test]
    fn prop_summary_win_rate(
        exits in prop::collection::vec(prop::option::of(-10.0f64..10.0), 1..40),
    ) {
        let mut tracker = OutcomeTracker::default();
        for (i, exit) in exits.iter().enumerate() {
            let id = format!("s{}", i);
            let s = signal(&id, Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, 100.0);
            tracker.open(&s, None).unwrap();
            match exit {
                Some(r) => { tracker.close(&id, 100.0 + r, false, false).unwrap(); }
                None => { tracker.expire(&id).unwrap(); }
            }
        }

        let summary = tracker.summary();
        let wins = tracker
            .completed()
            .iter()
            .filter(|o| o.state == OutcomeState::Win)
            .count();
        prop_assert_eq!(summary.total, exits.len());
        prop_assert_eq!(summary.wins, wins);
        prop_assert_eq!(summary.win_rate, wins as f64 / exits.len() as f64);
    }

    #[test]
    fn prop_excursions_mirror_by_direction(
        entry in 10.0f64..1_000.0,
        up in 0.0f64..50.0,
        down in 0.0f64..9.0,
    ) {
        let mut tracker = OutcomeTracker::default();
        let long = signal("l", Direction::Long, MarketRegime::BullTrending, SignalType::Momentum, entry);
        let short = signal("s", Direction::Short, MarketRegime::BearTrending, SignalType::Breakdown, entry);
        tracker.open(&long, None).unwrap();
        tracker.open(&short, None).unwrap();

        let (high, low) = (entry + up, entry - down);
        let l = tracker.update("l", entry, Some(high), Some(low)).unwrap().clone();
        let s = tracker.update("s", entry, Some(high), Some(low)).unwrap().clone();

        prop_assert_eq!(l.max_favorable, Some(high - entry));
        prop_assert_eq!(l.max_adverse, Some(entry - low));
        prop_assert_eq!(s.max_favorable, l.max_adverse);
        prop_assert_eq!(s.max_adverse, l.max_favorable);
    }
}
