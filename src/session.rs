//! Feedback-loop session
//!
//! A [`Session`] owns one classifier, generator, parameter store and
//! tracker. Terminal outcomes flow from the tracker into the store, and the
//! store's tuned parameters flow into the next generation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, ReplayConfig};
use crate::data::{Candle, PriceSeries};
use crate::error::Result;
use crate::optimizer::{ParameterKey, ParameterStore, TuningEvent};
use crate::regime::RegimeClassifier;
use crate::signals::{GenerationResult, SignalGenerator};
use crate::tracker::{ExitTrigger, OutcomeTracker, PerformanceReport};
use crate::{MarketRegime, Outcome, Signal, Symbol};

/// Result of a walk-forward replay over one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub symbol: Symbol,
    pub bars_processed: usize,
    pub signals_generated: usize,
    pub signals_opened: usize,
    pub outcomes_closed: usize,
    pub still_open: usize,
    pub final_regime: Option<MarketRegime>,
    pub performance: PerformanceReport,
    pub tuning_log: Vec<TuningEvent>,
}

pub struct Session {
    classifier: RegimeClassifier,
    generator: SignalGenerator,
    store: ParameterStore,
    tracker: OutcomeTracker,
    replay: ReplayConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self {
            classifier: RegimeClassifier::new(config.classifier.clone()),
            generator: SignalGenerator::new(config.generator.clone(), config.regimes.clone()),
            store: ParameterStore::new(config.optimizer.clone(), &config.regimes),
            tracker: OutcomeTracker::new(config.tracker.clone()),
            replay: config.replay.clone(),
        }
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn generator(&self) -> &SignalGenerator {
        &self.generator
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn tracker(&self) -> &OutcomeTracker {
        &self.tracker
    }

    /// Classify and generate with the current tuned parameters
    pub fn analyze(&mut self, symbol: &Symbol, series: &PriceSeries) -> GenerationResult {
        self.analyze_at(symbol, series, Utc::now())
    }

    pub fn analyze_at(
        &mut self,
        symbol: &Symbol,
        series: &PriceSeries,
        now: DateTime<Utc>,
    ) -> GenerationResult {
        self.generator
            .generate_at(&mut self.classifier, &self.store, symbol, series, now)
    }

    pub fn open_signal(&mut self, signal: &Signal, entry_price: Option<f64>) -> Result<Outcome> {
        self.tracker.open(signal, entry_price)
    }

    pub fn open_signal_at(
        &mut self,
        signal: &Signal,
        entry_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        self.tracker.open_at(signal, entry_price, now)
    }

    pub fn update_signal(
        &mut self,
        signal_id: &str,
        price: f64,
        high: Option<f64>,
        low: Option<f64>,
    ) -> Option<&Outcome> {
        self.tracker.update(signal_id, price, high, low)
    }

    pub fn close_signal(
        &mut self,
        signal_id: &str,
        exit_price: f64,
        hit_stop: bool,
        hit_target: bool,
    ) -> Result<Outcome> {
        self.close_signal_at(signal_id, exit_price, hit_stop, hit_target, Utc::now())
    }

    pub fn close_signal_at(
        &mut self,
        signal_id: &str,
        exit_price: f64,
        hit_stop: bool,
        hit_target: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let outcome = self
            .tracker
            .close_at(signal_id, exit_price, hit_stop, hit_target, now)?;
        self.store.record_outcome(&outcome);
        Ok(outcome)
    }

    pub fn expire_signal(&mut self, signal_id: &str) -> Result<Outcome> {
        self.expire_signal_at(signal_id, Utc::now())
    }

    pub fn expire_signal_at(&mut self, signal_id: &str, now: DateTime<Utc>) -> Result<Outcome> {
        let outcome = self.tracker.expire_at(signal_id, now)?;
        self.store.record_outcome(&outcome);
        Ok(outcome)
    }

    /// Expire every overdue signal and feed the results back
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Outcome> {
        let expired = self.tracker.sweep_expired(now);
        for outcome in &expired {
            self.store.record_outcome(outcome);
        }
        expired
    }

    pub fn optimize(&mut self) -> Vec<ParameterKey> {
        self.store.optimize(None, None)
    }

    pub fn report(&self) -> PerformanceReport {
        self.tracker.report()
    }

    /// Walk forward over the candles as if they arrived one at a time.
    ///
    /// Per bar: open outcomes see the bar's range and close on a stop or
    /// target touch, overdue ones expire at the bar's timestamp, then the
    /// trailing window is analyzed and the strongest entry signal opened
    /// when the symbol has nothing open.
    pub fn replay(&mut self, symbol: &Symbol, candles: &[Candle]) -> Result<ReplayReport> {
        let series = PriceSeries::from_candles(candles)?;
        let warmup = self.replay.warmup_bars.max(1);

        let completed_before = self.tracker.completed().len();
        let mut signals_generated = 0;
        let mut signals_opened = 0;

        for (i, bar) in candles.iter().enumerate() {
            let now = bar.datetime;
            self.settle_bar(symbol, bar);
            self.sweep_expired(now);

            if i + 1 < warmup {
                continue;
            }

            let window = series.slice((i + 1).saturating_sub(self.replay.window_bars)..i + 1);
            let result = self.analyze_at(symbol, &window, now);
            signals_generated += result.signals.len();

            let has_open = self.tracker.active().any(|o| o.symbol == *symbol);
            if !has_open {
                if let Some(signal) = result.strongest_entry() {
                    if self.tracker.open_at(signal, None, now).is_ok() {
                        signals_opened += 1;
                    }
                }
            }

            if self.replay.optimize_every > 0 && (i + 1) % self.replay.optimize_every == 0 {
                let changed = self.store.optimize_at(None, None, now);
                if !changed.is_empty() {
                    debug!(symbol = %symbol, bar = i, changed = changed.len(), "Replay re-tuned parameters");
                }
            }
        }

        let outcomes_closed = self.tracker.completed().len() - completed_before;
        let still_open = self
            .tracker
            .active()
            .filter(|o| o.symbol == *symbol)
            .count();

        info!(
            symbol = %symbol,
            bars = candles.len(),
            opened = signals_opened,
            closed = outcomes_closed,
            "Replay complete"
        );

        Ok(ReplayReport {
            symbol: symbol.clone(),
            bars_processed: candles.len(),
            signals_generated,
            signals_opened,
            outcomes_closed,
            still_open,
            final_regime: self.classifier.current(symbol).map(|s| s.regime),
            performance: self.tracker.report(),
            tuning_log: self.store.tuning_log().to_vec(),
        })
    }

    /// Mark open outcomes to the bar and close any whose stop or target it touched
    fn settle_bar(&mut self, symbol: &Symbol, bar: &Candle) {
        let open_ids: Vec<String> = self
            .tracker
            .active()
            .filter(|o| o.symbol == *symbol)
            .map(|o| o.signal_id.clone())
            .collect();

        for id in open_ids {
            self.tracker
                .update(&id, bar.close, Some(bar.high), Some(bar.low));

            let closed = match self.tracker.exit_trigger(&id, bar.high, bar.low) {
                Some(ExitTrigger::Stop(price)) => {
                    self.close_signal_at(&id, price, true, false, bar.datetime)
                }
                Some(ExitTrigger::Target(price)) => {
                    self.close_signal_at(&id, price, false, true, bar.datetime)
                }
                None => continue,
            };
            if let Err(e) = closed {
                debug!(signal_id = %id, error = %e, "Exit skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::hours(i as i64),
                open: c,
                high: c * 1.005,
                low: c * 0.995,
                close: c,
                volume: 1000.0,
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                100.0 + t * 0.05 + 6.0 * (t * 2.0 * std::f64::consts::PI / 40.0).sin()
            })
            .collect()
    }

    #[test]
    fn test_close_feeds_store() {
        let mut session = Session::default();
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 0.5).collect();
        let series = PriceSeries::from_candles(&candles(&closes)).unwrap();
        let symbol = Symbol::from("BTC");

        let result = session.analyze(&symbol, &series);
        let signal = result
            .strongest_entry()
            .cloned()
            .expect("steady uptrend yields an entry signal");
        session.open_signal(&signal, None).unwrap();
        let outcome = session.close_signal(&signal.id, 200.0, false, true).unwrap();

        assert!(outcome.is_terminal());
        assert_eq!(session.store().outcome_count(), 1);
        assert!(session.close_signal(&signal.id, 200.0, false, true).is_err());
        assert_eq!(session.store().outcome_count(), 1);
    }

    #[test]
    fn test_replay_accounting() {
        let mut session = Session::default();
        let symbol = Symbol::from("ETH");
        let bars = candles(&wave(400));

        let report = session.replay(&symbol, &bars).unwrap();

        assert_eq!(report.bars_processed, 400);
        assert_eq!(report.outcomes_closed, session.tracker().completed().len());
        assert_eq!(report.signals_opened, report.outcomes_closed + report.still_open);
        assert_eq!(report.performance.overall.total, report.outcomes_closed);
        assert!(report.still_open <= 1);
        assert!(report.final_regime.is_some());
        assert_eq!(session.classifier().history(&symbol).len(), 400 - 59);
    }

    #[test]
    fn test_replay_rejects_empty() {
        let mut session = Session::default();
        assert!(session.replay(&Symbol::from("X"), &[]).is_err());
    }
}
