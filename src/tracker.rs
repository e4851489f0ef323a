//! Signal Outcome Tracking
//!
//! Follows each opened signal from pending to exactly one terminal state
//! and aggregates accuracy and return statistics overall, by regime and by
//! signal type.
//!
//! Returns are direction-aware percentages:
//! ```text
//! long  = (exit - entry) / entry * 100
//! short = (entry - exit) / entry * 100
//! ```
//! Close-long signals are measured like shorts, close-short and neutral
//! signals like longs.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{EngineError, Result};
use crate::indicators::mean;
use crate::{Exposure, MarketRegime, Outcome, OutcomeState, Signal, SignalType};

/// Price level touched by a bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "price", rename_all = "snake_case")]
pub enum ExitTrigger {
    Stop(f64),
    Target(f64),
}

/// Aggregate statistics over a set of completed outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    pub expired: usize,
    /// Wins over all completed outcomes, expired included
    pub win_rate: f64,
    pub avg_return: f64,
    pub best_return: f64,
    pub worst_return: f64,
    pub total_return: f64,
    /// Gross profit over gross loss; infinite with profits and no losses
    pub profit_factor: f64,
    pub avg_duration_hours: f64,
    pub avg_max_favorable: f64,
    pub avg_max_adverse: f64,
}

impl PerformanceSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let outcomes: Vec<&Outcome> = outcomes.into_iter().collect();
        if outcomes.is_empty() {
            return Self::default();
        }

        let count = |state: OutcomeState| outcomes.iter().filter(|o| o.state == state).count();
        let wins = count(OutcomeState::Win);
        let losses = count(OutcomeState::Loss);
        let breakevens = count(OutcomeState::Breakeven);
        let expired = count(OutcomeState::Expired);

        let returns: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.state != OutcomeState::Expired)
            .filter_map(|o| o.return_pct)
            .collect();

        let gross_profits: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let gross_losses: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();

        // No losing trade in a non-empty set is unbounded
        let profit_factor = if gross_losses > 0.0 {
            gross_profits / gross_losses
        } else {
            f64::INFINITY
        };

        let durations: Vec<f64> = outcomes.iter().filter_map(|o| o.duration_hours).collect();
        let favorable: Vec<f64> = outcomes.iter().filter_map(|o| o.max_favorable).collect();
        let adverse: Vec<f64> = outcomes.iter().filter_map(|o| o.max_adverse).collect();

        Self {
            total: outcomes.len(),
            wins,
            losses,
            breakevens,
            expired,
            win_rate: wins as f64 / outcomes.len() as f64,
            avg_return: mean(&returns),
            best_return: returns.iter().copied().reduce(f64::max).unwrap_or(0.0),
            worst_return: returns.iter().copied().reduce(f64::min).unwrap_or(0.0),
            total_return: returns.iter().sum(),
            profit_factor,
            avg_duration_hours: mean(&durations),
            avg_max_favorable: mean(&favorable),
            avg_max_adverse: mean(&adverse),
        }
    }
}

/// Summaries sliced overall, by regime and by signal type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub active: usize,
    pub overall: PerformanceSummary,
    pub by_regime: BTreeMap<MarketRegime, PerformanceSummary>,
    pub by_signal_type: BTreeMap<SignalType, PerformanceSummary>,
}

/// Lifecycle manager for opened signals
#[derive(Debug, Clone, Default)]
pub struct OutcomeTracker {
    config: TrackerConfig,
    active: BTreeMap<String, Outcome>,
    completed: Vec<Outcome>,
}

impl OutcomeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            active: BTreeMap::new(),
            completed: Vec::new(),
        }
    }

    pub fn open(&mut self, signal: &Signal, entry_price: Option<f64>) -> Result<Outcome> {
        self.open_at(signal, entry_price, Utc::now())
    }

    /// Register a pending outcome for the signal. The entry defaults to the
    /// signal's own entry price, then to 0.0 for signals without levels. A
    /// zero entry yields zero returns and no excursions.
    pub fn open_at(
        &mut self,
        signal: &Signal,
        entry_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        if self.active.contains_key(&signal.id) {
            warn!(signal_id = %signal.id, "Signal already open");
            return Err(EngineError::AlreadyOpen(signal.id.clone()));
        }
        if signal.is_expired(now) {
            warn!(signal_id = %signal.id, "Opening a signal that has already expired");
        }
        let entry_price = entry_price.or(signal.entry_price).unwrap_or_else(|| {
            warn!(signal_id = %signal.id, "No entry price, recording 0.0");
            0.0
        });

        let outcome = Outcome {
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            signal_type: signal.signal_type,
            regime: signal.regime,
            direction: signal.direction,
            entry_price,
            exit_price: None,
            return_pct: None,
            max_favorable: None,
            max_adverse: None,
            duration_hours: None,
            hit_stop: false,
            hit_target: false,
            state: OutcomeState::Pending,
            opened_at: now,
            closed_at: None,
            stop_price: signal.stop_loss,
            target_price: signal.take_profit,
            expires_at: Some(signal.expires_at),
        };

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            "Opened {} {:?} @ {:.4}",
            signal.signal_type,
            signal.direction,
            entry_price
        );

        self.active.insert(signal.id.clone(), outcome.clone());
        Ok(outcome)
    }

    /// Fold a new observation into the excursions. High and low default to
    /// the current price. Returns `None` if the signal is not active.
    pub fn update(
        &mut self,
        signal_id: &str,
        current_price: f64,
        high: Option<f64>,
        low: Option<f64>,
    ) -> Option<&Outcome> {
        let Some(outcome) = self.active.get_mut(signal_id) else {
            debug!(signal_id, "Update for inactive signal ignored");
            return None;
        };
        apply_excursion(
            outcome,
            high.unwrap_or(current_price),
            low.unwrap_or(current_price),
        );
        Some(outcome)
    }

    /// Stop or target touched by a bar's range; the stop wins when both are
    pub fn exit_trigger(&self, signal_id: &str, high: f64, low: f64) -> Option<ExitTrigger> {
        let outcome = self.active.get(signal_id)?;
        let (stop_hit, target_hit) = match outcome.direction.exposure() {
            Exposure::Long => (
                outcome.stop_price.is_some_and(|s| low <= s),
                outcome.target_price.is_some_and(|t| high >= t),
            ),
            Exposure::Short => (
                outcome.stop_price.is_some_and(|s| high >= s),
                outcome.target_price.is_some_and(|t| low <= t),
            ),
        };

        if stop_hit {
            outcome.stop_price.map(ExitTrigger::Stop)
        } else if target_hit {
            outcome.target_price.map(ExitTrigger::Target)
        } else {
            None
        }
    }

    pub fn close(
        &mut self,
        signal_id: &str,
        exit_price: f64,
        hit_stop: bool,
        hit_target: bool,
    ) -> Result<Outcome> {
        self.close_at(signal_id, exit_price, hit_stop, hit_target, Utc::now())
    }

    pub fn close_at(
        &mut self,
        signal_id: &str,
        exit_price: f64,
        hit_stop: bool,
        hit_target: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let mut outcome = self.take_active(signal_id)?;

        apply_excursion(&mut outcome, exit_price, exit_price);
        let return_pct = outcome.return_at(exit_price);
        let band = self.config.breakeven_band_pct;

        outcome.exit_price = Some(exit_price);
        outcome.return_pct = Some(return_pct);
        outcome.hit_stop = hit_stop;
        outcome.hit_target = hit_target;
        outcome.state = if return_pct > band {
            OutcomeState::Win
        } else if return_pct < -band {
            OutcomeState::Loss
        } else {
            OutcomeState::Breakeven
        };

        Ok(self.complete(outcome, now))
    }

    pub fn expire(&mut self, signal_id: &str) -> Result<Outcome> {
        self.expire_at(signal_id, Utc::now())
    }

    pub fn expire_at(&mut self, signal_id: &str, now: DateTime<Utc>) -> Result<Outcome> {
        let mut outcome = self.take_active(signal_id)?;
        outcome.state = OutcomeState::Expired;
        Ok(self.complete(outcome, now))
    }

    /// Expire every active outcome whose expiry has passed
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Outcome> {
        let due: Vec<String> = self
            .active
            .values()
            .filter(|o| o.expires_at.is_some_and(|e| now >= e))
            .map(|o| o.signal_id.clone())
            .collect();

        due.iter()
            .filter_map(|id| self.expire_at(id, now).ok())
            .collect()
    }

    fn take_active(&mut self, signal_id: &str) -> Result<Outcome> {
        self.active.remove(signal_id).ok_or_else(|| {
            warn!(signal_id, "Signal is not active");
            EngineError::NotActive(signal_id.to_string())
        })
    }

    fn complete(&mut self, mut outcome: Outcome, now: DateTime<Utc>) -> Outcome {
        outcome.closed_at = Some(now);
        outcome.duration_hours =
            Some((now - outcome.opened_at).num_milliseconds() as f64 / 3_600_000.0);

        info!(
            signal_id = %outcome.signal_id,
            symbol = %outcome.symbol,
            state = ?outcome.state,
            "Closed {} with return {:.2}%",
            outcome.signal_type,
            outcome.return_pct.unwrap_or(0.0)
        );

        self.completed.push(outcome.clone());
        outcome
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Active outcome, or the most recent completed one for the identifier
    pub fn get(&self, signal_id: &str) -> Option<&Outcome> {
        self.active
            .get(signal_id)
            .or_else(|| self.completed.iter().rev().find(|o| o.signal_id == signal_id))
    }

    pub fn is_active(&self, signal_id: &str) -> bool {
        self.active.contains_key(signal_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Outcome> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed(&self) -> &[Outcome] {
        &self.completed
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::from_outcomes(&self.completed)
    }

    pub fn summary_by_regime(&self) -> BTreeMap<MarketRegime, PerformanceSummary> {
        self.completed
            .iter()
            .into_group_map_by(|o| o.regime)
            .into_iter()
            .map(|(regime, outcomes)| (regime, PerformanceSummary::from_outcomes(outcomes)))
            .collect()
    }

    pub fn summary_by_signal_type(&self) -> BTreeMap<SignalType, PerformanceSummary> {
        self.completed
            .iter()
            .into_group_map_by(|o| o.signal_type)
            .into_iter()
            .map(|(signal_type, outcomes)| {
                (signal_type, PerformanceSummary::from_outcomes(outcomes))
            })
            .collect()
    }

    pub fn report(&self) -> PerformanceReport {
        PerformanceReport {
            active: self.active.len(),
            overall: self.summary(),
            by_regime: self.summary_by_regime(),
            by_signal_type: self.summary_by_signal_type(),
        }
    }

    /// Most recently closed outcomes first
    pub fn recent(&self, limit: usize) -> Vec<&Outcome> {
        self.completed
            .iter()
            .sorted_by(|a, b| b.closed_at.cmp(&a.closed_at))
            .take(limit)
            .collect()
    }
}

fn apply_excursion(outcome: &mut Outcome, high: f64, low: f64) {
    let entry = outcome.entry_price;
    if entry == 0.0 {
        return;
    }
    let (favorable, adverse) = match outcome.direction.exposure() {
        Exposure::Long => (high - entry, entry - low),
        Exposure::Short => (entry - low, high - entry),
    };
    let favorable = favorable.max(0.0);
    let adverse = adverse.max(0.0);

    outcome.max_favorable = Some(outcome.max_favorable.map_or(favorable, |m| m.max(favorable)));
    outcome.max_adverse = Some(outcome.max_adverse.map_or(adverse, |m| m.max(adverse)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, Symbol};
    use approx::assert_abs_diff_eq;
    use chrono::Duration;

    fn signal(id: &str, direction: Direction) -> Signal {
        let now = Utc::now();
        let (stop, target) = match direction {
            Direction::Short => (105.0, 90.0),
            _ => (95.0, 110.0),
        };
        Signal {
            id: id.to_string(),
            symbol: Symbol::from("BTC"),
            signal_type: SignalType::Momentum,
            direction,
            regime: MarketRegime::BullTrending,
            strength: 0.7,
            confidence: 0.6,
            regime_confidence: 0.8,
            entry_price: Some(100.0),
            stop_loss: Some(stop),
            take_profit: Some(target),
            risk_reward_ratio: Some(2.0),
            indicators: vec!["rsi".into()],
            parameters: BTreeMap::new(),
            notes: String::new(),
            is_active: true,
            expires_at: now + Duration::hours(24),
            created_at: now,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_open_close_at_entry_is_breakeven() {
        let mut tracker = OutcomeTracker::default();
        tracker.open(&signal("a", Direction::Long), None).unwrap();
        let outcome = tracker.close("a", 100.0, false, false).unwrap();

        assert_eq!(outcome.return_pct, Some(0.0));
        assert_eq!(outcome.state, OutcomeState::Breakeven);
        assert!(!tracker.is_active("a"));
    }

    #[test]
    fn test_double_open_rejected() {
        let mut tracker = OutcomeTracker::default();
        let s = signal("a", Direction::Long);
        tracker.open(&s, None).unwrap();
        assert_eq!(tracker.open(&s, None), Err(EngineError::AlreadyOpen("a".into())));

        // Reopening after close is allowed
        tracker.close("a", 101.0, false, false).unwrap();
        assert!(tracker.open(&s, None).is_ok());
    }

    #[test]
    fn test_open_without_entry_price() {
        let mut tracker = OutcomeTracker::default();
        let mut s = signal("a", Direction::Neutral);
        s.entry_price = None;
        s.stop_loss = None;
        s.take_profit = None;

        let outcome = tracker.open(&s, None).unwrap();
        assert_eq!(outcome.entry_price, 0.0);

        // No excursions or return against a zero entry
        let outcome = tracker.update("a", 50.0, Some(55.0), Some(45.0)).unwrap();
        assert_eq!(outcome.max_favorable, None);
        assert_eq!(outcome.max_adverse, None);
        let outcome = tracker.close("a", 50.0, false, false).unwrap();
        assert_eq!(outcome.return_pct, Some(0.0));
        assert_eq!(outcome.state, OutcomeState::Breakeven);

        // Only a double open fails
        tracker.open(&s, Some(50.0)).unwrap();
        assert_eq!(tracker.open(&s, None), Err(EngineError::AlreadyOpen("a".into())));
        assert_eq!(tracker.get("a").unwrap().entry_price, 50.0);
    }

    #[test]
    fn test_open_expired_signal_is_tracked() {
        let mut tracker = OutcomeTracker::default();
        let s = signal("a", Direction::Long);
        let late = s.expires_at + Duration::hours(1);

        tracker.open_at(&s, None, late).unwrap();
        let swept = tracker.sweep_expired(late);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].state, OutcomeState::Expired);
    }

    #[test]
    fn test_excursions_long_and_short() {
        let mut tracker = OutcomeTracker::default();
        tracker.open(&signal("long", Direction::Long), None).unwrap();
        tracker.open(&signal("short", Direction::Short), None).unwrap();

        let long = tracker.update("long", 101.0, Some(106.0), Some(98.0)).unwrap();
        assert_eq!(long.max_favorable, Some(6.0));
        assert_eq!(long.max_adverse, Some(2.0));

        let short = tracker.update("short", 101.0, Some(106.0), Some(98.0)).unwrap();
        assert_eq!(short.max_favorable, Some(2.0));
        assert_eq!(short.max_adverse, Some(6.0));

        // Excursions only grow
        let long = tracker.update("long", 100.0, None, None).unwrap();
        assert_eq!(long.max_favorable, Some(6.0));

        assert!(tracker.update("missing", 100.0, None, None).is_none());
    }

    #[test]
    fn test_short_returns() {
        let mut tracker = OutcomeTracker::default();
        tracker.open(&signal("s", Direction::Short), None).unwrap();
        let outcome = tracker.close("s", 95.0, false, true).unwrap();
        assert_abs_diff_eq!(outcome.return_pct.unwrap(), 5.0, epsilon = 1e-12);
        assert_eq!(outcome.state, OutcomeState::Win);
        assert!(outcome.hit_target);

        tracker.open(&signal("cl", Direction::CloseLong), None).unwrap();
        let outcome = tracker.close("cl", 102.0, false, false).unwrap();
        assert_eq!(outcome.state, OutcomeState::Loss);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut tracker = OutcomeTracker::default();
        tracker.open(&signal("a", Direction::Long), None).unwrap();
        let closed = tracker.close("a", 103.0, false, false).unwrap();

        assert_eq!(tracker.close("a", 90.0, true, false), Err(EngineError::NotActive("a".into())));
        assert_eq!(tracker.expire("a"), Err(EngineError::NotActive("a".into())));
        assert_eq!(tracker.get("a"), Some(&closed));
        assert_eq!(tracker.completed().len(), 1);
    }

    #[test]
    fn test_expire_and_sweep() {
        let mut tracker = OutcomeTracker::default();
        let opened = Utc::now();
        tracker.open_at(&signal("a", Direction::Long), None, opened).unwrap();
        tracker.open_at(&signal("b", Direction::Long), None, opened).unwrap();

        let outcome = tracker.expire_at("a", opened + Duration::hours(2)).unwrap();
        assert_eq!(outcome.state, OutcomeState::Expired);
        assert_eq!(outcome.return_pct, None);
        assert_abs_diff_eq!(outcome.duration_hours.unwrap(), 2.0, epsilon = 1e-9);

        assert!(tracker.sweep_expired(opened).is_empty());
        let swept = tracker.sweep_expired(opened + Duration::hours(48));
        assert_eq!(swept.len(), 1);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_exit_trigger() {
        let mut tracker = OutcomeTracker::default();
        tracker.open(&signal("l", Direction::Long), None).unwrap();
        tracker.open(&signal("s", Direction::Short), None).unwrap();

        assert_eq!(tracker.exit_trigger("l", 104.0, 97.0), None);
        assert_eq!(tracker.exit_trigger("l", 111.0, 99.0), Some(ExitTrigger::Target(110.0)));
        // Both touched: stop wins
        assert_eq!(tracker.exit_trigger("l", 111.0, 94.0), Some(ExitTrigger::Stop(95.0)));
        assert_eq!(tracker.exit_trigger("s", 106.0, 99.0), Some(ExitTrigger::Stop(105.0)));
        assert_eq!(tracker.exit_trigger("s", 101.0, 89.0), Some(ExitTrigger::Target(90.0)));
    }

    #[test]
    fn test_summary() {
        let mut tracker = OutcomeTracker::default();
        for (id, exit) in [("a", 105.0), ("b", 98.0), ("c", 100.0), ("d", 110.0)] {
            tracker.open(&signal(id, Direction::Long), None).unwrap();
            tracker.close(id, exit, false, false).unwrap();
        }
        tracker.open(&signal("e", Direction::Long), None).unwrap();
        tracker.expire("e").unwrap();

        let summary = tracker.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.breakevens, 1);
        assert_eq!(summary.expired, 1);
        assert_abs_diff_eq!(summary.win_rate, 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.avg_return, 13.0 / 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.best_return, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.worst_return, -2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.profit_factor, 7.5, epsilon = 1e-9);

        let by_type = tracker.summary_by_signal_type();
        assert_eq!(by_type[&SignalType::Momentum].total, 5);
        assert_eq!(tracker.recent(2).len(), 2);
        assert_eq!(tracker.report().by_regime.len(), 1);
    }

    #[test]
    fn test_profit_factor_edges() {
        let mut tracker = OutcomeTracker::default();
        assert_eq!(tracker.summary(), PerformanceSummary::default());

        // Breakeven only: no losses, so unbounded
        tracker.open(&signal("a", Direction::Long), None).unwrap();
        tracker.close("a", 100.0, false, false).unwrap();
        assert_eq!(tracker.summary().profit_factor, f64::INFINITY);

        tracker.open(&signal("b", Direction::Long), None).unwrap();
        tracker.close("b", 105.0, false, false).unwrap();
        assert_eq!(tracker.summary().profit_factor, f64::INFINITY);

        // Expired only: still no losses
        let mut expired = OutcomeTracker::default();
        expired.open(&signal("e", Direction::Long), None).unwrap();
        expired.expire("e").unwrap();
        assert_eq!(expired.summary().profit_factor, f64::INFINITY);

        tracker.open(&signal("c", Direction::Long), None).unwrap();
        tracker.close("c", 95.0, false, false).unwrap();
        assert_abs_diff_eq!(tracker.summary().profit_factor, 1.0, epsilon = 1e-9);
    }
}
