//! Core data types used across the engine
//!
//! Every enumerated field serializes to its lowercase name and every
//! timestamp to an ISO-8601 string, so these records can be handed to the
//! dashboard/API layer as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Instrument symbol
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Prevailing market condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    BullTrending,
    BullVolatile,
    BearTrending,
    BearVolatile,
    SidewaysLowVol,
    SidewaysHighVol,
    Crisis,
    Recovery,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 8] = [
        MarketRegime::BullTrending,
        MarketRegime::BullVolatile,
        MarketRegime::BearTrending,
        MarketRegime::BearVolatile,
        MarketRegime::SidewaysLowVol,
        MarketRegime::SidewaysHighVol,
        MarketRegime::Crisis,
        MarketRegime::Recovery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::BullTrending => "bull_trending",
            MarketRegime::BullVolatile => "bull_volatile",
            MarketRegime::BearTrending => "bear_trending",
            MarketRegime::BearVolatile => "bear_volatile",
            MarketRegime::SidewaysLowVol => "sideways_low_vol",
            MarketRegime::SidewaysHighVol => "sideways_high_vol",
            MarketRegime::Crisis => "crisis",
            MarketRegime::Recovery => "recovery",
        }
    }

    pub fn is_sideways(&self) -> bool {
        matches!(
            self,
            MarketRegime::SidewaysLowVol | MarketRegime::SidewaysHighVol
        )
    }

    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            MarketRegime::BullTrending | MarketRegime::BullVolatile | MarketRegime::Recovery
        )
    }

    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            MarketRegime::BearTrending | MarketRegime::BearVolatile | MarketRegime::Crisis
        )
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a regime was classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    VolatilityCluster,
    TrendStrength,
    MovingAverage,
    #[default]
    Combined,
}

impl DetectionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            DetectionMethod::VolatilityCluster => "volatility_cluster",
            DetectionMethod::TrendStrength => "trend_strength",
            DetectionMethod::MovingAverage => "moving_average",
            DetectionMethod::Combined => "combined",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "volatility_cluster" | "volatility" => Ok(DetectionMethod::VolatilityCluster),
            "trend_strength" | "trend" => Ok(DetectionMethod::TrendStrength),
            "moving_average" | "ma" => Ok(DetectionMethod::MovingAverage),
            "combined" | "ensemble" => Ok(DetectionMethod::Combined),
            other => Err(format!(
                "unknown detection method '{}'. Available: volatility_cluster, trend_strength, moving_average, combined",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

/// Signal archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Momentum,
    MeanReversion,
    Breakout,
    Breakdown,
    TrendFollowing,
    CounterTrend,
    VolatilityExpansion,
    VolatilityContraction,
    Defensive,
    Aggressive,
}

impl SignalType {
    pub const ALL: [SignalType; 10] = [
        SignalType::Momentum,
        SignalType::MeanReversion,
        SignalType::Breakout,
        SignalType::Breakdown,
        SignalType::TrendFollowing,
        SignalType::CounterTrend,
        SignalType::VolatilityExpansion,
        SignalType::VolatilityContraction,
        SignalType::Defensive,
        SignalType::Aggressive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalType::Momentum => "momentum",
            SignalType::MeanReversion => "mean_reversion",
            SignalType::Breakout => "breakout",
            SignalType::Breakdown => "breakdown",
            SignalType::TrendFollowing => "trend_following",
            SignalType::CounterTrend => "counter_trend",
            SignalType::VolatilityExpansion => "volatility_expansion",
            SignalType::VolatilityContraction => "volatility_contraction",
            SignalType::Defensive => "defensive",
            SignalType::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a signal asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Neutral,
    CloseLong,
    CloseShort,
}

/// Side whose arithmetic applies when measuring an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    Long,
    Short,
}

impl Direction {
    /// True for signals that open a position.
    pub fn is_entry(&self) -> bool {
        matches!(self, Direction::Long | Direction::Short)
    }

    /// Closing a long profits from a fall, so it is measured like a short.
    pub fn exposure(&self) -> Exposure {
        match self {
            Direction::Long | Direction::CloseShort | Direction::Neutral => Exposure::Long,
            Direction::Short | Direction::CloseLong => Exposure::Short,
        }
    }
}

/// Lifecycle state of a tracked signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Pending,
    Win,
    Loss,
    Breakeven,
    Expired,
}

impl OutcomeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutcomeState::Pending)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Value stored in an open-ended annotation map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Flag(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

// =============================================================================
// Records
// =============================================================================

/// One classification result for one symbol at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub symbol: Symbol,
    pub regime: MarketRegime,
    pub method: DetectionMethod,
    pub confidence: f64,
    pub trend_direction: Option<TrendDirection>,
    pub trend_strength: Option<f64>,
    pub volatility_level: Option<VolatilityLevel>,
    /// Consecutive observations in this regime, including this one
    pub duration: usize,
    pub transition_probability: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RegimeState {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(MetadataValue::as_f64)
    }
}

/// A single actionable output of the signal generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: Symbol,
    pub signal_type: SignalType,
    pub direction: Direction,
    pub regime: MarketRegime,
    pub strength: f64,
    pub confidence: f64,
    pub regime_confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward_ratio: Option<f64>,
    pub indicators: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    pub notes: String,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// `|target - entry| / |entry - stop|`, defined only when all three are
/// present and entry differs from stop.
pub fn risk_reward_ratio(entry: Option<f64>, stop: Option<f64>, target: Option<f64>) -> Option<f64> {
    let (entry, stop, target) = (entry?, stop?, target?);
    let risk = (entry - stop).abs();
    if risk == 0.0 {
        return None;
    }
    Some((target - entry).abs() / risk)
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Distance from entry to stop
    pub fn risk_amount(&self) -> Option<f64> {
        Some((self.entry_price? - self.stop_loss?).abs())
    }

    /// Distance from entry to target
    pub fn reward_amount(&self) -> Option<f64> {
        Some((self.take_profit? - self.entry_price?).abs())
    }
}

/// Tracked lifecycle of one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub signal_id: String,
    pub symbol: Symbol,
    pub signal_type: SignalType,
    pub regime: MarketRegime,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    /// Return in percent (1.5 means +1.5%)
    pub return_pct: Option<f64>,
    pub max_favorable: Option<f64>,
    pub max_adverse: Option<f64>,
    pub duration_hours: Option<f64>,
    pub hit_stop: bool,
    pub hit_target: bool,
    pub state: OutcomeState,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Signed return of moving from entry to `price`, in percent.
    pub fn return_at(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        let pct = match self.direction.exposure() {
            Exposure::Long => (price - self.entry_price) / self.entry_price,
            Exposure::Short => (self.entry_price - price) / self.entry_price,
        };
        pct * 100.0
    }
}
