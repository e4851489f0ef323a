//! Regime Signals
//!
//! The analytical core of a trading platform: classifies the prevailing
//! market regime of a price series, generates trading signals conditioned
//! on that regime, tracks each signal's realized outcome, and adapts the
//! per-regime risk parameters from accumulated outcomes.
//!
//! ```text
//! RegimeClassifier -> SignalGenerator -> OutcomeTracker -> ParameterStore
//!        ^                                                      |
//!        +------------------------------------------------------+
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod optimizer;
pub mod regime;
pub mod session;
pub mod signals;
pub mod tracker;
pub mod types;

pub use config::Config;
pub use data::{load_csv, Candle, PriceSeries};
pub use error::EngineError;
pub use optimizer::{Parameter, ParameterKey, ParameterStore, TuningEvent};
pub use regime::{RegimeClassifier, RegimeStatistics};
pub use session::{ReplayReport, Session};
pub use signals::{GenerationResult, SignalGenerator};
pub use tracker::{ExitTrigger, OutcomeTracker, PerformanceReport, PerformanceSummary};
pub use types::*;
