//! Signals command implementation

use anyhow::Result;
use regime_signals::{load_csv, ParameterStore, PriceSeries, RegimeClassifier, SignalGenerator};
use std::path::PathBuf;
use tracing::{info, warn};

pub fn run(data: PathBuf, symbol: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config.as_deref())?;
    let symbol = super::symbol_for(&data, symbol)?;

    let candles = load_csv(&data)?;
    let series = PriceSeries::from_candles(&candles)?;

    let mut classifier = RegimeClassifier::new(config.classifier.clone());
    let store = ParameterStore::new(config.optimizer.clone(), &config.regimes);
    let generator = SignalGenerator::new(config.generator.clone(), config.regimes.clone());

    let result = generator.generate(&mut classifier, &store, &symbol, &series);
    for warning in &result.warnings {
        warn!(symbol = %symbol, "{}", warning);
    }
    info!(
        symbol = %symbol,
        regime = %result.regime_state.regime,
        "{} signals",
        result.signals.len()
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
