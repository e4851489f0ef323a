//! Classify command implementation

use anyhow::Result;
use regime_signals::{load_csv, DetectionMethod, PriceSeries, RegimeClassifier};
use std::path::PathBuf;
use tracing::info;

pub fn run(
    data: PathBuf,
    symbol: Option<String>,
    method: String,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = super::load_config(config.as_deref())?;
    let method: DetectionMethod = method.parse().map_err(anyhow::Error::msg)?;
    let symbol = super::symbol_for(&data, symbol)?;

    let candles = load_csv(&data)?;
    let series = PriceSeries::from_candles(&candles)?;

    let mut classifier = RegimeClassifier::new(config.classifier);
    let state = classifier.classify(&symbol, &series, method);
    info!(
        symbol = %symbol,
        method = %method,
        "Classified as {} (confidence {:.2})",
        state.regime,
        state.confidence
    );

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
