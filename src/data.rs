//! Input series and CSV loading
//!
//! The engine consumes already-materialized, index-aligned sequences. Closes
//! are required; highs, lows and volumes are optional and must match the
//! close series in length when supplied.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tracing::info;

use crate::error::EngineError;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Aligned price/volume sequences for one symbol, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    close: Vec<f64>,
    high: Option<Vec<f64>>,
    low: Option<Vec<f64>>,
    volume: Option<Vec<f64>>,
}

impl PriceSeries {
    /// Create a close-only series
    pub fn new(close: Vec<f64>) -> Result<Self, EngineError> {
        if close.is_empty() {
            return Err(EngineError::EmptySeries);
        }
        check_finite("close", &close)?;
        Ok(Self {
            close,
            high: None,
            low: None,
            volume: None,
        })
    }

    /// Attach high and low sequences
    pub fn with_high_low(mut self, high: Vec<f64>, low: Vec<f64>) -> Result<Self, EngineError> {
        self.check_aligned("high", &high)?;
        self.check_aligned("low", &low)?;
        self.high = Some(high);
        self.low = Some(low);
        Ok(self)
    }

    /// Attach a volume sequence
    pub fn with_volume(mut self, volume: Vec<f64>) -> Result<Self, EngineError> {
        self.check_aligned("volume", &volume)?;
        self.volume = Some(volume);
        Ok(self)
    }

    pub fn from_candles(candles: &[Candle]) -> Result<Self, EngineError> {
        let close = candles.iter().map(|c| c.close).collect();
        let high = candles.iter().map(|c| c.high).collect();
        let low = candles.iter().map(|c| c.low).collect();
        let volume = candles.iter().map(|c| c.volume).collect();
        Self::new(close)?.with_high_low(high, low)?.with_volume(volume)
    }

    fn check_aligned(&self, series: &'static str, values: &[f64]) -> Result<(), EngineError> {
        if values.len() != self.close.len() {
            return Err(EngineError::MisalignedSeries {
                series,
                expected: self.close.len(),
                actual: values.len(),
            });
        }
        check_finite(series, values)
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn closes(&self) -> &[f64] {
        &self.close
    }

    pub fn highs(&self) -> Option<&[f64]> {
        self.high.as_deref()
    }

    pub fn lows(&self) -> Option<&[f64]> {
        self.low.as_deref()
    }

    pub fn volumes(&self) -> Option<&[f64]> {
        self.volume.as_deref()
    }

    pub fn has_ranges(&self) -> bool {
        self.high.is_some() && self.low.is_some()
    }

    /// Highs, falling back to closes when no range data was supplied
    pub fn highs_or_closes(&self) -> &[f64] {
        self.highs().unwrap_or(&self.close)
    }

    /// Lows, falling back to closes when no range data was supplied
    pub fn lows_or_closes(&self) -> &[f64] {
        self.lows().unwrap_or(&self.close)
    }

    pub fn last_close(&self) -> f64 {
        self.close.last().copied().unwrap_or(0.0)
    }

    /// Observations in `range`, clamped to the series length
    pub fn slice(&self, range: Range<usize>) -> PriceSeries {
        let end = range.end.min(self.close.len());
        let start = range.start.min(end);
        PriceSeries {
            close: self.close[start..end].to_vec(),
            high: self.high.as_ref().map(|h| h[start..end].to_vec()),
            low: self.low.as_ref().map(|l| l[start..end].to_vec()),
            volume: self.volume.as_ref().map(|v| v[start..end].to_vec()),
        }
    }
}

fn check_finite(series: &'static str, values: &[f64]) -> Result<(), EngineError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EngineError::NonFiniteValue { series, index }),
        None => Ok(()),
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file (`datetime,open,high,low,close,volume`)
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)
            .with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} on row {}", name, row_idx + 1))
        };

        candles.push(Candle {
            datetime,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        });
    }

    info!(path = %path.display(), candles = candles.len(), "Loaded candles");
    Ok(candles)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    // Assume UTC when no timezone is given
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
