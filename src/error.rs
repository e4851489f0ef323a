//! Error types for the engine boundaries
//!
//! Nothing in the analytical core is fatal. These errors cover the places
//! where a caller hands us something unusable (a misaligned series, a
//! signal without an entry price) or refers to an identifier we are not
//! tracking.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("close series is empty")]
    EmptySeries,

    #[error("{series} series has {actual} values, expected {expected} to match closes")]
    MisalignedSeries {
        series: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{series} series contains a non-finite value at index {index}")]
    NonFiniteValue { series: &'static str, index: usize },

    #[error("signal {0} already has an open outcome")]
    AlreadyOpen(String),

    #[error("signal {0} is not active")]
    NotActive(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
