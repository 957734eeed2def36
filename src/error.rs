use thiserror::Error;

use crate::types::SensorKind;

/// Fusion error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("{sensor} measurement has {actual} values, expected {expected}")]
    DimensionMismatch {
        sensor: SensorKind,
        expected: usize,
        actual: usize,
    },

    #[error("Innovation covariance is singular during {sensor} update")]
    SingularInnovation { sensor: SensorKind },

    #[error("Unknown sensor type: {0}")]
    UnknownSensor(String),

    #[error("{sensor} measurement contains a non-finite value")]
    NonFiniteMeasurement { sensor: SensorKind },

    #[error("Timestamp went backwards: {current} < {previous}")]
    TimestampRegression { previous: u64, current: u64 },

    #[error("Malformed record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot compute RMSE: {0}")]
    InvalidMetricInput(String),
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;
