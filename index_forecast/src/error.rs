//! Error types for the index_forecast crate

use index_math::MathError;
use thiserror::Error;

/// Custom error types for the index_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error related to parameter validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid configuration, raised before any computation begins
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error reported by a storage backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// A write collided with an existing row under a uniqueness key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Error from calendar or regression math
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from CSV parsing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from JSON payload parsing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForecastError {
    /// Wrap any backend error as a storage error
    pub fn storage(err: impl std::fmt::Display) -> Self {
        ForecastError::Storage(err.to_string())
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;
