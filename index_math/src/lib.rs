//! # Index Math
//!
//! Numerical building blocks for monthly economic index series.
//! This crate provides month-granularity calendar arithmetic, an ordinary
//! least squares trend fit over a month index, and percentage-change helpers
//! that carry "undefined" as an explicit `None`.

use thiserror::Error;

pub mod calendar;
pub mod change;
pub mod regression;

pub use calendar::{Month, MonthRange};
pub use change::{difference, pct_change, scale_factor};
pub use regression::LinearFit;

/// Errors that can occur in index calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for index math operations
pub type Result<T> = std::result::Result<T, MathError>;
