//! Forecasting models for monthly series

use crate::data::TimeSeriesData;
use crate::error::Result;
use index_math::Month;
use std::fmt::Debug;

/// Forecast result containing predicted values and their target months
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    /// Forecasted values
    values: Vec<f64>,
    /// Number of periods forecasted
    horizons: usize,
    /// Target month of each value, when the training data was dated
    months: Option<Vec<Month>>,
}

impl ForecastResult {
    /// Create a result whose values target consecutive months after `last_observed`
    pub fn dated(values: Vec<f64>, last_observed: Month) -> Self {
        let months = (1..=values.len() as i64)
            .map(|h| last_observed.offset(h))
            .collect();
        Self {
            horizons: values.len(),
            values,
            months: Some(months),
        }
    }

    /// A forecast with no values, produced for degenerate training input
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            horizons: 0,
            months: None,
        }
    }

    /// Get the forecasted values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Get the number of periods forecasted
    pub fn horizons(&self) -> usize {
        self.horizons
    }

    /// Get the target months, if available
    pub fn months(&self) -> Option<&[Month]> {
        self.months.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(month, value)` pairs; empty when the result is undated
    pub fn points(&self) -> Vec<(Month, f64)> {
        match &self.months {
            Some(months) => months.iter().copied().zip(self.values.iter().copied()).collect(),
            None => Vec::new(),
        }
    }
}

/// Trained forecast model
pub trait TrainedForecastModel: Debug {
    /// Generate forecast for future periods
    fn forecast(&self, horizons: usize) -> Result<ForecastResult>;

    /// Name of the model
    fn name(&self) -> &str;
}

/// Forecast model that can be trained on time series data
pub trait ForecastModel: Debug + Clone {
    /// The type of trained model produced
    type Trained: TrainedForecastModel;

    /// Train the model on time series data
    fn train(&self, data: &TimeSeriesData) -> Result<Self::Trained>;

    /// Get the name of the model
    fn name(&self) -> &str;

    /// Short label recorded in run notes, e.g. `linear_reg_24m`
    fn label(&self, training_window: usize) -> String;
}

pub mod trend;

pub use trend::{forecast_values, Anchoring, AnchoredTrend, TrainedAnchoredTrend};
