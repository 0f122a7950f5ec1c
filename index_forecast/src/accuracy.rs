//! Accuracy of stored forecasts against the actuals known now

use crate::data::SeriesId;
use crate::error::{ForecastError, Result};
use crate::runs::{RunId, RunKind};
use crate::store::ForecastStore;
use index_math::Month;
use serde::Serialize;
use std::fmt;

/// Calculate forecast accuracy metrics
pub fn forecast_accuracy(forecast: &[f64], actual: &[f64]) -> Result<ForecastAccuracy> {
    if forecast.len() != actual.len() || forecast.is_empty() {
        return Err(ForecastError::ValidationError(
            "Forecast and actual values must have the same non-zero length".to_string(),
        ));
    }

    let n = forecast.len() as f64;

    let errors: Vec<f64> = forecast
        .iter()
        .zip(actual.iter())
        .map(|(&f, &a)| a - f)
        .collect();

    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;
    let rmse = mse.sqrt();

    // Zero actuals are left out of the percentage error
    let pct_errors: Vec<f64> = actual
        .iter()
        .zip(errors.iter())
        .filter(|(&a, _)| a != 0.0)
        .map(|(&a, &e)| (e.abs() / a.abs()) * 100.0)
        .collect();
    let mape = if pct_errors.is_empty() {
        None
    } else {
        Some(pct_errors.iter().sum::<f64>() / pct_errors.len() as f64)
    };

    let smape = actual
        .iter()
        .zip(forecast.iter())
        .map(|(&a, &f)| {
            let denom = a.abs() + f.abs();
            if denom == 0.0 {
                0.0
            } else {
                200.0 * (a - f).abs() / denom
            }
        })
        .sum::<f64>()
        / n;

    Ok(ForecastAccuracy {
        mae,
        mse,
        rmse,
        mape,
        smape,
    })
}

/// Forecast accuracy metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastAccuracy {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error, undefined when every actual is zero
    pub mape: Option<f64>,
    /// Symmetric Mean Absolute Percentage Error
    pub smape: f64,
}

impl fmt::Display for ForecastAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.4}, MSE: {:.4}, RMSE: {:.4}, ",
            self.mae, self.mse, self.rmse
        )?;
        match self.mape {
            Some(mape) => write!(f, "MAPE: {:.2}%, ", mape)?,
            None => f.write_str("MAPE: n/a, ")?,
        }
        write!(f, "SMAPE: {:.2}%", self.smape)
    }
}

/// Accuracy of one backfill run for one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorAccuracy {
    pub run_id: RunId,
    pub anchor_month: Month,
    /// Predicted months that have an actual
    pub matched: usize,
    pub accuracy: ForecastAccuracy,
}

/// Per-anchor accuracy rows and the accuracy over all matched months
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillAccuracy {
    pub series_id: SeriesId,
    pub rows: Vec<AnchorAccuracy>,
    pub overall: Option<ForecastAccuracy>,
}

/// Compare every backfill run of `group` for `category` with the stored actuals
///
/// Runs whose predicted months have no actuals yet are left out.
pub fn evaluate_backfill<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    category: &str,
) -> Result<BackfillAccuracy> {
    let series_id = SeriesId::of(group, category);
    let actuals = store.load_series(&series_id)?;

    let mut rows = Vec::new();
    let mut all_forecast = Vec::new();
    let mut all_actual = Vec::new();

    for run in store.runs(group, RunKind::Backfill)? {
        let (forecast, actual): (Vec<f64>, Vec<f64>) = store
            .run_points(run.run_id)?
            .iter()
            .filter(|p| p.category == category)
            .filter_map(|p| actuals.value_at(p.month).map(|a| (p.predicted_value, a)))
            .unzip();
        if forecast.is_empty() {
            continue;
        }

        let accuracy = forecast_accuracy(&forecast, &actual)?;
        all_forecast.extend_from_slice(&forecast);
        all_actual.extend_from_slice(&actual);
        rows.push(AnchorAccuracy {
            run_id: run.run_id,
            anchor_month: run.anchor_month,
            matched: forecast.len(),
            accuracy,
        });
    }

    let overall = if all_forecast.is_empty() {
        None
    } else {
        Some(forecast_accuracy(&all_forecast, &all_actual)?)
    };

    Ok(BackfillAccuracy {
        series_id,
        rows,
        overall,
    })
}
