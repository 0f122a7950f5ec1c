//! Linear trend model anchored to the last observation

use crate::data::TimeSeriesData;
use crate::error::{ForecastError, Result};
use crate::models::{ForecastModel, ForecastResult, TrainedForecastModel};
use index_math::{LinearFit, Month};

/// Whether projected values are shifted onto the last observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Anchoring {
    /// Add `y_last - fitted_last` to every projection
    #[default]
    LastObservation,
    /// Plain regression line
    Unanchored,
}

/// Least squares trend over the month index
///
/// The fitted line is evaluated at `n - 1 + h` for `h = 1..=horizon`. With
/// [`Anchoring::LastObservation`] the whole line is shifted so that it passes
/// through the last observed value, keeping the forecast continuous with the
/// latest actual.
#[derive(Debug, Clone)]
pub struct AnchoredTrend {
    /// Name of the model
    name: String,
    anchoring: Anchoring,
}

/// Trained linear trend
#[derive(Debug, Clone)]
pub struct TrainedAnchoredTrend {
    name: String,
    /// `None` when training had fewer than two points
    fit: Option<LinearFit>,
    last_month: Option<Month>,
    bias: f64,
}

impl AnchoredTrend {
    /// Trend anchored to the last observation
    pub fn new() -> Self {
        Self {
            name: "Anchored Linear Trend".to_string(),
            anchoring: Anchoring::LastObservation,
        }
    }

    /// Trend without the last-observation shift
    pub fn unanchored() -> Self {
        Self {
            name: "Linear Trend".to_string(),
            anchoring: Anchoring::Unanchored,
        }
    }

    pub fn with_anchoring(anchoring: Anchoring) -> Self {
        match anchoring {
            Anchoring::LastObservation => Self::new(),
            Anchoring::Unanchored => Self::unanchored(),
        }
    }

    pub fn anchoring(&self) -> Anchoring {
        self.anchoring
    }
}

impl Default for AnchoredTrend {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastModel for AnchoredTrend {
    type Trained = TrainedAnchoredTrend;

    fn train(&self, data: &TimeSeriesData) -> Result<Self::Trained> {
        let last = data.last();
        if data.len() < 2 {
            return Ok(TrainedAnchoredTrend {
                name: self.name.clone(),
                fit: None,
                last_month: last.map(|p| p.month),
                bias: 0.0,
            });
        }

        let fit = LinearFit::fit(&data.values())?;
        let bias = match (self.anchoring, last) {
            (Anchoring::LastObservation, Some(last)) => last.value - fit.fitted_last(),
            _ => 0.0,
        };

        Ok(TrainedAnchoredTrend {
            name: self.name.clone(),
            fit: Some(fit),
            last_month: last.map(|p| p.month),
            bias,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self, training_window: usize) -> String {
        match self.anchoring {
            Anchoring::LastObservation => format!("linear_reg_{}m", training_window),
            Anchoring::Unanchored => format!("linear_reg_{}m_raw", training_window),
        }
    }
}

impl TrainedAnchoredTrend {
    /// Shift applied to the regression line
    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn fit(&self) -> Option<&LinearFit> {
        self.fit.as_ref()
    }

    fn project(&self, horizons: usize) -> Vec<f64> {
        match &self.fit {
            Some(fit) => (1..=horizons).map(|h| fit.project(h) + self.bias).collect(),
            None => Vec::new(),
        }
    }
}

impl TrainedForecastModel for TrainedAnchoredTrend {
    fn forecast(&self, horizons: usize) -> Result<ForecastResult> {
        if horizons == 0 {
            return Err(ForecastError::InvalidParameter(
                "Forecast horizon must be positive".to_string(),
            ));
        }
        match (&self.fit, self.last_month) {
            (Some(_), Some(month)) => Ok(ForecastResult::dated(self.project(horizons), month)),
            _ => Ok(ForecastResult::empty()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Anchored trend forecast of an undated value sequence
///
/// Returns an empty vector for fewer than two values.
pub fn forecast_values(values: &[f64], horizon: usize) -> Result<Vec<f64>> {
    if horizon == 0 {
        return Err(ForecastError::InvalidParameter(
            "Forecast horizon must be positive".to_string(),
        ));
    }
    if values.len() < 2 {
        return Ok(Vec::new());
    }
    let fit = LinearFit::fit(values)?;
    let bias = values[values.len() - 1] - fit.fitted_last();
    Ok((1..=horizon).map(|h| fit.project(h) + bias).collect())
}
