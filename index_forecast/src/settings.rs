//! Forecast and metrics settings

use crate::error::{ForecastError, Result};
use crate::splice::SpliceFallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tunables shared by the forecasting jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Horizon for groups without an entry in `horizons`
    pub default_horizon: usize,
    /// Per-group horizon overrides
    pub horizons: BTreeMap<String, usize>,
    /// Trailing observations used to fit the trend
    pub training_window: usize,
    /// Codes always shown first in the movers panel
    pub curated_codes: Vec<String>,
    pub top_k_movers: usize,
    pub splice_fallback: SpliceFallback,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            default_horizon: 6,
            horizons: BTreeMap::from([("CPI".to_string(), 6), ("WAGE".to_string(), 12)]),
            training_window: 24,
            curated_codes: Vec::new(),
            top_k_movers: 6,
            splice_fallback: SpliceFallback::default(),
        }
    }
}

impl ForecastSettings {
    /// Horizon for `group`
    pub fn horizon_for(&self, group: &str) -> usize {
        self.horizons
            .get(group)
            .copied()
            .unwrap_or(self.default_horizon)
    }

    /// Reject settings no job could run with
    pub fn validate(&self) -> Result<()> {
        if self.default_horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "default_horizon must be positive".to_string(),
            ));
        }
        if let Some((group, _)) = self.horizons.iter().find(|(_, h)| **h == 0) {
            return Err(ForecastError::InvalidParameter(format!(
                "horizon for {} must be positive",
                group
            )));
        }
        if self.training_window == 0 {
            return Err(ForecastError::InvalidParameter(
                "training_window must be positive".to_string(),
            ));
        }
        if self.top_k_movers == 0 {
            return Err(ForecastError::InvalidParameter(
                "top_k_movers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
