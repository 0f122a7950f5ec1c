//! Forecast runs and their points

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use index_math::Month;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Store-assigned run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live forecast or point-in-time reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Current,
    Backfill,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Current => "current",
            RunKind::Backfill => "backfill",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current" => Ok(RunKind::Current),
            "backfill" => Ok(RunKind::Backfill),
            other => Err(ForecastError::DataError(format!("Unknown run kind: {}", other))),
        }
    }
}

/// A stored forecast run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub run_id: RunId,
    /// Source group the run covers, e.g. `CPI`
    pub group: String,
    pub kind: RunKind,
    /// Last month of data the run was allowed to see
    pub anchor_month: Month,
    pub horizon: usize,
    pub training_window: usize,
    pub created_at: DateTime<Utc>,
    pub notes: String,
}

/// One predicted value of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub run_id: RunId,
    pub category: String,
    pub month: Month,
    pub predicted_value: f64,
}

/// A predicted value not yet attached to a run
#[derive(Debug, Clone, PartialEq)]
pub struct NewForecastPoint {
    pub category: String,
    pub month: Month,
    pub predicted_value: f64,
}

/// A run and its points, ready to be written in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RunBatch {
    pub group: String,
    pub kind: RunKind,
    pub anchor_month: Month,
    pub horizon: usize,
    pub training_window: usize,
    pub created_at: DateTime<Utc>,
    pub notes: String,
    pub points: Vec<NewForecastPoint>,
}

impl RunBatch {
    pub fn new(
        group: impl Into<String>,
        kind: RunKind,
        anchor_month: Month,
        horizon: usize,
        training_window: usize,
    ) -> Self {
        Self {
            group: group.into(),
            kind,
            anchor_month,
            horizon,
            training_window,
            created_at: Utc::now(),
            notes: String::new(),
            points: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Append the forecast of one category
    pub fn push_category(&mut self, category: &str, forecast: &[(Month, f64)]) {
        self.points
            .extend(forecast.iter().map(|(month, value)| NewForecastPoint {
                category: category.to_string(),
                month: *month,
                predicted_value: *value,
            }));
    }

    /// Categories present in the batch, sorted
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.points.iter().map(|p| p.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }

    /// Check every category holds exactly `horizon` points for the months
    /// `anchor + 1 ..= anchor + horizon`
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "Run horizon must be positive".to_string(),
            ));
        }
        if self.group.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "Run group must not be empty".to_string(),
            ));
        }

        let mut by_category: BTreeMap<&str, Vec<Month>> = BTreeMap::new();
        for point in &self.points {
            if !point.predicted_value.is_finite() {
                return Err(ForecastError::ValidationError(format!(
                    "Non-finite prediction for {} at {}",
                    point.category, point.month
                )));
            }
            by_category
                .entry(point.category.as_str())
                .or_default()
                .push(point.month);
        }

        let expected: Vec<Month> = (1..=self.horizon as i64)
            .map(|h| self.anchor_month.offset(h))
            .collect();
        for (category, months) in by_category {
            if months != expected {
                return Err(ForecastError::ValidationError(format!(
                    "Category {} of run {} at {} does not cover {} consecutive months after the anchor",
                    category, self.group, self.anchor_month, self.horizon
                )));
            }
        }
        Ok(())
    }

    /// Check the batch describes the same run as `stored`, so its points can
    /// sit next to the points already stored there
    pub fn check_mergeable(&self, stored: &ForecastRun) -> Result<()> {
        let same = self.group == stored.group
            && self.kind == stored.kind
            && self.anchor_month == stored.anchor_month
            && self.horizon == stored.horizon
            && self.training_window == stored.training_window;
        if same {
            return Ok(());
        }
        Err(ForecastError::ValidationError(format!(
            "Run {} ({} {} at {}, horizon {}, window {}) cannot take points forecast with horizon {} and window {}",
            stored.run_id,
            stored.kind,
            stored.group,
            stored.anchor_month,
            stored.horizon,
            stored.training_window,
            self.horizon,
            self.training_window
        )))
    }

    /// The stored run this batch becomes under `run_id`
    pub fn to_run(&self, run_id: RunId) -> ForecastRun {
        ForecastRun {
            run_id,
            group: self.group.clone(),
            kind: self.kind,
            anchor_month: self.anchor_month,
            horizon: self.horizon,
            training_window: self.training_window,
            created_at: self.created_at,
            notes: self.notes.clone(),
        }
    }

    pub fn to_points(&self, run_id: RunId) -> Vec<ForecastPoint> {
        self.points
            .iter()
            .map(|p| ForecastPoint {
                run_id,
                category: p.category.clone(),
                month: p.month,
                predicted_value: p.predicted_value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn validate_accepts_contiguous_points() {
        let mut batch = RunBatch::new("CPI", RunKind::Backfill, m("2020-06"), 2, 24);
        batch.push_category("IS00", &[(m("2020-07"), 1.0), (m("2020-08"), 2.0)]);
        batch.push_category("IS01", &[(m("2020-07"), 3.0), (m("2020-08"), 4.0)]);
        assert!(batch.validate().is_ok());
        assert_eq!(batch.categories(), vec!["IS00", "IS01"]);
    }

    #[test]
    fn validate_rejects_gaps_and_short_runs() {
        let mut batch = RunBatch::new("CPI", RunKind::Backfill, m("2020-06"), 2, 24);
        batch.push_category("IS00", &[(m("2020-07"), 1.0)]);
        assert!(batch.validate().is_err());

        let mut batch = RunBatch::new("CPI", RunKind::Backfill, m("2020-06"), 2, 24);
        batch.push_category("IS00", &[(m("2020-08"), 1.0), (m("2020-09"), 2.0)]);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn mergeable_only_into_the_same_run_shape() {
        let batch = RunBatch::new("CPI", RunKind::Backfill, m("2020-06"), 2, 24);
        let stored = batch.to_run(RunId(7));
        assert!(batch.check_mergeable(&stored).is_ok());

        let wider = RunBatch::new("CPI", RunKind::Backfill, m("2020-06"), 2, 12);
        assert!(matches!(
            wider.check_mergeable(&stored),
            Err(ForecastError::ValidationError(_))
        ));
        let other_anchor = RunBatch::new("CPI", RunKind::Backfill, m("2020-07"), 2, 24);
        assert!(other_anchor.check_mergeable(&stored).is_err());
    }

    #[test]
    fn run_kind_round_trips_through_text() {
        for kind in [RunKind::Current, RunKind::Backfill] {
            assert_eq!(kind.as_str().parse::<RunKind>().unwrap(), kind);
        }
        assert!("weekly".parse::<RunKind>().is_err());
    }
}
