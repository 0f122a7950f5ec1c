//! Monthly series data handling

use crate::error::{ForecastError, Result};
use index_math::Month;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Identifier of one logical series, e.g. `CPI:IS00` or `WAGE:TOTAL`
///
/// Series belonging to one source table share a group prefix; the part after
/// the first `:` is the category code inside that table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(String);

impl SeriesId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Series id of category `code` within `group`
    pub fn of(group: &str, code: &str) -> Self {
        Self(format!("{}:{}", group, code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The group prefix (the whole id when there is no category part)
    pub fn group(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(g, _)| g)
    }

    /// The category code, if the id has one
    pub fn code(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, c)| c)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category code and human label of a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub code: String,
    pub label: String,
}

impl SeriesMeta {
    /// Label falls back to the code when none is known
    pub fn new(code: impl Into<String>, label: Option<&str>) -> Self {
        let code = code.into();
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map_or_else(|| code.clone(), str::to_string);
        Self { code, label }
    }
}

/// Basket weight of one category, as published for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeight {
    pub code: String,
    pub month: Month,
    pub weight: f64,
}

/// One series value for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub series_id: SeriesId,
    pub month: Month,
    pub value: f64,
}

/// A single `(month, value)` pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub month: Month,
    pub value: f64,
}

/// Canonical monthly series: strictly ascending months, finite values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesData {
    points: Vec<SeriesPoint>,
}

impl TimeSeriesData {
    /// Create from points that are already strictly ascending by month
    pub fn new(points: Vec<(Month, f64)>) -> Result<Self> {
        for pair in points.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(ForecastError::ValidationError(format!(
                    "Months must be strictly ascending: {} followed by {}",
                    pair[0].0, pair[1].0
                )));
            }
        }
        if let Some((month, _)) = points.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ForecastError::DataError(format!(
                "Non-finite value at {}",
                month
            )));
        }

        Ok(Self {
            points: points
                .into_iter()
                .map(|(month, value)| SeriesPoint { month, value })
                .collect(),
        })
    }

    /// Sort and deduplicate in input order; the last value for a month wins.
    /// Non-finite values are dropped. Returns the series and the number of
    /// duplicate months that were overwritten.
    pub fn from_unordered(points: impl IntoIterator<Item = (Month, f64)>) -> (Self, usize) {
        let mut by_month = BTreeMap::new();
        let mut duplicates = 0;
        for (month, value) in points {
            if !value.is_finite() {
                continue;
            }
            if by_month.insert(month, value).is_some() {
                duplicates += 1;
            }
        }
        let points = by_month
            .into_iter()
            .map(|(month, value)| SeriesPoint { month, value })
            .collect();
        (Self { points }, duplicates)
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn months(&self) -> Vec<Month> {
        self.points.iter().map(|p| p.month).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn first(&self) -> Option<SeriesPoint> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<SeriesPoint> {
        self.points.last().copied()
    }

    /// Value observed in `month`, if any
    pub fn value_at(&self, month: Month) -> Option<f64> {
        self.points
            .binary_search_by(|p| p.month.cmp(&month))
            .ok()
            .map(|i| self.points[i].value)
    }

    /// Observations dated at or before `month`
    pub fn up_to(&self, month: Month) -> Self {
        let end = self.points.partition_point(|p| p.month <= month);
        Self {
            points: self.points[..end].to_vec(),
        }
    }

    /// Observations dated at or after `month`
    pub fn since(&self, month: Month) -> Self {
        let start = self.points.partition_point(|p| p.month < month);
        Self {
            points: self.points[start..].to_vec(),
        }
    }

    /// The most recent `n` observations
    pub fn tail(&self, n: usize) -> Self {
        let start = self.points.len().saturating_sub(n);
        Self {
            points: self.points[start..].to_vec(),
        }
    }

    /// Check if the time series is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get the length of the time series
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    month: String,
    value: String,
}

/// Data loader for monthly series
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load a `month,value` CSV file.
    ///
    /// Rows with an unparsable month or a missing value are skipped; a file
    /// without `month` and `value` headers is an error.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<TimeSeriesData> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load `month,value` CSV rows from any reader
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<TimeSeriesData> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        for required in ["month", "value"] {
            if !headers.iter().any(|h| h == required) {
                return Err(ForecastError::DataError(format!(
                    "CSV is missing the '{}' column",
                    required
                )));
            }
        }

        let mut points = Vec::new();
        for row in csv_reader.deserialize::<CsvRow>() {
            let row = row?;
            let Ok(month) = row.month.parse::<Month>() else {
                continue;
            };
            let Ok(value) = row.value.parse::<f64>() else {
                continue;
            };
            points.push((month, value));
        }

        let (series, duplicates) = TimeSeriesData::from_unordered(points);
        if duplicates > 0 {
            tracing::debug!(duplicates, "CSV contained repeated months; last row wins");
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn series_id_parts() {
        let id = SeriesId::of("WAGE", "TOTAL");
        assert_eq!(id.as_str(), "WAGE:TOTAL");
        assert_eq!(id.group(), "WAGE");
        assert_eq!(id.code(), Some("TOTAL"));

        let bare = SeriesId::new("CPI");
        assert_eq!(bare.group(), "CPI");
        assert_eq!(bare.code(), None);
    }

    #[test]
    fn label_falls_back_to_code() {
        assert_eq!(SeriesMeta::new("IS01", None).label, "IS01");
        assert_eq!(SeriesMeta::new("IS01", Some("  ")).label, "IS01");
        assert_eq!(SeriesMeta::new("IS01", Some("Food")).label, "Food");
    }

    #[test]
    fn new_rejects_unordered_months() {
        let result = TimeSeriesData::new(vec![(m("2020-02"), 1.0), (m("2020-01"), 2.0)]);
        assert!(matches!(result, Err(ForecastError::ValidationError(_))));

        let result = TimeSeriesData::new(vec![(m("2020-01"), 1.0), (m("2020-01"), 2.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn unordered_input_last_occurrence_wins() {
        let (series, duplicates) = TimeSeriesData::from_unordered(vec![
            (m("2020-03"), 3.0),
            (m("2020-01"), 1.0),
            (m("2020-03"), 30.0),
            (m("2020-02"), f64::NAN),
        ]);
        assert_eq!(duplicates, 1);
        assert_eq!(series.months(), vec![m("2020-01"), m("2020-03")]);
        assert_eq!(series.value_at(m("2020-03")), Some(30.0));
        assert_eq!(series.value_at(m("2020-02")), None);
    }

    #[test]
    fn point_in_time_slicing() {
        let series = TimeSeriesData::new(
            (1..=6).map(|i| (m(&format!("2020-{:02}", i)), i as f64)).collect(),
        )
        .unwrap();

        assert_eq!(series.up_to(m("2020-03")).values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(series.up_to(m("2019-12")).len(), 0);
        assert_eq!(series.since(m("2020-05")).values(), vec![5.0, 6.0]);
        assert_eq!(series.tail(2).values(), vec![5.0, 6.0]);
        assert_eq!(series.tail(10).len(), 6);
    }
}
