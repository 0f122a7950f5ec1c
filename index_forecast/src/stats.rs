//! Change statistics over a series and its forecast

use crate::data::TimeSeriesData;
use index_math::{pct_change, Month};
use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};
use std::collections::BTreeMap;

/// Summary of month-over-month percent changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeStats {
    /// First month included, `None` for the whole history
    pub since: Option<Month>,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; undefined for a single change
    pub std_dev: Option<f64>,
}

/// Percent change of each month against the calendar month before it
///
/// Months whose predecessor is missing are skipped.
pub fn monthly_changes(series: &TimeSeriesData) -> Vec<(Month, f64)> {
    series
        .points()
        .windows(2)
        .filter(|pair| pair[0].month.succ() == pair[1].month)
        .filter_map(|pair| {
            pct_change(Some(pair[1].value), Some(pair[0].value)).map(|c| (pair[1].month, c))
        })
        .collect()
}

/// Mean, median and standard deviation of monthly changes from `since` on
pub fn change_stats(series: &TimeSeriesData, since: Option<Month>) -> Option<ChangeStats> {
    let changes: Vec<f64> = monthly_changes(series)
        .into_iter()
        .filter(|(month, _)| since.map_or(true, |s| *month >= s))
        .map(|(_, change)| change)
        .collect();
    if changes.is_empty() {
        return None;
    }

    let count = changes.len();
    let mean = changes.iter().mean();
    let std_dev = Some(changes.iter().std_dev()).filter(|s| s.is_finite());
    let median = Data::new(changes).median();

    Some(ChangeStats {
        since,
        count,
        mean,
        median,
        std_dev,
    })
}

/// Year-over-year percent change for each forecast month
///
/// The value twelve months earlier comes from the actuals, or from an
/// earlier forecast month when the horizon reaches past a year.
pub fn projected_yoy(actuals: &TimeSeriesData, forecast: &[(Month, f64)]) -> Vec<(Month, Option<f64>)> {
    let mut combined: BTreeMap<Month, f64> = actuals
        .points()
        .iter()
        .map(|p| (p.month, p.value))
        .collect();
    combined.extend(forecast.iter().copied());

    forecast
        .iter()
        .map(|(month, value)| {
            let prior = combined.get(&month.offset(-12)).copied();
            (*month, pct_change(Some(*value), prior))
        })
        .collect()
}
