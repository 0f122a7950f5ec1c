//! Read-only projections over stored series, runs and metrics

use crate::data::{SeriesId, SeriesMeta, SeriesPoint, TimeSeriesData};
use crate::error::Result;
use crate::metrics::{changes_over_months, movers_panel, RelativeMetric};
use crate::refresh::load_categories;
use crate::runs::{ForecastPoint, ForecastRun, RunKind};
use crate::settings::ForecastSettings;
use crate::store::ForecastStore;
use index_math::Month;
use serde::Serialize;

/// Recent history of a series with its latest current forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesWithForecast {
    pub series_id: SeriesId,
    pub history: Vec<SeriesPoint>,
    pub run: Option<ForecastRun>,
    pub forecast: Vec<ForecastPoint>,
}

/// The last `months` observations of `series_id` plus the newest current run
/// of its group, restricted to the series' category
pub fn series_with_forecast<S: ForecastStore + ?Sized>(
    store: &S,
    series_id: &SeriesId,
    months: usize,
) -> Result<SeriesWithForecast> {
    let history = store.load_series(series_id)?.tail(months);
    let run = store.latest_run(series_id.group(), RunKind::Current)?;
    let forecast = match (&run, series_id.code()) {
        (Some(run), Some(code)) => store
            .run_points(run.run_id)?
            .into_iter()
            .filter(|p| p.category == code)
            .collect(),
        _ => Vec::new(),
    };

    Ok(SeriesWithForecast {
        series_id: series_id.clone(),
        history: history.points().to_vec(),
        run,
        forecast,
    })
}

/// Values of `series` on each month of `axis`, `None` where unobserved
pub fn aligned_history(series: &TimeSeriesData, axis: &[Month]) -> Vec<Option<f64>> {
    axis.iter().map(|month| series.value_at(*month)).collect()
}

/// Movers panel of `group` for `month`, or for the group's latest month
/// with metric rows
pub fn movers_table<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    month: Option<Month>,
    settings: &ForecastSettings,
) -> Result<Vec<RelativeMetric>> {
    let month = match month {
        Some(month) => month,
        None => match store.latest_metrics_month(group)? {
            Some(month) => month,
            None => return Ok(Vec::new()),
        },
    };
    let metrics = store.metrics_for_month(group, month)?;
    Ok(movers_panel(
        &metrics,
        &settings.curated_codes,
        settings.top_k_movers,
    ))
}

/// Percent change over `months` of every category of `group`, each at its
/// own latest month, ordered by code
///
/// Categories without a value `months` before their latest month are left out.
pub fn group_changes<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    months: u32,
) -> Result<Vec<(SeriesMeta, f64)>> {
    let sub_series = load_categories(store, group, None)?;
    let changes = changes_over_months(&sub_series, months);
    Ok(sub_series
        .into_iter()
        .filter_map(|(meta, _)| {
            let pct = changes.get(&meta.code).copied()?;
            Some((meta, pct))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_history_marks_gaps() {
        let m = |s: &str| s.parse::<Month>().unwrap();
        let series = TimeSeriesData::new(vec![(m("2024-01"), 1.0), (m("2024-03"), 3.0)]).unwrap();
        let axis: Vec<Month> = m("2024-01").through(m("2024-04")).collect();
        assert_eq!(
            aligned_history(&series, &axis),
            vec![Some(1.0), None, Some(3.0), None]
        );
    }
}
