//! Job commands run by the `index-jobs` binary
//!
//! Each command works against any [`ForecastStore`] and returns typed results;
//! printing is left to the caller.

use crate::config::{JobsConfig, SourceConfig};
use crate::{JobsError, Result};
use index_forecast::accuracy::{evaluate_backfill, BackfillAccuracy};
use index_forecast::backfill::{run_backfill_until, BackfillRequest, BackfillSummary};
use index_forecast::data::{DataLoader, SeriesId, SeriesMeta};
use index_forecast::ingest::{IngestJob, IngestSummary, PreviousVintage};
use index_forecast::metrics::RelativeMetric;
use index_forecast::models::{AnchoredTrend, ForecastModel, ForecastResult, TrainedForecastModel};
use index_forecast::queries::{group_changes, movers_table, series_with_forecast};
use index_forecast::refresh::{refresh_current_forecast, refresh_relative_metrics};
use index_forecast::runs::ForecastRun;
use index_forecast::stats::{change_stats, projected_yoy, ChangeStats};
use index_forecast::store::ForecastStore;
use index_forecast::ForecastError;
use index_math::Month;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Normalize and upsert the payload of every configured source, or of `group` only
pub fn ingest_sources<S: ForecastStore + ?Sized>(
    config: &JobsConfig,
    store: &mut S,
    group: Option<&str>,
) -> Result<Vec<IngestSummary>> {
    let mut summaries = Vec::new();
    for source in config.sources_for(group)? {
        summaries.push(ingest_source(config, source, store)?);
    }
    Ok(summaries)
}

fn ingest_source<S: ForecastStore + ?Sized>(
    config: &JobsConfig,
    source: &SourceConfig,
    store: &mut S,
) -> Result<IngestSummary> {
    let payload = source.load_payload()?;
    let previous = source.load_previous_vintage()?;
    let weights = source.load_weights()?;
    let extractor = source.family.extractor();

    let mut job = IngestJob::new(source.group.clone(), extractor.as_ref())
        .with_categories(source.categories.clone())
        .with_labels(source.labels());
    if let Some(previous) = &previous {
        job = job.with_previous_vintage(PreviousVintage {
            payload: previous,
            code: source.total_code().to_string(),
            fallback: config.forecast.splice_fallback,
        });
    }
    if let Some(weights) = &weights {
        job = job.with_weights(weights);
    }

    let summary = job.run(store, &payload)?;
    if let Some(mode) = &summary.splice {
        if mode.is_degraded() {
            tracing::warn!(group = %source.group, %mode, "previous vintage not spliced");
        } else {
            tracing::info!(group = %source.group, %mode, "previous vintage spliced");
        }
    }
    Ok(summary)
}

/// What a forecast refresh produced for one group
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub group: String,
    pub run: Option<ForecastRun>,
    /// Relative metric rows written, when the group has a configured total
    pub metrics: usize,
}

/// Refresh the current forecast and relative metrics of each group
///
/// A `group` without a configured source is still forecast over all its
/// categories; metrics need the source's total code and are skipped.
pub fn refresh_forecasts<S: ForecastStore + ?Sized>(
    config: &JobsConfig,
    store: &mut S,
    group: Option<&str>,
    horizon: Option<usize>,
    window: Option<usize>,
) -> Result<Vec<RefreshOutcome>> {
    let targets: Vec<(String, Option<&SourceConfig>)> = match group {
        Some(group) => vec![(group.to_string(), config.source(group))],
        None => config
            .sources
            .iter()
            .map(|s| (s.group.clone(), Some(s)))
            .collect(),
    };

    let mut outcomes = Vec::with_capacity(targets.len());
    for (group, source) in targets {
        let horizon = horizon.unwrap_or_else(|| config.forecast.horizon_for(&group));
        let window = window.unwrap_or(config.forecast.training_window);
        let categories = source.map(|s| s.categories.clone()).unwrap_or_default();

        let run = refresh_current_forecast(store, &group, &categories, horizon, window)?;

        let metrics = match source {
            Some(source) => match refresh_relative_metrics(store, &group, source.total_code()) {
                Ok(rows) => rows.len(),
                Err(ForecastError::DataError(reason)) => {
                    tracing::warn!(%group, %reason, "relative metrics not refreshed");
                    0
                }
                Err(err) => return Err(err.into()),
            },
            None => 0,
        };

        outcomes.push(RefreshOutcome { group, run, metrics });
    }
    Ok(outcomes)
}

/// Options of a backfill invocation; unset values come from the settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillArgs {
    pub group: String,
    pub start: Option<Month>,
    pub end: Option<Month>,
    pub horizon: Option<usize>,
    pub window: Option<usize>,
    pub categories: Vec<String>,
    pub overwrite: bool,
}

impl BackfillArgs {
    pub fn to_request(&self, config: &JobsConfig) -> BackfillRequest {
        let mut request = BackfillRequest::from_settings(self.group.clone(), &config.forecast)
            .with_range(self.start, self.end)
            .with_overwrite(self.overwrite);
        if let Some(horizon) = self.horizon {
            request = request.with_horizon(horizon);
        }
        if let Some(window) = self.window {
            request = request.with_training_window(window);
        }

        let categories = if self.categories.is_empty() {
            config
                .source(&self.group)
                .map(|s| s.categories.clone())
                .unwrap_or_default()
        } else {
            self.categories.clone()
        };
        request.with_categories(categories)
    }
}

/// Run the backfill orchestrator until done or until `cancel` is set
pub fn backfill<S: ForecastStore + ?Sized>(
    config: &JobsConfig,
    store: &mut S,
    args: &BackfillArgs,
    cancel: &AtomicBool,
) -> Result<BackfillSummary> {
    let request = args.to_request(config);
    Ok(run_backfill_until(store, &request, cancel)?)
}

/// Recompute the relative metrics of `group` and return its movers panel
///
/// Without `month` the panel is built for the newest month just computed.
pub fn movers<S: ForecastStore + ?Sized>(
    config: &JobsConfig,
    store: &mut S,
    group: &str,
    total: Option<&str>,
    month: Option<Month>,
) -> Result<Vec<RelativeMetric>> {
    let total = match total {
        Some(total) => total.to_string(),
        None => config
            .source(group)
            .map(|s| s.total_code().to_string())
            .ok_or_else(|| {
                JobsError::Config(format!("no total code given or configured for group {}", group))
            })?,
    };

    let rows = refresh_relative_metrics(store, group, &total)?;
    let month = month.or_else(|| rows.first().map(|r| r.month));
    match month {
        Some(month) => Ok(movers_table(&*store, group, Some(month), &config.forecast)?),
        None => Ok(Vec::new()),
    }
}

/// Percent change over `months` of every category of `group`, each at its
/// own latest month
pub fn changes<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    months: u32,
) -> Result<Vec<(SeriesMeta, f64)>> {
    if months == 0 {
        return Err(ForecastError::InvalidParameter("Change span must be positive".to_string()).into());
    }
    Ok(group_changes(store, group, months)?)
}

pub fn accuracy<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    category: &str,
) -> Result<BackfillAccuracy> {
    Ok(evaluate_backfill(store, group, category)?)
}

/// Change statistics of a stored series and year-over-year rates of its
/// latest current forecast
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub series_id: SeriesId,
    pub observations: usize,
    pub stats: Option<ChangeStats>,
    pub projected_yoy: Vec<(Month, Option<f64>)>,
}

pub fn stats<S: ForecastStore + ?Sized>(
    store: &S,
    series_id: &SeriesId,
    since: Option<Month>,
) -> Result<StatsReport> {
    let series = store.load_series(series_id)?;
    if series.is_empty() {
        return Err(ForecastError::DataError(format!("No observations for {}", series_id)).into());
    }

    let view = series_with_forecast(store, series_id, 0)?;
    let forecast: Vec<(Month, f64)> = view
        .forecast
        .iter()
        .map(|p| (p.month, p.predicted_value))
        .collect();

    Ok(StatsReport {
        series_id: series_id.clone(),
        observations: series.len(),
        stats: change_stats(&series, since),
        projected_yoy: projected_yoy(&series, &forecast),
    })
}

/// Forecast a standalone `month,value` CSV without touching the store
pub fn forecast_csv(path: &Path, horizon: usize, window: usize) -> Result<ForecastResult> {
    if window == 0 {
        return Err(ForecastError::InvalidParameter(
            "Training window must be positive".to_string(),
        )
        .into());
    }
    let series = DataLoader::from_csv(path)?.tail(window);
    tracing::debug!(path = %path.display(), points = series.len(), "loaded csv series");

    let model = AnchoredTrend::new();
    let trained = model.train(&series)?;
    Ok(trained.forecast(horizon)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_args_fall_back_to_settings_and_source() {
        let config = JobsConfig::from_toml_str(
            r#"
            [forecast]
            training_window = 12

            [[sources]]
            group = "WAGE"
            family = "wage"
            payload = "wages.json"
            categories = ["TOTAL", "ALM"]
            "#,
        )
        .unwrap();

        let request = BackfillArgs {
            group: "WAGE".to_string(),
            ..BackfillArgs::default()
        }
        .to_request(&config);
        assert_eq!(request.horizon, 12);
        assert_eq!(request.training_window, 12);
        assert_eq!(request.categories, vec!["TOTAL", "ALM"]);

        let request = BackfillArgs {
            group: "WAGE".to_string(),
            horizon: Some(3),
            categories: vec!["OPI".to_string()],
            ..BackfillArgs::default()
        }
        .to_request(&config);
        assert_eq!(request.horizon, 3);
        assert_eq!(request.categories, vec!["OPI"]);
    }
}
