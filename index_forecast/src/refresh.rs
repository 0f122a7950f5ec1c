//! Latest-month jobs: the current forecast and relative metrics

use crate::backfill::forecast_batch;
use crate::data::{SeriesId, SeriesMeta, TimeSeriesData};
use crate::error::{ForecastError, Result};
use crate::metrics::{relative_metrics, RelativeMetric};
use crate::models::{AnchoredTrend, ForecastModel};
use crate::runs::{ForecastRun, RunBatch, RunKind};
use crate::store::ForecastStore;
use std::collections::HashMap;

/// Fit the latest `training_window` observations of each category and store
/// one current run for `group`
///
/// The run is anchored at the newest month any category reaches; categories
/// that stop earlier are left out. A current run that already exists for the
/// same anchor is replaced in place. Returns `None` when no category has at
/// least two observations at the anchor.
pub fn refresh_current_forecast<S: ForecastStore + ?Sized>(
    store: &mut S,
    group: &str,
    categories: &[String],
    horizon: usize,
    training_window: usize,
) -> Result<Option<ForecastRun>> {
    if horizon == 0 || training_window == 0 {
        return Err(ForecastError::InvalidParameter(
            "Horizon and training window must be positive".to_string(),
        ));
    }

    let codes = resolve_codes(&*store, group, categories)?;
    let mut loaded = Vec::with_capacity(codes.len());
    for code in codes {
        let series = store.load_series(&SeriesId::of(group, &code))?;
        loaded.push((code, series));
    }

    let Some(anchor) = loaded.iter().filter_map(|(_, s)| s.last()).map(|p| p.month).max() else {
        tracing::warn!(group, "no observations; current forecast not refreshed");
        return Ok(None);
    };

    let mut histories: Vec<(&str, TimeSeriesData)> = Vec::new();
    for (code, series) in &loaded {
        match series.last() {
            Some(last) if last.month == anchor && series.len() >= 2 => {
                histories.push((code.as_str(), series.tail(training_window)));
            }
            _ => tracing::warn!(group, category = %code, %anchor, "category left out of current forecast"),
        }
    }
    if histories.is_empty() {
        return Ok(None);
    }

    let model = AnchoredTrend::new();
    let batch = forecast_batch(
        &model,
        RunBatch::new(group, RunKind::Current, anchor, horizon, training_window)
            .with_notes(model.label(training_window)),
        &histories,
    )?;

    let run = match store.latest_run(group, RunKind::Current)? {
        Some(existing) if existing.anchor_month == anchor => store.replace_run(existing.run_id, &batch)?,
        _ => store.insert_run(&batch)?,
    };
    tracing::info!(group, run_id = %run.run_id, %anchor, points = batch.points.len(), "current forecast stored");
    Ok(Some(run))
}

/// Compute relative metrics of every sub-series of `group` against
/// `total_code` for the latest total month, and upsert them
///
/// Rows carry the category's weight at the group's latest weight month,
/// when weights have been ingested.
pub fn refresh_relative_metrics<S: ForecastStore + ?Sized>(
    store: &mut S,
    group: &str,
    total_code: &str,
) -> Result<Vec<RelativeMetric>> {
    let total = store.load_series(&SeriesId::of(group, total_code))?;
    if total.is_empty() {
        return Err(ForecastError::DataError(format!(
            "No observations for total series {}",
            SeriesId::of(group, total_code)
        )));
    }

    let sub_series = load_categories(&*store, group, Some(total_code))?;

    let weights: HashMap<String, f64> = store
        .latest_weights(group)?
        .into_iter()
        .map(|w| (w.code, w.weight))
        .collect();

    let mut metrics = relative_metrics(group, &total, &sub_series);
    for metric in &mut metrics {
        metric.weight = weights.get(&metric.code).copied();
    }
    store.upsert_metrics(&metrics)?;
    tracing::info!(group, rows = metrics.len(), "relative metrics stored");
    Ok(metrics)
}

/// Every category series of `group` with its label, ordered by code,
/// leaving out `exclude`
pub(crate) fn load_categories<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    exclude: Option<&str>,
) -> Result<Vec<(SeriesMeta, TimeSeriesData)>> {
    let labels: HashMap<String, String> = store
        .labels(group)?
        .into_iter()
        .map(|meta| (meta.code, meta.label))
        .collect();

    let mut categories = Vec::new();
    for id in store.list_series(group)? {
        let Some(code) = id.code() else { continue };
        if exclude == Some(code) {
            continue;
        }
        let meta = SeriesMeta::new(code, labels.get(code).map(String::as_str));
        categories.push((meta, store.load_series(&id)?));
    }
    Ok(categories)
}

fn resolve_codes<S: ForecastStore + ?Sized>(
    store: &S,
    group: &str,
    categories: &[String],
) -> Result<Vec<String>> {
    if !categories.is_empty() {
        return Ok(categories.to_vec());
    }
    Ok(store
        .list_series(group)?
        .iter()
        .filter_map(|id| id.code().map(str::to_string))
        .collect())
}
