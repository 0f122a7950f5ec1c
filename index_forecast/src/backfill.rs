//! Point-in-time backfill of forecast runs
//!
//! Replays the trend forecast over a range of historical anchor months, so
//! that each stored run shows what the forecast would have been had it been
//! computed at that month. Only observations dated at or before the anchor
//! are visible to its run.
//!
//! A group has at most one backfill run per anchor month, holding the points
//! of every category backfilled there. Categories are decided one by one:
//! without `overwrite` only categories the run does not hold yet are
//! computed and added, with `overwrite` the requested categories are replaced
//! and the others are kept.
//!
//! Each anchor month is committed on its own. A backfill interrupted partway
//! leaves every earlier anchor complete, and running the same range again
//! without `overwrite` skips them.

use crate::data::{SeriesId, TimeSeriesData};
use crate::error::{ForecastError, Result};
use crate::models::{Anchoring, AnchoredTrend, ForecastModel, TrainedForecastModel};
use crate::runs::{ForecastRun, RunBatch, RunId, RunKind};
use crate::settings::ForecastSettings;
use crate::store::ForecastStore;
use index_math::Month;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// What to backfill and how
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillRequest {
    pub group: String,
    /// Category codes; empty means every series stored under the group
    pub categories: Vec<String>,
    /// First anchor month; defaults to the first month with a full window
    pub start: Option<Month>,
    /// Last anchor month; defaults to the latest observation
    pub end: Option<Month>,
    pub horizon: usize,
    pub training_window: usize,
    /// Recompute anchors that already have a run
    pub overwrite: bool,
    pub anchoring: Anchoring,
}

impl BackfillRequest {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            categories: Vec::new(),
            start: None,
            end: None,
            horizon: 6,
            training_window: 24,
            overwrite: false,
            anchoring: Anchoring::default(),
        }
    }

    /// Request using the horizon and window configured for `group`
    pub fn from_settings(group: impl Into<String>, settings: &ForecastSettings) -> Self {
        let group = group.into();
        let horizon = settings.horizon_for(&group);
        Self {
            horizon,
            training_window: settings.training_window,
            ..Self::new(group)
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_range(mut self, start: Option<Month>, end: Option<Month>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_training_window(mut self, training_window: usize) -> Self {
        self.training_window = training_window;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_anchoring(mut self, anchoring: Anchoring) -> Self {
        self.anchoring = anchoring;
        self
    }

    /// Fail fast on parameters no anchor could run with
    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(ForecastError::InvalidParameter(
                "Backfill group must not be empty".to_string(),
            ));
        }
        if self.horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "Backfill horizon must be positive".to_string(),
            ));
        }
        if self.training_window == 0 {
            return Err(ForecastError::InvalidParameter(
                "Training window must be positive".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ForecastError::InvalidParameter(format!(
                    "Backfill start {} is after end {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// Result of processing one anchor month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    /// A new run was written
    Computed(RunId),
    /// Categories missing from an existing run were added to it
    Extended(RunId),
    /// The requested categories of an existing run were replaced
    Recomputed(RunId),
    /// The existing run already held every eligible category
    Skipped(RunId),
    /// No category had enough history at or before the anchor.
    ///
    /// Also covers a category with a gap at the anchor month itself: its
    /// history must reach the anchor to be forecast from there.
    InsufficientData,
}

/// Counts reported at the end of a backfill
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub anchors_visited: usize,
    pub runs_created: usize,
    pub runs_extended: usize,
    pub runs_replaced: usize,
    pub runs_skipped: usize,
    pub insufficient_data: usize,
    pub points_written: usize,
    /// Stopped early by a cancellation request
    pub cancelled: bool,
}

impl BackfillSummary {
    fn record(&mut self, outcome: CellOutcome, points: usize) {
        self.anchors_visited += 1;
        self.points_written += points;
        match outcome {
            CellOutcome::Computed(_) => self.runs_created += 1,
            CellOutcome::Extended(_) => self.runs_extended += 1,
            CellOutcome::Recomputed(_) => self.runs_replaced += 1,
            CellOutcome::Skipped(_) => self.runs_skipped += 1,
            CellOutcome::InsufficientData => self.insufficient_data += 1,
        }
    }
}

impl fmt::Display for BackfillSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "anchors: {}, created: {}, extended: {}, replaced: {}, skipped: {}, insufficient data: {}, points: {}",
            self.anchors_visited,
            self.runs_created,
            self.runs_extended,
            self.runs_replaced,
            self.runs_skipped,
            self.insufficient_data,
            self.points_written
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// A validated request with its series loaded and its anchor range resolved
#[derive(Debug, Clone)]
pub struct BackfillPlan {
    group: String,
    series: Vec<(String, TimeSeriesData)>,
    range: Option<(Month, Month)>,
    horizon: usize,
    training_window: usize,
    overwrite: bool,
    model: AnchoredTrend,
}

impl BackfillPlan {
    /// Validate `request` and load its series from `store`
    pub fn prepare<S: ForecastStore + ?Sized>(store: &S, request: &BackfillRequest) -> Result<Self> {
        request.validate()?;

        let codes: Vec<String> = if request.categories.is_empty() {
            store
                .list_series(&request.group)?
                .iter()
                .filter_map(|id| id.code().map(str::to_string))
                .collect()
        } else {
            request.categories.clone()
        };

        let mut series = Vec::with_capacity(codes.len());
        for code in codes {
            let data = store.load_series(&SeriesId::of(&request.group, &code))?;
            if data.is_empty() {
                tracing::warn!(group = %request.group, category = %code, "no observations for category");
            }
            series.push((code, data));
        }

        let first = series.iter().filter_map(|(_, s)| s.first()).map(|p| p.month).min();
        let last = series.iter().filter_map(|(_, s)| s.last()).map(|p| p.month).max();
        let start = request
            .start
            .or_else(|| first.map(|m| m.offset(request.training_window as i64 - 1)));
        let end = request.end.or(last);
        let range = match (start, end) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        };

        Ok(Self {
            group: request.group.clone(),
            series,
            range,
            horizon: request.horizon,
            training_window: request.training_window,
            overwrite: request.overwrite,
            model: AnchoredTrend::with_anchoring(request.anchoring),
        })
    }

    /// Anchor months in ascending order
    pub fn anchors(&self) -> Vec<Month> {
        match self.range {
            Some((start, end)) => start.through(end).collect(),
            None => Vec::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Training data of every category eligible at `anchor`
    ///
    /// A category is eligible when it has an observation in the anchor month
    /// and at least `max(2, training_window)` observations up to it. The
    /// result holds only the trailing `training_window` observations.
    pub fn eligible_histories(&self, anchor: Month) -> Vec<(&str, TimeSeriesData)> {
        let required = self.training_window.max(2);
        self.series
            .iter()
            .filter_map(|(code, series)| {
                let history = series.up_to(anchor);
                let observed_at_anchor = history.last().is_some_and(|p| p.month == anchor);
                (observed_at_anchor && history.len() >= required)
                    .then(|| (code.as_str(), history.tail(self.training_window)))
            })
            .collect()
    }

    /// Process one anchor month against `store`, returning the outcome and
    /// the number of points written
    pub fn run_cell<S: ForecastStore + ?Sized>(
        &self,
        store: &mut S,
        anchor: Month,
    ) -> Result<(CellOutcome, usize)> {
        let histories = self.eligible_histories(anchor);
        if histories.is_empty() {
            return Ok((CellOutcome::InsufficientData, 0));
        }

        if let Some(run) = store.find_backfill_run(&self.group, anchor)? {
            return self.update_run(store, &run, histories);
        }

        let batch = self.batch(anchor, &histories)?;
        let points = batch.points.len();
        match store.insert_run(&batch) {
            Ok(run) => Ok((CellOutcome::Computed(run.run_id), points)),
            Err(ForecastError::Conflict(message)) => {
                // Another writer created the run first
                match store.find_backfill_run(&self.group, anchor)? {
                    Some(run) => {
                        tracing::debug!(%anchor, %message, "run appeared concurrently");
                        self.update_run(store, &run, histories)
                    }
                    None => Err(ForecastError::Conflict(message)),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Add or replace categories of the run already stored for an anchor
    fn update_run<S: ForecastStore + ?Sized>(
        &self,
        store: &mut S,
        run: &ForecastRun,
        histories: Vec<(&str, TimeSeriesData)>,
    ) -> Result<(CellOutcome, usize)> {
        let stored = store.run_categories(run.run_id)?;
        let histories: Vec<(&str, TimeSeriesData)> = if self.overwrite {
            histories
        } else {
            histories
                .into_iter()
                .filter(|(code, _)| !stored.iter().any(|s| s == code))
                .collect()
        };
        if histories.is_empty() {
            return Ok((CellOutcome::Skipped(run.run_id), 0));
        }

        let batch = self.batch(run.anchor_month, &histories)?;
        let points = batch.points.len();
        let covered = batch.categories();
        let replaces_all = stored.iter().all(|s| covered.contains(&s.as_str()));
        let reshaped = batch.check_mergeable(run).is_err();

        let updated = if replaces_all {
            store.replace_run(run.run_id, &batch)?
        } else if reshaped && !self.overwrite {
            tracing::warn!(
                group = %self.group,
                anchor = %run.anchor_month,
                run_id = %run.run_id,
                "stored run has another horizon or window; new categories not added"
            );
            return Ok((CellOutcome::Skipped(run.run_id), 0));
        } else {
            store.merge_run_points(run.run_id, &batch)?
        };

        let outcome = if self.overwrite {
            CellOutcome::Recomputed(updated.run_id)
        } else {
            CellOutcome::Extended(updated.run_id)
        };
        Ok((outcome, points))
    }

    fn batch(&self, anchor: Month, histories: &[(&str, TimeSeriesData)]) -> Result<RunBatch> {
        let notes = format!(
            "backfill:{}:{}:{}",
            self.group,
            anchor,
            self.model.label(self.training_window)
        );
        forecast_batch(
            &self.model,
            RunBatch::new(
                &self.group,
                RunKind::Backfill,
                anchor,
                self.horizon,
                self.training_window,
            )
            .with_notes(notes),
            histories,
        )
    }
}

/// Fit `model` to each history and collect the forecasts into `batch`
pub(crate) fn forecast_batch(
    model: &AnchoredTrend,
    mut batch: RunBatch,
    histories: &[(&str, TimeSeriesData)],
) -> Result<RunBatch> {
    for (code, history) in histories {
        let forecast = model.train(history)?.forecast(batch.horizon)?;
        batch.push_category(code, &forecast.points());
    }
    Ok(batch)
}

/// Backfill every anchor month of `request`
pub fn run_backfill<S: ForecastStore + ?Sized>(
    store: &mut S,
    request: &BackfillRequest,
) -> Result<BackfillSummary> {
    run_backfill_until(store, request, &AtomicBool::new(false))
}

/// Backfill until done or until `cancel` is set
///
/// The flag is checked before each anchor month, so cancellation never
/// interrupts a month that has started.
pub fn run_backfill_until<S: ForecastStore + ?Sized>(
    store: &mut S,
    request: &BackfillRequest,
    cancel: &AtomicBool,
) -> Result<BackfillSummary> {
    let plan = BackfillPlan::prepare(&*store, request)?;
    let anchors = plan.anchors();
    if anchors.is_empty() {
        tracing::warn!(group = %plan.group, "no anchor months to backfill");
    }

    let mut summary = BackfillSummary::default();
    for anchor in anchors {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            tracing::info!(group = %plan.group, %anchor, "backfill cancelled");
            break;
        }
        let (outcome, points) = plan.run_cell(store, anchor)?;
        tracing::debug!(group = %plan.group, %anchor, ?outcome, points, "anchor processed");
        summary.record(outcome, points);
    }

    tracing::info!(
        group = %plan.group,
        created = summary.runs_created,
        extended = summary.runs_extended,
        replaced = summary.runs_replaced,
        skipped = summary.runs_skipped,
        insufficient = summary.insufficient_data,
        points = summary.points_written,
        "backfill finished"
    );
    Ok(summary)
}
