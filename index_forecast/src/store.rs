//! Persistence boundary for observations and derived rows
//!
//! Observations are the ground truth; runs, points and metric rows are
//! derived and may be dropped and rebuilt at any time. Every method that
//! writes is expected to commit atomically on its own, so callers get
//! per-call durability without holding a transaction open.

use crate::data::{CategoryWeight, Observation, SeriesId, SeriesMeta, TimeSeriesData};
use crate::error::{ForecastError, Result};
use crate::metrics::RelativeMetric;
use crate::runs::{ForecastPoint, ForecastRun, RunBatch, RunId, RunKind};
use index_math::Month;
use std::collections::{BTreeMap, HashMap};

/// Storage operations the forecasting jobs rely on
pub trait ForecastStore {
    /// Insert or replace observations keyed by `(series_id, month)`
    fn upsert_observations(&mut self, observations: &[Observation]) -> Result<usize>;

    /// All observations of one series, ascending by month
    fn load_series(&self, series_id: &SeriesId) -> Result<TimeSeriesData>;

    /// Series ids stored under `group`, sorted
    fn list_series(&self, group: &str) -> Result<Vec<SeriesId>>;

    /// Insert or replace labels of the categories of `group`
    fn upsert_labels(&mut self, group: &str, labels: &[SeriesMeta]) -> Result<usize>;

    /// Labels of the categories of `group`, sorted by code
    fn labels(&self, group: &str) -> Result<Vec<SeriesMeta>>;

    /// The backfill run of `group` anchored at `anchor`, if one exists
    fn find_backfill_run(&self, group: &str, anchor: Month) -> Result<Option<ForecastRun>>;

    /// Write a run and its points in one transaction.
    ///
    /// A backfill batch whose `(group, anchor_month)` already has a run
    /// fails with [`ForecastError::Conflict`] and writes nothing.
    fn insert_run(&mut self, batch: &RunBatch) -> Result<ForecastRun>;

    /// Delete the points of `run_id`, update its metadata from `batch` and
    /// write the new points, all in one transaction. The run keeps its id.
    fn replace_run(&mut self, run_id: RunId, batch: &RunBatch) -> Result<ForecastRun>;

    /// Replace only the points of the categories present in `batch`, keeping
    /// every other category of the run, and refresh the run's `created_at`
    /// and `notes`. One transaction; the run keeps its id.
    ///
    /// Fails with [`ForecastError::ValidationError`] when the batch's group,
    /// kind, anchor, horizon or training window differ from the stored run.
    fn merge_run_points(&mut self, run_id: RunId, batch: &RunBatch) -> Result<ForecastRun>;

    /// Delete a run together with its points; `false` if it did not exist
    fn delete_run(&mut self, run_id: RunId) -> Result<bool>;

    /// Runs of `group` and `kind`, ascending by anchor month then id
    fn runs(&self, group: &str, kind: RunKind) -> Result<Vec<ForecastRun>>;

    /// Points of a run, ordered by category then month
    fn run_points(&self, run_id: RunId) -> Result<Vec<ForecastPoint>>;

    /// Categories with points in a run, sorted
    fn run_categories(&self, run_id: RunId) -> Result<Vec<String>> {
        let mut categories: Vec<String> = self
            .run_points(run_id)?
            .into_iter()
            .map(|p| p.category)
            .collect();
        categories.sort_unstable();
        categories.dedup();
        Ok(categories)
    }

    /// Insert or replace metric rows keyed by `(group, month, code)`
    fn upsert_metrics(&mut self, metrics: &[RelativeMetric]) -> Result<usize>;

    /// Metric rows of `group` for one month, ordered by code
    fn metrics_for_month(&self, group: &str, month: Month) -> Result<Vec<RelativeMetric>>;

    /// The most recent month with metric rows for `group`
    fn latest_metrics_month(&self, group: &str) -> Result<Option<Month>>;

    /// Insert or replace category weights of `group` keyed by `(code, month)`
    fn upsert_weights(&mut self, group: &str, weights: &[CategoryWeight]) -> Result<usize>;

    /// Weights of `group` at its most recent weight month, sorted by code
    fn latest_weights(&self, group: &str) -> Result<Vec<CategoryWeight>>;

    /// The most recent run of `group` and `kind`
    fn latest_run(&self, group: &str, kind: RunKind) -> Result<Option<ForecastRun>> {
        let runs = self.runs(group, kind)?;
        Ok(runs
            .into_iter()
            .max_by(|a, b| {
                a.anchor_month
                    .cmp(&b.anchor_month)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.run_id.cmp(&b.run_id))
            }))
    }
}

/// In-memory store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: BTreeMap<SeriesId, BTreeMap<Month, f64>>,
    labels: BTreeMap<String, BTreeMap<String, String>>,
    runs: BTreeMap<RunId, ForecastRun>,
    points: HashMap<RunId, Vec<ForecastPoint>>,
    metrics: BTreeMap<(String, Month, String), RelativeMetric>,
    weights: BTreeMap<(String, Month, String), f64>,
    next_run_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored forecast points
    pub fn point_count(&self) -> usize {
        self.points.values().map(Vec::len).sum()
    }

    fn sorted_points(batch: &RunBatch, run_id: RunId) -> Vec<ForecastPoint> {
        let mut points = batch.to_points(run_id);
        points.sort_by(|a, b| a.category.cmp(&b.category).then(a.month.cmp(&b.month)));
        points
    }
}

impl ForecastStore for MemoryStore {
    fn upsert_observations(&mut self, observations: &[Observation]) -> Result<usize> {
        for obs in observations {
            if !obs.value.is_finite() {
                return Err(ForecastError::DataError(format!(
                    "Non-finite value for {} at {}",
                    obs.series_id, obs.month
                )));
            }
        }
        for obs in observations {
            self.observations
                .entry(obs.series_id.clone())
                .or_default()
                .insert(obs.month, obs.value);
        }
        Ok(observations.len())
    }

    fn load_series(&self, series_id: &SeriesId) -> Result<TimeSeriesData> {
        let points = self
            .observations
            .get(series_id)
            .map(|by_month| by_month.iter().map(|(m, v)| (*m, *v)).collect())
            .unwrap_or_default();
        TimeSeriesData::new(points)
    }

    fn list_series(&self, group: &str) -> Result<Vec<SeriesId>> {
        Ok(self
            .observations
            .keys()
            .filter(|id| id.group() == group && id.code().is_some())
            .cloned()
            .collect())
    }

    fn upsert_labels(&mut self, group: &str, labels: &[SeriesMeta]) -> Result<usize> {
        let entry = self.labels.entry(group.to_string()).or_default();
        for meta in labels {
            entry.insert(meta.code.clone(), meta.label.clone());
        }
        Ok(labels.len())
    }

    fn labels(&self, group: &str) -> Result<Vec<SeriesMeta>> {
        Ok(self
            .labels
            .get(group)
            .map(|by_code| {
                by_code
                    .iter()
                    .map(|(code, label)| SeriesMeta::new(code.clone(), Some(label)))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_backfill_run(&self, group: &str, anchor: Month) -> Result<Option<ForecastRun>> {
        Ok(self
            .runs
            .values()
            .find(|r| r.kind == RunKind::Backfill && r.group == group && r.anchor_month == anchor)
            .cloned())
    }

    fn insert_run(&mut self, batch: &RunBatch) -> Result<ForecastRun> {
        batch.validate()?;
        if batch.kind == RunKind::Backfill {
            if let Some(existing) = self.find_backfill_run(&batch.group, batch.anchor_month)? {
                return Err(ForecastError::Conflict(format!(
                    "backfill run {} already exists for {} at {}",
                    existing.run_id, batch.group, batch.anchor_month
                )));
            }
        }

        self.next_run_id += 1;
        let run_id = RunId(self.next_run_id);
        let run = batch.to_run(run_id);
        self.runs.insert(run_id, run.clone());
        self.points.insert(run_id, Self::sorted_points(batch, run_id));
        Ok(run)
    }

    fn replace_run(&mut self, run_id: RunId, batch: &RunBatch) -> Result<ForecastRun> {
        batch.validate()?;
        if !self.runs.contains_key(&run_id) {
            return Err(ForecastError::Storage(format!("run {} does not exist", run_id)));
        }
        let run = batch.to_run(run_id);
        self.runs.insert(run_id, run.clone());
        self.points.insert(run_id, Self::sorted_points(batch, run_id));
        Ok(run)
    }

    fn merge_run_points(&mut self, run_id: RunId, batch: &RunBatch) -> Result<ForecastRun> {
        batch.validate()?;
        let Some(stored) = self.runs.get(&run_id) else {
            return Err(ForecastError::Storage(format!("run {} does not exist", run_id)));
        };
        batch.check_mergeable(stored)?;

        let categories = batch.categories();
        let run = batch.to_run(run_id);
        let points = self.points.entry(run_id).or_default();
        points.retain(|p| !categories.contains(&p.category.as_str()));
        points.extend(batch.to_points(run_id));
        points.sort_by(|a, b| a.category.cmp(&b.category).then(a.month.cmp(&b.month)));
        self.runs.insert(run_id, run.clone());
        Ok(run)
    }

    fn delete_run(&mut self, run_id: RunId) -> Result<bool> {
        self.points.remove(&run_id);
        Ok(self.runs.remove(&run_id).is_some())
    }

    fn runs(&self, group: &str, kind: RunKind) -> Result<Vec<ForecastRun>> {
        let mut runs: Vec<ForecastRun> = self
            .runs
            .values()
            .filter(|r| r.group == group && r.kind == kind)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.anchor_month.cmp(&b.anchor_month).then(a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    fn run_points(&self, run_id: RunId) -> Result<Vec<ForecastPoint>> {
        Ok(self.points.get(&run_id).cloned().unwrap_or_default())
    }

    fn upsert_metrics(&mut self, metrics: &[RelativeMetric]) -> Result<usize> {
        for metric in metrics {
            self.metrics.insert(
                (metric.group.clone(), metric.month, metric.code.clone()),
                metric.clone(),
            );
        }
        Ok(metrics.len())
    }

    fn metrics_for_month(&self, group: &str, month: Month) -> Result<Vec<RelativeMetric>> {
        Ok(self
            .metrics
            .range((group.to_string(), month, String::new())..)
            .take_while(|((g, m, _), _)| g == group && *m == month)
            .map(|(_, metric)| metric.clone())
            .collect())
    }

    fn latest_metrics_month(&self, group: &str) -> Result<Option<Month>> {
        Ok(self
            .metrics
            .keys()
            .filter(|(g, _, _)| g == group)
            .map(|(_, month, _)| *month)
            .max())
    }

    fn upsert_weights(&mut self, group: &str, weights: &[CategoryWeight]) -> Result<usize> {
        for weight in weights {
            if !weight.weight.is_finite() {
                return Err(ForecastError::DataError(format!(
                    "Non-finite weight for {}:{} at {}",
                    group, weight.code, weight.month
                )));
            }
        }
        for weight in weights {
            self.weights
                .insert((group.to_string(), weight.month, weight.code.clone()), weight.weight);
        }
        Ok(weights.len())
    }

    fn latest_weights(&self, group: &str) -> Result<Vec<CategoryWeight>> {
        let in_group = || self.weights.iter().filter(|((g, _, _), _)| g == group);
        let Some(latest) = in_group().map(|((_, month, _), _)| *month).max() else {
            return Ok(Vec::new());
        };
        Ok(in_group()
            .filter(|((_, month, _), _)| *month == latest)
            .map(|((_, month, code), weight)| CategoryWeight {
                code: code.clone(),
                month: *month,
                weight: *weight,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    fn batch(anchor: &str) -> RunBatch {
        let anchor = m(anchor);
        let mut batch = RunBatch::new("CPI", RunKind::Backfill, anchor, 1, 3);
        batch.push_category("IS00", &[(anchor.succ(), 1.0)]);
        batch
    }

    #[test]
    fn observations_upsert_last_write_wins() {
        let mut store = MemoryStore::new();
        let id = SeriesId::of("CPI", "IS00");
        let obs = |v| Observation {
            series_id: id.clone(),
            month: m("2020-01"),
            value: v,
        };
        store.upsert_observations(&[obs(1.0)]).unwrap();
        store.upsert_observations(&[obs(2.0)]).unwrap();
        assert_eq!(store.load_series(&id).unwrap().values(), vec![2.0]);
    }

    #[test]
    fn duplicate_backfill_insert_conflicts() {
        let mut store = MemoryStore::new();
        store.insert_run(&batch("2020-01")).unwrap();
        assert!(matches!(
            store.insert_run(&batch("2020-01")),
            Err(ForecastError::Conflict(_))
        ));
        assert_eq!(store.runs("CPI", RunKind::Backfill).unwrap().len(), 1);
    }

    #[test]
    fn merge_keeps_other_categories() {
        let mut store = MemoryStore::new();
        let run = store.insert_run(&batch("2020-01")).unwrap();

        let anchor = m("2020-01");
        let mut extra = RunBatch::new("CPI", RunKind::Backfill, anchor, 1, 3);
        extra.push_category("IS01", &[(anchor.succ(), 2.0)]);
        store.merge_run_points(run.run_id, &extra).unwrap();
        assert_eq!(store.run_categories(run.run_id).unwrap(), vec!["IS00", "IS01"]);

        let mut longer = RunBatch::new("CPI", RunKind::Backfill, anchor, 2, 3);
        longer.push_category("IS01", &[(anchor.offset(1), 2.0), (anchor.offset(2), 3.0)]);
        assert!(matches!(
            store.merge_run_points(run.run_id, &longer),
            Err(ForecastError::ValidationError(_))
        ));
        assert!(store.merge_run_points(RunId(99), &extra).is_err());
        assert_eq!(store.point_count(), 2);
    }

    #[test]
    fn latest_weights_take_newest_month_per_group() {
        let mut store = MemoryStore::new();
        let weight = |code: &str, month: &str, weight: f64| CategoryWeight {
            code: code.to_string(),
            month: m(month),
            weight,
        };
        store
            .upsert_weights(
                "CPI",
                &[weight("IS01", "2023-03", 150.0), weight("IS01", "2024-03", 160.0), weight("IS02", "2024-03", 40.0)],
            )
            .unwrap();
        store.upsert_weights("HICP", &[weight("IS01", "2025-03", 1.0)]).unwrap();

        let latest = store.latest_weights("CPI").unwrap();
        assert_eq!(latest, vec![weight("IS01", "2024-03", 160.0), weight("IS02", "2024-03", 40.0)]);
        assert!(store.latest_weights("WAGE").unwrap().is_empty());
        assert!(store.upsert_weights("CPI", &[weight("IS03", "2024-03", f64::NAN)]).is_err());
    }

    #[test]
    fn delete_run_removes_points() {
        let mut store = MemoryStore::new();
        let run = store.insert_run(&batch("2020-01")).unwrap();
        assert_eq!(store.point_count(), 1);
        assert!(store.delete_run(run.run_id).unwrap());
        assert_eq!(store.point_count(), 0);
        assert!(!store.delete_run(run.run_id).unwrap());
    }
}
