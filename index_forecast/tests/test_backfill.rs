use approx::assert_relative_eq;
use index_forecast::backfill::{run_backfill, run_backfill_until, BackfillPlan, BackfillRequest, CellOutcome};
use index_forecast::data::{Observation, SeriesId};
use index_forecast::error::ForecastError;
use index_forecast::models::forecast_values;
use index_forecast::runs::RunKind;
use index_forecast::store::{ForecastStore, MemoryStore};
use index_math::Month;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicBool;

fn m(s: &str) -> Month {
    s.parse().unwrap()
}

fn seed(store: &mut MemoryStore, group: &str, code: &str, start: &str, values: &[f64]) {
    let start = m(start);
    let id = SeriesId::of(group, code);
    let observations: Vec<Observation> = values
        .iter()
        .enumerate()
        .map(|(i, v)| Observation {
            series_id: id.clone(),
            month: start.offset(i as i64),
            value: *v,
        })
        .collect();
    store.upsert_observations(&observations).unwrap();
}

/// A gently rising index with a small repeating wobble
fn rising(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64 * 0.4 + ((i * 7) % 5) as f64 * 0.1).collect()
}

fn year_2020(window: usize, horizon: usize) -> BackfillRequest {
    BackfillRequest::new("CPI")
        .with_categories(vec!["IS00".to_string()])
        .with_range(Some(m("2020-01")), Some(m("2020-12")))
        .with_training_window(window)
        .with_horizon(horizon)
}

#[test]
fn test_backfill_is_idempotent() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2018-01", &rising(36));

    let first = run_backfill(&mut store, &year_2020(12, 6)).unwrap();
    assert_eq!(first.runs_created, 12);
    assert_eq!(first.runs_skipped, 0);
    assert_eq!(first.points_written, 72);

    let second = run_backfill(&mut store, &year_2020(12, 6)).unwrap();
    assert_eq!(second.runs_created, 0);
    assert_eq!(second.runs_skipped, 12);
    assert_eq!(second.points_written, 0);

    let runs = store.runs("CPI", RunKind::Backfill).unwrap();
    assert_eq!(runs.len(), 12);
    assert_eq!(store.point_count(), 72);
}

#[test]
fn test_overwrite_replaces_points_in_place() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2018-01", &rising(36));

    run_backfill(&mut store, &year_2020(12, 6)).unwrap();
    let before = store.runs("CPI", RunKind::Backfill).unwrap();

    let summary = run_backfill(&mut store, &year_2020(12, 3).with_overwrite(true)).unwrap();
    assert_eq!(summary.runs_replaced, 12);
    assert_eq!(summary.runs_created, 0);

    let after = store.runs("CPI", RunKind::Backfill).unwrap();
    assert_eq!(after.len(), 12);
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.run_id, new.run_id);
        assert_eq!(new.horizon, 3);
        let points = store.run_points(new.run_id).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].month, new.anchor_month.succ());
    }
    assert_eq!(store.point_count(), 36);
}

#[test]
fn test_no_look_ahead() {
    let mut store = MemoryStore::new();
    let mut values = rising(30);
    seed(&mut store, "CPI", "IS00", "2018-01", &values);

    let anchor = m("2019-06");
    let request = BackfillRequest::new("CPI")
        .with_categories(vec!["IS00".to_string()])
        .with_range(Some(anchor), Some(anchor))
        .with_training_window(12)
        .with_horizon(4);
    run_backfill(&mut store, &request).unwrap();
    let run = store.find_backfill_run("CPI", anchor).unwrap().unwrap();
    let baseline = store.run_points(run.run_id).unwrap();

    // Reference: fit only the 12 observations up to the anchor
    let visible = &values[6..18];
    let expected = forecast_values(visible, 4).unwrap();
    for (point, value) in baseline.iter().zip(expected.iter()) {
        assert_relative_eq!(point.predicted_value, *value, epsilon = 1e-9);
    }

    // Rewrite everything after the anchor and recompute
    for v in values.iter_mut().skip(18) {
        *v *= 3.0;
    }
    seed(&mut store, "CPI", "IS00", "2018-01", &values);
    run_backfill(&mut store, &request.with_overwrite(true)).unwrap();

    let recomputed = store.run_points(run.run_id).unwrap();
    let bits = |points: &[index_forecast::runs::ForecastPoint]| {
        points
            .iter()
            .map(|p| p.predicted_value.to_bits())
            .collect::<Vec<_>>()
    };
    assert_eq!(bits(&baseline), bits(&recomputed));
}

#[test]
fn test_early_anchors_are_insufficient_not_shortened() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2019-07", &rising(18));

    // Twelve observations first exist at 2020-06
    let summary = run_backfill(&mut store, &year_2020(12, 2)).unwrap();
    assert_eq!(summary.insufficient_data, 5);
    assert_eq!(summary.runs_created, 7);

    let anchors: Vec<Month> = store
        .runs("CPI", RunKind::Backfill)
        .unwrap()
        .iter()
        .map(|r| r.anchor_month)
        .collect();
    assert_eq!(anchors.first(), Some(&m("2020-06")));
    for run in store.runs("CPI", RunKind::Backfill).unwrap() {
        assert_eq!(run.training_window, 12);
    }
}

#[test]
fn test_default_range_starts_at_first_full_window() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2020-01", &rising(10));

    let request = BackfillRequest::new("CPI").with_training_window(6).with_horizon(2);
    let plan = BackfillPlan::prepare(&store, &request).unwrap();
    let anchors = plan.anchors();
    assert_eq!(anchors.first(), Some(&m("2020-06")));
    assert_eq!(anchors.last(), Some(&m("2020-10")));

    let summary = run_backfill(&mut store, &request).unwrap();
    assert_eq!(summary.runs_created, 5);
    assert_eq!(summary.insufficient_data, 0);
}

#[test]
fn test_multi_category_run_tags_points() {
    let mut store = MemoryStore::new();
    seed(&mut store, "WAGE", "TOTAL", "2021-01", &rising(24));
    seed(&mut store, "WAGE", "ALM", "2021-01", &rising(24));
    // Starts later, so it joins only the later anchors
    seed(&mut store, "WAGE", "OPI", "2021-07", &rising(18));

    let request = BackfillRequest::new("WAGE")
        .with_range(Some(m("2021-12")), Some(m("2022-12")))
        .with_training_window(12)
        .with_horizon(12);
    let summary = run_backfill(&mut store, &request).unwrap();
    assert_eq!(summary.runs_created, 13);

    let early = store.find_backfill_run("WAGE", m("2021-12")).unwrap().unwrap();
    let early_points = store.run_points(early.run_id).unwrap();
    assert_eq!(early_points.len(), 24);
    assert!(early_points.iter().all(|p| p.category != "OPI"));

    let late = store.find_backfill_run("WAGE", m("2022-06")).unwrap().unwrap();
    let late_points = store.run_points(late.run_id).unwrap();
    assert_eq!(late_points.len(), 36);
    assert_eq!(late.notes, "backfill:WAGE:2022-06:linear_reg_12m");
}

#[test]
fn test_invalid_requests_fail_before_any_write() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2018-01", &rising(36));

    let bad = year_2020(12, 0);
    assert!(matches!(
        run_backfill(&mut store, &bad),
        Err(ForecastError::InvalidParameter(_))
    ));

    let reversed = year_2020(12, 6).with_range(Some(m("2020-12")), Some(m("2020-01")));
    assert!(run_backfill(&mut store, &reversed).is_err());
    assert!(store.runs("CPI", RunKind::Backfill).unwrap().is_empty());
}

#[test]
fn test_cancellation_keeps_completed_anchors() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2018-01", &rising(36));

    let cancel = AtomicBool::new(true);
    let summary = run_backfill_until(&mut store, &year_2020(12, 6), &cancel).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.anchors_visited, 0);

    // Complete half the range, then resume the whole range
    let first_half = year_2020(12, 6).with_range(Some(m("2020-01")), Some(m("2020-06")));
    run_backfill(&mut store, &first_half).unwrap();
    let resumed = run_backfill(&mut store, &year_2020(12, 6)).unwrap();
    assert_eq!(resumed.runs_skipped, 6);
    assert_eq!(resumed.runs_created, 6);
}

#[test]
fn test_cell_outcomes() {
    let mut store = MemoryStore::new();
    seed(&mut store, "CPI", "IS00", "2019-01", &rising(12));

    let request = BackfillRequest::new("CPI").with_training_window(6).with_horizon(1);
    let plan = BackfillPlan::prepare(&store, &request).unwrap();

    assert_eq!(
        plan.run_cell(&mut store, m("2019-03")).unwrap().0,
        CellOutcome::InsufficientData
    );
    let (outcome, points) = plan.run_cell(&mut store, m("2019-08")).unwrap();
    let CellOutcome::Computed(run_id) = outcome else {
        panic!("expected a computed cell, got {:?}", outcome);
    };
    assert_eq!(points, 1);
    assert_eq!(
        plan.run_cell(&mut store, m("2019-08")).unwrap().0,
        CellOutcome::Skipped(run_id)
    );
    // Past the last observation there is no actual at the anchor
    assert_eq!(
        plan.run_cell(&mut store, m("2020-02")).unwrap().0,
        CellOutcome::InsufficientData
    );
}

fn wage_cell(categories: &[&str], overwrite: bool) -> BackfillRequest {
    BackfillRequest::new("WAGE")
        .with_categories(categories.iter().map(|c| c.to_string()).collect())
        .with_range(Some(m("2021-06")), Some(m("2021-06")))
        .with_training_window(6)
        .with_horizon(3)
        .with_overwrite(overwrite)
}

fn categories_of(store: &MemoryStore, anchor: &str) -> Vec<String> {
    let run = store.find_backfill_run("WAGE", m(anchor)).unwrap().unwrap();
    store
        .run_points(run.run_id)
        .unwrap()
        .into_iter()
        .map(|p| p.category)
        .collect()
}

#[test]
fn test_new_category_joins_existing_run() {
    let mut store = MemoryStore::new();
    seed(&mut store, "WAGE", "TOTAL", "2021-01", &rising(6));
    seed(&mut store, "WAGE", "ALM", "2021-01", &rising(6));

    let first = run_backfill(&mut store, &wage_cell(&["TOTAL"], false)).unwrap();
    assert_eq!(first.runs_created, 1);
    let run = store.find_backfill_run("WAGE", m("2021-06")).unwrap().unwrap();

    let second = run_backfill(&mut store, &wage_cell(&["ALM"], false)).unwrap();
    assert_eq!(second.runs_extended, 1);
    assert_eq!(second.runs_skipped, 0);
    assert_eq!(second.points_written, 3);
    assert_eq!(
        categories_of(&store, "2021-06"),
        vec!["ALM", "ALM", "ALM", "TOTAL", "TOTAL", "TOTAL"]
    );

    // Both categories are now present, so a full rerun has nothing to do
    let third = run_backfill(&mut store, &wage_cell(&[], false)).unwrap();
    assert_eq!(third.runs_skipped, 1);
    assert_eq!(third.points_written, 0);
    let runs = store.runs("WAGE", RunKind::Backfill).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, run.run_id);
}

#[test]
fn test_overwrite_of_one_category_keeps_the_others() {
    let mut store = MemoryStore::new();
    seed(&mut store, "WAGE", "TOTAL", "2021-01", &rising(6));
    seed(&mut store, "WAGE", "ALM", "2021-01", &rising(6));
    run_backfill(&mut store, &wage_cell(&["TOTAL"], false)).unwrap();
    let run = store.find_backfill_run("WAGE", m("2021-06")).unwrap().unwrap();
    let total_before: Vec<f64> = store
        .run_points(run.run_id)
        .unwrap()
        .iter()
        .map(|p| p.predicted_value)
        .collect();

    let summary = run_backfill(&mut store, &wage_cell(&["ALM"], true)).unwrap();
    assert_eq!(summary.runs_replaced, 1);
    assert_eq!(summary.points_written, 3);

    let points = store.run_points(run.run_id).unwrap();
    let total_after: Vec<f64> = points
        .iter()
        .filter(|p| p.category == "TOTAL")
        .map(|p| p.predicted_value)
        .collect();
    assert_eq!(total_after, total_before);
    assert_eq!(points.iter().filter(|p| p.category == "ALM").count(), 3);
    assert_eq!(store.point_count(), 6);

    // A subset overwrite with another horizon would leave the run inconsistent
    let reshaped = wage_cell(&["ALM"], true).with_horizon(2);
    assert!(matches!(
        run_backfill(&mut store, &reshaped),
        Err(ForecastError::ValidationError(_))
    ));
    assert_eq!(store.point_count(), 6);
}
