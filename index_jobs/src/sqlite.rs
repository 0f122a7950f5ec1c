//! SQLite implementation of the forecast store
//!
//! Months are stored as `YYYY-MM` text, which sorts chronologically.
//! Uniqueness keys live in the schema: `(series_id, month)` for observations,
//! `(grp, anchor_month)` for backfill runs, `(grp, month, code)` for metric
//! rows and `(grp, code, month)` for category weights.

use crate::Result;
use chrono::{DateTime, Utc};
use index_forecast::data::{CategoryWeight, Observation, SeriesId, SeriesMeta, TimeSeriesData};
use index_forecast::metrics::RelativeMetric;
use index_forecast::runs::{ForecastPoint, ForecastRun, RunBatch, RunId, RunKind};
use index_forecast::store::ForecastStore;
use index_forecast::ForecastError;
use index_math::Month;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use std::path::Path;

type StoreResult<T> = index_forecast::Result<T>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observations (
    series_id TEXT NOT NULL,
    month TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (series_id, month)
);
CREATE TABLE IF NOT EXISTS series_labels (
    grp TEXT NOT NULL,
    code TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (grp, code)
);
CREATE TABLE IF NOT EXISTS forecast_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    grp TEXT NOT NULL,
    kind TEXT NOT NULL,
    anchor_month TEXT NOT NULL,
    horizon INTEGER NOT NULL,
    training_window INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT ''
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_forecast_runs_backfill_anchor
    ON forecast_runs(grp, anchor_month) WHERE kind = 'backfill';
CREATE INDEX IF NOT EXISTS idx_forecast_runs_grp_kind
    ON forecast_runs(grp, kind, anchor_month);
CREATE TABLE IF NOT EXISTS forecast_points (
    run_id INTEGER NOT NULL REFERENCES forecast_runs(run_id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    month TEXT NOT NULL,
    predicted_value REAL NOT NULL,
    PRIMARY KEY (run_id, category, month)
);
CREATE TABLE IF NOT EXISTS relative_metrics (
    grp TEXT NOT NULL,
    month TEXT NOT NULL,
    code TEXT NOT NULL,
    label TEXT NOT NULL,
    value REAL NOT NULL,
    mom_pct REAL,
    yoy_pct REAL,
    delta_mom_vs_total REAL,
    delta_yoy_vs_total REAL,
    weight REAL,
    PRIMARY KEY (grp, month, code)
);
CREATE TABLE IF NOT EXISTS series_weights (
    grp TEXT NOT NULL,
    code TEXT NOT NULL,
    month TEXT NOT NULL,
    weight REAL NOT NULL,
    PRIMARY KEY (grp, code, month)
);
";

/// Maps backend errors into the store's error type
trait StorageExt<T> {
    fn storage(self) -> StoreResult<T>;
}

impl<T> StorageExt<T> for rusqlite::Result<T> {
    fn storage(self) -> StoreResult<T> {
        self.map_err(ForecastError::storage)
    }
}

fn parse_month(text: &str) -> StoreResult<Month> {
    Ok(text.parse::<Month>()?)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Columns of a `forecast_runs` row before parsing
struct RunRow {
    run_id: i64,
    grp: String,
    kind: String,
    anchor_month: String,
    horizon: i64,
    training_window: i64,
    created_at: String,
    notes: String,
}

const RUN_COLUMNS: &str =
    "run_id, grp, kind, anchor_month, horizon, training_window, created_at, notes";

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            grp: row.get(1)?,
            kind: row.get(2)?,
            anchor_month: row.get(3)?,
            horizon: row.get(4)?,
            training_window: row.get(5)?,
            created_at: row.get(6)?,
            notes: row.get(7)?,
        })
    }

    fn into_run(self) -> StoreResult<ForecastRun> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| ForecastError::Storage(format!("bad created_at {}: {}", self.created_at, e)))?
            .with_timezone(&Utc);
        Ok(ForecastRun {
            run_id: RunId(self.run_id),
            group: self.grp,
            kind: self.kind.parse()?,
            anchor_month: parse_month(&self.anchor_month)?,
            horizon: usize::try_from(self.horizon).map_err(ForecastError::storage)?,
            training_window: usize::try_from(self.training_window).map_err(ForecastError::storage)?,
            created_at,
            notes: self.notes,
        })
    }
}

/// Forecast store backed by a SQLite database file
pub struct SqliteStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::drop_ungrouped_metrics(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Metric rows written before they carried a group are derived data;
    /// drop them so the next refresh rebuilds them under the current key
    fn drop_ungrouped_metrics(conn: &Connection) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('relative_metrics')")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if !columns.is_empty() && !columns.iter().any(|c| c == "grp") {
            tracing::warn!("relative_metrics has no group column; dropping it for rebuild");
            conn.execute_batch("DROP TABLE relative_metrics")?;
        }
        Ok(())
    }

    fn insert_points(tx: &Transaction<'_>, run_id: RunId, batch: &RunBatch) -> StoreResult<()> {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO forecast_points (run_id, category, month, predicted_value)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .storage()?;
        for point in &batch.points {
            stmt.execute(params![
                run_id.0,
                point.category,
                point.month.to_string(),
                point.predicted_value
            ])
            .storage()?;
        }
        Ok(())
    }

    fn query_runs(&self, sql: &str, args: impl rusqlite::Params) -> StoreResult<Vec<ForecastRun>> {
        let mut stmt = self.conn.prepare_cached(sql).storage()?;
        let rows = stmt
            .query_map(args, RunRow::from_row)
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }
}

impl ForecastStore for SqliteStore {
    fn upsert_observations(&mut self, observations: &[Observation]) -> StoreResult<usize> {
        let tx = self.conn.transaction().storage()?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO observations (series_id, month, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(series_id, month) DO UPDATE SET value = excluded.value",
                )
                .storage()?;
            for obs in observations {
                if !obs.value.is_finite() {
                    return Err(ForecastError::DataError(format!(
                        "Non-finite value for {} at {}",
                        obs.series_id, obs.month
                    )));
                }
                stmt.execute(params![obs.series_id.as_str(), obs.month.to_string(), obs.value])
                    .storage()?;
            }
        }
        tx.commit().storage()?;
        Ok(observations.len())
    }

    fn load_series(&self, series_id: &SeriesId) -> StoreResult<TimeSeriesData> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT month, value FROM observations WHERE series_id = ?1 ORDER BY month")
            .storage()?;
        let rows = stmt
            .query_map([series_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;

        let points = rows
            .into_iter()
            .map(|(month, value)| Ok((parse_month(&month)?, value)))
            .collect::<StoreResult<Vec<_>>>()?;
        TimeSeriesData::new(points)
    }

    fn list_series(&self, group: &str) -> StoreResult<Vec<SeriesId>> {
        let prefix = format!("{}:", group);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT DISTINCT series_id FROM observations
                 WHERE substr(series_id, 1, length(?1)) = ?1 AND length(series_id) > length(?1)
                 ORDER BY series_id",
            )
            .storage()?;
        let ids = stmt
            .query_map([prefix.as_str()], |row| row.get::<_, String>(0))
            .storage()?
            .map(|id| id.map(SeriesId::new))
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;
        Ok(ids)
    }

    fn upsert_labels(&mut self, group: &str, labels: &[SeriesMeta]) -> StoreResult<usize> {
        let tx = self.conn.transaction().storage()?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO series_labels (grp, code, label) VALUES (?1, ?2, ?3)
                     ON CONFLICT(grp, code) DO UPDATE SET label = excluded.label",
                )
                .storage()?;
            for meta in labels {
                stmt.execute(params![group, meta.code, meta.label]).storage()?;
            }
        }
        tx.commit().storage()?;
        Ok(labels.len())
    }

    fn labels(&self, group: &str) -> StoreResult<Vec<SeriesMeta>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT code, label FROM series_labels WHERE grp = ?1 ORDER BY code")
            .storage()?;
        let labels = stmt
            .query_map([group], |row| {
                let code: String = row.get(0)?;
                let label: String = row.get(1)?;
                Ok(SeriesMeta::new(code, Some(&label)))
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;
        Ok(labels)
    }

    fn find_backfill_run(&self, group: &str, anchor: Month) -> StoreResult<Option<ForecastRun>> {
        let sql = format!(
            "SELECT {} FROM forecast_runs WHERE kind = 'backfill' AND grp = ?1 AND anchor_month = ?2",
            RUN_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![group, anchor.to_string()], RunRow::from_row)
            .optional()
            .storage()?;
        row.map(RunRow::into_run).transpose()
    }

    fn insert_run(&mut self, batch: &RunBatch) -> StoreResult<ForecastRun> {
        batch.validate()?;
        let tx = self.conn.transaction().storage()?;
        let inserted = tx.execute(
            "INSERT INTO forecast_runs (grp, kind, anchor_month, horizon, training_window, created_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                batch.group,
                batch.kind.as_str(),
                batch.anchor_month.to_string(),
                batch.horizon as i64,
                batch.training_window as i64,
                batch.created_at.to_rfc3339(),
                batch.notes
            ],
        );
        match inserted {
            Err(err) if is_constraint_violation(&err) => {
                return Err(ForecastError::Conflict(format!(
                    "{} run already exists for {} at {}",
                    batch.kind, batch.group, batch.anchor_month
                )));
            }
            other => {
                other.storage()?;
            }
        }

        let run_id = RunId(tx.last_insert_rowid());
        Self::insert_points(&tx, run_id, batch)?;
        tx.commit().storage()?;
        Ok(batch.to_run(run_id))
    }

    fn replace_run(&mut self, run_id: RunId, batch: &RunBatch) -> StoreResult<ForecastRun> {
        batch.validate()?;
        let tx = self.conn.transaction().storage()?;
        tx.execute("DELETE FROM forecast_points WHERE run_id = ?1", [run_id.0])
            .storage()?;
        let updated = tx
            .execute(
                "UPDATE forecast_runs
                 SET grp = ?2, kind = ?3, anchor_month = ?4, horizon = ?5,
                     training_window = ?6, created_at = ?7, notes = ?8
                 WHERE run_id = ?1",
                params![
                    run_id.0,
                    batch.group,
                    batch.kind.as_str(),
                    batch.anchor_month.to_string(),
                    batch.horizon as i64,
                    batch.training_window as i64,
                    batch.created_at.to_rfc3339(),
                    batch.notes
                ],
            )
            .storage()?;
        if updated == 0 {
            // Dropping the transaction rolls back the point deletion
            return Err(ForecastError::Storage(format!("run {} does not exist", run_id)));
        }
        Self::insert_points(&tx, run_id, batch)?;
        tx.commit().storage()?;
        Ok(batch.to_run(run_id))
    }

    fn merge_run_points(&mut self, run_id: RunId, batch: &RunBatch) -> StoreResult<ForecastRun> {
        batch.validate()?;
        let tx = self.conn.transaction().storage()?;
        let sql = format!("SELECT {} FROM forecast_runs WHERE run_id = ?1", RUN_COLUMNS);
        let stored = tx
            .query_row(&sql, [run_id.0], RunRow::from_row)
            .optional()
            .storage()?
            .map(RunRow::into_run)
            .transpose()?
            .ok_or_else(|| ForecastError::Storage(format!("run {} does not exist", run_id)))?;
        batch.check_mergeable(&stored)?;

        {
            let mut delete = tx
                .prepare_cached("DELETE FROM forecast_points WHERE run_id = ?1 AND category = ?2")
                .storage()?;
            for category in batch.categories() {
                delete.execute(params![run_id.0, category]).storage()?;
            }
        }
        tx.execute(
            "UPDATE forecast_runs SET created_at = ?2, notes = ?3 WHERE run_id = ?1",
            params![run_id.0, batch.created_at.to_rfc3339(), batch.notes],
        )
        .storage()?;
        Self::insert_points(&tx, run_id, batch)?;
        tx.commit().storage()?;
        Ok(batch.to_run(run_id))
    }

    fn delete_run(&mut self, run_id: RunId) -> StoreResult<bool> {
        let tx = self.conn.transaction().storage()?;
        tx.execute("DELETE FROM forecast_points WHERE run_id = ?1", [run_id.0])
            .storage()?;
        let deleted = tx
            .execute("DELETE FROM forecast_runs WHERE run_id = ?1", [run_id.0])
            .storage()?;
        tx.commit().storage()?;
        Ok(deleted > 0)
    }

    fn runs(&self, group: &str, kind: RunKind) -> StoreResult<Vec<ForecastRun>> {
        let sql = format!(
            "SELECT {} FROM forecast_runs WHERE grp = ?1 AND kind = ?2 ORDER BY anchor_month, run_id",
            RUN_COLUMNS
        );
        self.query_runs(&sql, params![group, kind.as_str()])
    }

    fn latest_run(&self, group: &str, kind: RunKind) -> StoreResult<Option<ForecastRun>> {
        let sql = format!(
            "SELECT {} FROM forecast_runs WHERE grp = ?1 AND kind = ?2
             ORDER BY anchor_month DESC, created_at DESC, run_id DESC LIMIT 1",
            RUN_COLUMNS
        );
        Ok(self
            .query_runs(&sql, params![group, kind.as_str()])?
            .into_iter()
            .next())
    }

    fn run_points(&self, run_id: RunId) -> StoreResult<Vec<ForecastPoint>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT category, month, predicted_value FROM forecast_points
                 WHERE run_id = ?1 ORDER BY category, month",
            )
            .storage()?;
        let rows = stmt
            .query_map([run_id.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;

        rows.into_iter()
            .map(|(category, month, predicted_value)| {
                Ok(ForecastPoint {
                    run_id,
                    category,
                    month: parse_month(&month)?,
                    predicted_value,
                })
            })
            .collect()
    }

    fn run_categories(&self, run_id: RunId) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT DISTINCT category FROM forecast_points WHERE run_id = ?1 ORDER BY category",
            )
            .storage()?;
        let categories = stmt
            .query_map([run_id.0], |row| row.get::<_, String>(0))
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;
        Ok(categories)
    }

    fn upsert_metrics(&mut self, metrics: &[RelativeMetric]) -> StoreResult<usize> {
        let tx = self.conn.transaction().storage()?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO relative_metrics
                        (grp, month, code, label, value, mom_pct, yoy_pct,
                         delta_mom_vs_total, delta_yoy_vs_total, weight)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(grp, month, code) DO UPDATE SET
                        label = excluded.label,
                        value = excluded.value,
                        mom_pct = excluded.mom_pct,
                        yoy_pct = excluded.yoy_pct,
                        delta_mom_vs_total = excluded.delta_mom_vs_total,
                        delta_yoy_vs_total = excluded.delta_yoy_vs_total,
                        weight = excluded.weight",
                )
                .storage()?;
            for m in metrics {
                stmt.execute(params![
                    m.group,
                    m.month.to_string(),
                    m.code,
                    m.label,
                    m.value,
                    m.mom_pct,
                    m.yoy_pct,
                    m.delta_mom_vs_total,
                    m.delta_yoy_vs_total,
                    m.weight
                ])
                .storage()?;
            }
        }
        tx.commit().storage()?;
        Ok(metrics.len())
    }

    fn metrics_for_month(&self, group: &str, month: Month) -> StoreResult<Vec<RelativeMetric>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT code, label, value, mom_pct, yoy_pct, delta_mom_vs_total, delta_yoy_vs_total, weight
                 FROM relative_metrics WHERE grp = ?1 AND month = ?2 ORDER BY code",
            )
            .storage()?;
        let metrics = stmt
            .query_map(params![group, month.to_string()], |row| {
                Ok(RelativeMetric {
                    group: group.to_string(),
                    month,
                    code: row.get(0)?,
                    label: row.get(1)?,
                    value: row.get(2)?,
                    mom_pct: row.get(3)?,
                    yoy_pct: row.get(4)?,
                    delta_mom_vs_total: row.get(5)?,
                    delta_yoy_vs_total: row.get(6)?,
                    weight: row.get(7)?,
                })
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;
        Ok(metrics)
    }

    fn latest_metrics_month(&self, group: &str) -> StoreResult<Option<Month>> {
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(month) FROM relative_metrics WHERE grp = ?1",
                [group],
                |row| row.get(0),
            )
            .storage()?;
        latest.as_deref().map(parse_month).transpose()
    }

    fn upsert_weights(&mut self, group: &str, weights: &[CategoryWeight]) -> StoreResult<usize> {
        let tx = self.conn.transaction().storage()?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO series_weights (grp, code, month, weight) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(grp, code, month) DO UPDATE SET weight = excluded.weight",
                )
                .storage()?;
            for w in weights {
                if !w.weight.is_finite() {
                    return Err(ForecastError::DataError(format!(
                        "Non-finite weight for {}:{} at {}",
                        group, w.code, w.month
                    )));
                }
                stmt.execute(params![group, w.code, w.month.to_string(), w.weight])
                    .storage()?;
            }
        }
        tx.commit().storage()?;
        Ok(weights.len())
    }

    fn latest_weights(&self, group: &str) -> StoreResult<Vec<CategoryWeight>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT code, month, weight FROM series_weights
                 WHERE grp = ?1 AND month = (SELECT MAX(month) FROM series_weights WHERE grp = ?1)
                 ORDER BY code",
            )
            .storage()?;
        let rows = stmt
            .query_map([group], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;

        rows.into_iter()
            .map(|(code, month, weight)| {
                Ok(CategoryWeight {
                    code,
                    month: parse_month(&month)?,
                    weight,
                })
            })
            .collect()
    }
}
