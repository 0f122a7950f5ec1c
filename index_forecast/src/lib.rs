//! # Index Forecast
//!
//! Forecasting and point-in-time backfill for monthly economic indices.
//!
//! ## Features
//!
//! - Normalization of raw statistics-table payloads into monthly series,
//!   with splicing of re-based vintages
//! - Linear trend forecasts anchored to the last observation
//! - Point-in-time backfill of forecast runs over historical anchor months
//! - Sub-series change rates relative to their aggregate and movers ranking
//! - Storage contract for observations and derived rows, with an in-memory store
//! - Accuracy of backfilled forecasts and monthly change statistics
//!
//! ## Quick Start
//!
//! ```rust
//! use index_forecast::backfill::{run_backfill, BackfillRequest};
//! use index_forecast::normalize::{RawPayload, SourceFamily};
//! use index_forecast::store::MemoryStore;
//! use index_forecast::ingest;
//!
//! # fn main() -> index_forecast::Result<()> {
//! let payload = RawPayload::from_json(
//!     r#"{"data": [
//!         {"key": ["2024M01", "IS00"], "values": ["600.0"]},
//!         {"key": ["2024M02", "IS00"], "values": ["603.0"]},
//!         {"key": ["2024M03", "IS00"], "values": ["605.0"]}
//!     ]}"#,
//! )?;
//!
//! let mut store = MemoryStore::new();
//! let extractor = SourceFamily::Cpi.extractor();
//! ingest(&mut store, "CPI", &payload, extractor.as_ref(), &[])?;
//!
//! let request = BackfillRequest::new("CPI").with_training_window(2).with_horizon(3);
//! let summary = run_backfill(&mut store, &request)?;
//! assert_eq!(summary.runs_created, 2);
//! # Ok(())
//! # }
//! ```

pub mod accuracy;
pub mod backfill;
pub mod data;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod queries;
pub mod refresh;
pub mod runs;
pub mod settings;
pub mod splice;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use crate::backfill::{run_backfill, run_backfill_until, BackfillRequest, BackfillSummary, CellOutcome};
pub use crate::data::{CategoryWeight, DataLoader, Observation, SeriesId, SeriesMeta, TimeSeriesData};
pub use crate::error::{ForecastError, Result};
pub use crate::ingest::{ingest, IngestJob, IngestSummary};
pub use crate::metrics::{changes_over_months, movers_panel, rank_movers, relative_metrics, RelativeMetric};
pub use crate::models::{AnchoredTrend, ForecastModel, ForecastResult, TrainedForecastModel};
pub use crate::refresh::{refresh_current_forecast, refresh_relative_metrics};
pub use crate::settings::ForecastSettings;
pub use crate::store::{ForecastStore, MemoryStore};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
