//! # Index Jobs
//!
//! `index_jobs` runs the batch side of the monthly index pipeline: it loads a
//! TOML job configuration, keeps observations and derived rows in SQLite, and
//! exposes ingestion, forecast refresh, backfill, movers, accuracy and
//! statistics commands to the `index-jobs` binary.
//!
//! ## Usage Example
//!
//! ```no_run
//! use index_jobs::config::JobsConfig;
//! use index_jobs::sqlite::SqliteStore;
//! use index_jobs::commands;
//!
//! let config = JobsConfig::load("index-jobs.toml").unwrap();
//! let mut store = SqliteStore::open(&config.database_path).unwrap();
//!
//! for summary in commands::ingest_sources(&config, &mut store, None).unwrap() {
//!     println!("{}: {} observations", summary.group, summary.observations_upserted);
//! }
//! ```

use index_forecast::ForecastError;
use thiserror::Error;

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod sqlite;

pub use config::{JobsConfig, SourceConfig};
pub use sqlite::SqliteStore;

/// Errors that can occur while running jobs
#[derive(Error, Debug)]
pub enum JobsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

impl JobsError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        JobsError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for job operations
pub type Result<T> = std::result::Result<T, JobsError>;
