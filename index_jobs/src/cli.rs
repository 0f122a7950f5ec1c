//! Command line interface of `index-jobs`

use clap::{Parser, Subcommand};
use index_math::Month;
use std::path::PathBuf;

/// Ingest, forecast and backfill monthly economic indices
#[derive(Parser, Debug)]
#[command(name = "index-jobs", version, about)]
pub struct Cli {
    /// Job configuration file
    #[arg(short, long, default_value = "index-jobs.toml", global = true)]
    pub config: PathBuf,

    /// SQLite database, overriding the configured path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log filter (e.g. debug, index_forecast=trace); defaults to RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Normalize configured payloads into the observation store
    Ingest {
        /// Only ingest this group
        #[arg(long)]
        source: Option<String>,
    },

    /// Refresh the current forecast and relative metrics
    ///
    /// With `--csv` the forecast is computed for a standalone `month,value`
    /// file and printed without touching the store.
    Forecast {
        /// Only refresh this group
        #[arg(long)]
        group: Option<String>,

        /// Forecast a CSV series instead of the store
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Forecast horizon in months
        #[arg(long)]
        horizon: Option<usize>,

        /// Training window in months
        #[arg(long)]
        window: Option<usize>,
    },

    /// Rebuild point-in-time forecasts for past anchor months
    Backfill {
        #[arg(long)]
        group: String,

        /// First anchor month (YYYY-MM)
        #[arg(long)]
        start: Option<Month>,

        /// Last anchor month (YYYY-MM)
        #[arg(long)]
        end: Option<Month>,

        #[arg(long)]
        horizon: Option<usize>,

        #[arg(long)]
        window: Option<usize>,

        /// Comma-separated category codes; all categories when omitted
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// Recompute anchors that already have a run
        #[arg(long)]
        overwrite: bool,
    },

    /// Recompute relative metrics and print the movers panel
    Movers {
        #[arg(long)]
        group: String,

        /// Total series code; the configured or family total when omitted
        #[arg(long)]
        total: Option<String>,

        /// Metrics month (YYYY-MM); latest when omitted
        #[arg(long)]
        month: Option<Month>,
    },

    /// Percent change of every category over a number of months
    Changes {
        #[arg(long)]
        group: String,

        /// Span in months, counted back from each category's latest month
        #[arg(long, default_value_t = 12)]
        months: u32,
    },

    /// Score stored backfill runs against actuals
    Accuracy {
        #[arg(long)]
        group: String,

        #[arg(long)]
        category: String,
    },

    /// Summary statistics of month-over-month changes
    Stats {
        /// Series id, e.g. CPI:IS00
        #[arg(long)]
        series: String,

        /// Only count changes from this month (YYYY-MM)
        #[arg(long)]
        since: Option<Month>,
    },
}
