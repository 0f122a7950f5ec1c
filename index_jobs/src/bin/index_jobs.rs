use anyhow::{Context, Result};
use clap::Parser;
use index_forecast::models::ForecastResult;
use index_forecast::SeriesId;
use index_jobs::cli::{Cli, Command};
use index_jobs::commands::{self, BackfillArgs};
use index_jobs::{logging, JobsConfig, SqliteStore};
use std::sync::atomic::AtomicBool;

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

fn print_forecast(result: &ForecastResult) {
    let points = result.points();
    if points.is_empty() {
        for (h, value) in result.values().iter().enumerate() {
            println!("t+{}\t{:.3}", h + 1, value);
        }
    } else {
        for (month, value) in points {
            println!("{}\t{:.3}", month, value);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    let mut config = JobsConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }

    // CSV forecasts never open the database
    if let Command::Forecast {
        csv: Some(path),
        horizon,
        window,
        ..
    } = &cli.command
    {
        let horizon = horizon.unwrap_or(config.forecast.default_horizon);
        let window = window.unwrap_or(config.forecast.training_window);
        let result = commands::forecast_csv(path, horizon, window)
            .with_context(|| format!("failed to forecast {}", path.display()))?;
        if result.is_empty() {
            anyhow::bail!("{} has fewer than two observations", path.display());
        }
        print_forecast(&result);
        return Ok(());
    }

    let mut store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    tracing::debug!(db = %config.database_path.display(), "store opened");

    match cli.command {
        Command::Ingest { source } => {
            let summaries = commands::ingest_sources(&config, &mut store, source.as_deref())?;
            if summaries.is_empty() {
                println!("no sources configured");
            }
            for s in summaries {
                println!(
                    "{}: {} observations, {} categories, {} weights ({} missing, {} bad months, {} duplicates)",
                    s.group,
                    s.observations_upserted,
                    s.categories.len(),
                    s.weights_upserted,
                    s.report.missing_values,
                    s.report.bad_months,
                    s.report.duplicates
                );
                if let Some(mode) = s.splice {
                    println!("  splice: {}", mode);
                }
            }
        }
        Command::Forecast {
            group,
            horizon,
            window,
            ..
        } => {
            let outcomes =
                commands::refresh_forecasts(&config, &mut store, group.as_deref(), horizon, window)?;
            for outcome in outcomes {
                match outcome.run {
                    Some(run) => println!(
                        "{}: run {} anchored at {} ({} months, {}), {} metric rows",
                        outcome.group, run.run_id, run.anchor_month, run.horizon, run.notes, outcome.metrics
                    ),
                    None => println!("{}: no forecast (insufficient data)", outcome.group),
                }
            }
        }
        Command::Backfill {
            group,
            start,
            end,
            horizon,
            window,
            categories,
            overwrite,
        } => {
            let args = BackfillArgs {
                group,
                start,
                end,
                horizon,
                window,
                categories,
                overwrite,
            };
            let cancel = AtomicBool::new(false);
            let summary = commands::backfill(&config, &mut store, &args, &cancel)
                .with_context(|| format!("backfill of {} failed", args.group))?;
            println!("{}: {}", args.group, summary);
        }
        Command::Movers { group, total, month } => {
            let panel = commands::movers(&config, &mut store, &group, total.as_deref(), month)?;
            if panel.is_empty() {
                println!("{}: no metrics", group);
            }
            for row in panel {
                println!(
                    "{}\t{}\t{}\t{:.2}\tmom {}\tyoy {}\tΔmom {}\tΔyoy {}\tweight {}",
                    row.month,
                    row.code,
                    row.label,
                    row.value,
                    fmt_opt(row.mom_pct),
                    fmt_opt(row.yoy_pct),
                    fmt_opt(row.delta_mom_vs_total),
                    fmt_opt(row.delta_yoy_vs_total),
                    fmt_opt(row.weight)
                );
            }
        }
        Command::Changes { group, months } => {
            let changes = commands::changes(&store, &group, months)?;
            if changes.is_empty() {
                println!("{}: no category has {} months of history", group, months);
            }
            for (meta, pct) in changes {
                println!("{}\t{}\t{:.2}%", meta.code, meta.label, pct);
            }
        }
        Command::Accuracy { group, category } => {
            let report = commands::accuracy(&store, &group, &category)?;
            for row in &report.rows {
                println!(
                    "{}\trun {}\t{} matched\t{}",
                    row.anchor_month, row.run_id, row.matched, row.accuracy
                );
            }
            match report.overall {
                Some(overall) => println!("{} overall: {}", report.series_id, overall),
                None => println!("{}: no backfill runs with actuals", report.series_id),
            }
        }
        Command::Stats { series, since } => {
            let report = commands::stats(&store, &SeriesId::new(series), since)?;
            println!("{}: {} observations", report.series_id, report.observations);
            match report.stats {
                Some(s) => println!(
                    "monthly change over {} months: mean {:.3}%, median {:.3}%, std dev {}",
                    s.count,
                    s.mean,
                    s.median,
                    s.std_dev.map_or_else(|| "-".to_string(), |v| format!("{:.3}%", v))
                ),
                None => println!("no consecutive months to compare"),
            }
            for (month, yoy) in report.projected_yoy {
                println!("{}\tprojected yoy {}", month, fmt_opt(yoy));
            }
        }
    }

    Ok(())
}
