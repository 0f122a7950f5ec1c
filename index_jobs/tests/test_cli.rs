use clap::Parser;
use index_jobs::cli::{Cli, Command};
use index_math::Month;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::path::PathBuf;

fn m(s: &str) -> Month {
    s.parse().unwrap()
}

#[test]
fn test_backfill_arguments() {
    let cli = Cli::try_parse_from([
        "index-jobs",
        "--db",
        "/tmp/x.db",
        "backfill",
        "--group",
        "CPI",
        "--start",
        "2020-01",
        "--end",
        "2020M06",
        "--window",
        "12",
        "--categories",
        "IS00,IS01",
        "--overwrite",
    ])
    .unwrap();

    assert_eq!(cli.config, PathBuf::from("index-jobs.toml"));
    assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    assert_eq!(
        cli.command,
        Command::Backfill {
            group: "CPI".to_string(),
            start: Some(m("2020-01")),
            end: Some(m("2020-06")),
            horizon: None,
            window: Some(12),
            categories: vec!["IS00".to_string(), "IS01".to_string()],
            overwrite: true,
        }
    );
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["index-jobs", "ingest", "--config", "jobs.toml", "--source", "WAGE"]).unwrap();
    assert_eq!(cli.config, PathBuf::from("jobs.toml"));
    assert_eq!(
        cli.command,
        Command::Ingest {
            source: Some("WAGE".to_string())
        }
    );
}

#[test]
fn test_changes_span_defaults_to_a_year() {
    let cli = Cli::try_parse_from(["index-jobs", "changes", "--group", "CPI"]).unwrap();
    assert_eq!(
        cli.command,
        Command::Changes {
            group: "CPI".to_string(),
            months: 12
        }
    );
    let cli = Cli::try_parse_from(["index-jobs", "changes", "--group", "CPI", "--months", "3"]).unwrap();
    assert!(matches!(cli.command, Command::Changes { months: 3, .. }));
}

#[rstest]
#[case::backfill_without_group(&["index-jobs", "backfill"])]
#[case::bad_month(&["index-jobs", "backfill", "--group", "CPI", "--start", "2020-13"])]
#[case::accuracy_without_category(&["index-jobs", "accuracy", "--group", "CPI"])]
#[case::negative_change_span(&["index-jobs", "changes", "--group", "CPI", "--months", "-1"])]
#[case::no_subcommand(&["index-jobs"])]
fn test_rejected_invocations(#[case] args: &[&str]) {
    assert!(Cli::try_parse_from(args).is_err());
}
