use index_forecast::normalize::SourceFamily;
use index_forecast::splice::SpliceFallback;
use index_jobs::config::DATABASE_ENV;
use index_jobs::{JobsConfig, JobsError};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

const CONFIG: &str = r#"
database_path = "data/index.db"

[forecast]
training_window = 18
curated_codes = ["IS01", "IS04"]
splice_fallback = "disabled"

[forecast.horizons]
CPI = 6
WAGE = 12

[[sources]]
group = "CPI"
family = "cpi"
payload = "payloads/cpi.json"
previous_vintage = "/srv/archive/cpi_1988.json"
weights = "payloads/cpi_weights.json"

[sources.labels]
IS01 = "Food and non-alcoholic beverages"

[[sources]]
group = "BCI"
family = "construction"
payload = "payloads/bci.json"
total_code = "BCI_TOTAL"
categories = ["BCI_TOTAL", "LABOUR"]
"#;

// Only this test touches INDEX_DB, so it cannot race with the others
#[test]
fn test_load_resolves_paths_and_applies_env_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index-jobs.toml");
    fs::write(&path, CONFIG).unwrap();

    std::env::remove_var(DATABASE_ENV);
    let config = JobsConfig::load(&path).unwrap();
    assert_eq!(config.database_path, dir.path().join("data/index.db"));

    let cpi = config.source("CPI").unwrap();
    assert_eq!(cpi.family, SourceFamily::Cpi);
    assert_eq!(cpi.payload, dir.path().join("payloads/cpi.json"));
    // Absolute paths are left alone
    assert_eq!(
        cpi.previous_vintage.as_deref(),
        Some(std::path::Path::new("/srv/archive/cpi_1988.json"))
    );
    assert_eq!(cpi.weights, Some(dir.path().join("payloads/cpi_weights.json")));
    assert_eq!(cpi.total_code(), "IS00");
    assert_eq!(cpi.labels()[0].label, "Food and non-alcoholic beverages");

    let bci = config.source("BCI").unwrap();
    assert_eq!(bci.total_code(), "BCI_TOTAL");
    assert_eq!(bci.categories, vec!["BCI_TOTAL", "LABOUR"]);
    assert_eq!(bci.weights, None);

    assert_eq!(config.forecast.training_window, 18);
    assert_eq!(config.forecast.horizon_for("WAGE"), 12);
    assert_eq!(config.forecast.horizon_for("BCI"), 6);
    assert_eq!(config.forecast.splice_fallback, SpliceFallback::Disabled);

    std::env::set_var(DATABASE_ENV, "/tmp/override.db");
    let overridden = JobsConfig::load(&path).unwrap();
    std::env::remove_var(DATABASE_ENV);
    assert_eq!(overridden.database_path, std::path::PathBuf::from("/tmp/override.db"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = JobsConfig::load(dir.path().join("absent.toml")).unwrap();
    assert!(config.sources.is_empty());
    assert_eq!(config.forecast.top_k_movers, 6);
}

#[test]
fn test_invalid_settings_fail_fast() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index-jobs.toml");
    fs::write(&path, "[forecast]\ntraining_window = 0\n").unwrap();
    assert!(matches!(JobsConfig::load(&path), Err(JobsError::Forecast(_))));

    fs::write(
        &path,
        "[[sources]]\ngroup = \"CPI:X\"\nfamily = \"cpi\"\npayload = \"a.json\"\n",
    )
    .unwrap();
    assert!(matches!(JobsConfig::load(&path), Err(JobsError::Config(_))));

    fs::write(&path, "[[sources]]\ngroup = \"CPI\"\nfamily = \"unknown\"\n").unwrap();
    assert!(matches!(JobsConfig::load(&path), Err(JobsError::Toml(_))));
}
