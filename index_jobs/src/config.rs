//! Job configuration loaded from TOML
//!
//! ```toml
//! database_path = "index.db"
//!
//! [forecast]
//! training_window = 24
//! curated_codes = ["IS01", "IS04"]
//!
//! [[sources]]
//! group = "CPI"
//! family = "cpi"
//! payload = "payloads/cpi.json"
//! previous_vintage = "payloads/cpi_1988.json"
//! weights = "payloads/cpi_weights.json"
//!
//! [sources.labels]
//! IS01 = "Food and non-alcoholic beverages"
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use crate::{JobsError, Result};
use index_forecast::data::SeriesMeta;
use index_forecast::normalize::{RawPayload, SourceFamily};
use index_forecast::settings::ForecastSettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_PATH: &str = "index.db";

/// Environment variable overriding `database_path`
pub const DATABASE_ENV: &str = "INDEX_DB";

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

/// Top-level job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub forecast: ForecastSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            forecast: ForecastSettings::default(),
            sources: Vec::new(),
        }
    }
}

/// One upstream table saved as a PX-JSON payload
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub group: String,
    pub family: SourceFamily,
    pub payload: PathBuf,
    /// Older vintage of the total series, spliced under the payload
    #[serde(default)]
    pub previous_vintage: Option<PathBuf>,
    /// Category weights table in the same layout as the payload
    #[serde(default)]
    pub weights: Option<PathBuf>,
    #[serde(default)]
    pub total_code: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl SourceConfig {
    /// Code of the aggregate series, defaulting to the family's
    pub fn total_code(&self) -> &str {
        self.total_code
            .as_deref()
            .unwrap_or_else(|| self.family.total_code())
    }

    pub fn labels(&self) -> Vec<SeriesMeta> {
        self.labels
            .iter()
            .map(|(code, label)| SeriesMeta::new(code.clone(), Some(label)))
            .collect()
    }

    pub fn load_payload(&self) -> Result<RawPayload> {
        read_payload(&self.payload)
    }

    pub fn load_previous_vintage(&self) -> Result<Option<RawPayload>> {
        self.previous_vintage.as_deref().map(read_payload).transpose()
    }

    pub fn load_weights(&self) -> Result<Option<RawPayload>> {
        self.weights.as_deref().map(read_payload).transpose()
    }
}

fn read_payload(path: &Path) -> Result<RawPayload> {
    let file = File::open(path).map_err(|err| JobsError::io(path, err))?;
    Ok(RawPayload::from_reader(BufReader::new(file))?)
}

impl JobsConfig {
    /// Load `path`; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).map_err(|err| JobsError::io(path, err))?;
        let mut config = Self::from_toml_str(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Use `INDEX_DB` as the database path when set and non-empty
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                self.database_path = PathBuf::from(trimmed);
            }
        }
    }

    /// Make relative paths relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.database_path);
        for source in &mut self.sources {
            resolve(&mut source.payload);
            if let Some(previous) = source.previous_vintage.as_mut() {
                resolve(previous);
            }
            if let Some(weights) = source.weights.as_mut() {
                resolve(weights);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.forecast.validate()?;
        let mut seen = Vec::new();
        for source in &self.sources {
            if source.group.trim().is_empty() {
                return Err(JobsError::Config("source group must not be empty".to_string()));
            }
            if source.group.contains(':') {
                return Err(JobsError::Config(format!(
                    "source group {} must not contain ':'",
                    source.group
                )));
            }
            if seen.contains(&source.group.as_str()) {
                return Err(JobsError::Config(format!(
                    "source group {} is configured twice",
                    source.group
                )));
            }
            seen.push(source.group.as_str());
        }
        Ok(())
    }

    pub fn source(&self, group: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.group == group)
    }

    /// Sources matching `group`, or all of them
    pub fn sources_for(&self, group: Option<&str>) -> Result<Vec<&SourceConfig>> {
        match group {
            Some(group) => self
                .source(group)
                .map(|s| vec![s])
                .ok_or_else(|| JobsError::Config(format!("no source configured for group {}", group))),
            None => Ok(self.sources.iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = JobsConfig::from_toml_str("").unwrap();
        assert_eq!(config.database_path, PathBuf::from("index.db"));
        assert_eq!(config.forecast, ForecastSettings::default());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn duplicate_groups_are_rejected() {
        let config = JobsConfig::from_toml_str(
            r#"
            [[sources]]
            group = "CPI"
            family = "cpi"
            payload = "a.json"

            [[sources]]
            group = "CPI"
            family = "cpi"
            payload = "b.json"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(JobsError::Config(_))));
    }

    #[test]
    fn total_code_falls_back_to_family() {
        let config = JobsConfig::from_toml_str(
            r#"
            [[sources]]
            group = "WAGE"
            family = "wage"
            payload = "wages.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.sources[0].total_code(), "TOTAL");
        assert!(config.sources_for(Some("CPI")).is_err());
    }
}
