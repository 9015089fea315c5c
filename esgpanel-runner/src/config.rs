//! Pipeline configuration.
//!
//! `PipelineConfig` is the serializable settings file (TOML). Resolving it
//! reads the instrument and field lists from disk, applies the exclusion
//! lists and yields an immutable `ResolvedConfig` that is passed explicitly to
//! every stage of the pipeline.

use chrono::{Datelike, NaiveDate};
use esgpanel_core::{
    split_in_chunks, unique_in_order, ChunkError, HistoryParams, RetryPolicy, YearRange,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required input file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Connection settings for the HTTP data gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/api".into(),
            api_key_env: Some("ESGPANEL_API_KEY".into()),
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Settings file for one download run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of all outputs; datasets are written under `{data_dir}/datasets`.
    pub data_dir: PathBuf,

    pub instruments_file: PathBuf,
    pub static_fields_file: PathBuf,
    pub historic_fields_file: PathBuf,
    pub removed_instruments_file: Option<PathBuf>,
    pub removed_fields_file: Option<PathBuf>,

    /// First day of the panel (inclusive).
    pub start_date: NaiveDate,
    /// Last day of the panel (inclusive).
    pub end_date: NaiveDate,

    pub instrument_chunk_size_static: usize,
    pub instrument_chunk_size_historic: usize,
    pub static_field_chunk_size: usize,
    pub historic_field_chunk_size: usize,
    /// Applied to the instrument chunks of both paths.
    pub skip_chunks: usize,
    /// Applied to the instrument chunks of both paths. Absolute stop index
    /// when combined with `skip_chunks`.
    pub chunk_limit: usize,

    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub retry_backoff_multiplier: f64,

    pub provider: ProviderConfig,
    /// Overrides for the time-series request parameters.
    pub history_parameters: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        let features = data_dir.join("features");
        Self {
            instruments_file: features.join("companies.txt"),
            static_fields_file: features.join("static_features.txt"),
            historic_fields_file: features.join("historic_features.txt"),
            removed_instruments_file: None,
            removed_fields_file: None,
            data_dir,
            start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            instrument_chunk_size_static: 50,
            instrument_chunk_size_historic: 10,
            static_field_chunk_size: 100,
            historic_field_chunk_size: 10,
            skip_chunks: 0,
            chunk_limit: 0,
            max_workers: 10,
            max_retries: 10,
            retry_delay_secs: 1.0,
            retry_backoff_multiplier: 2.0,
            provider: ProviderConfig::default(),
            history_parameters: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_existing(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string. Unset keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check value ranges. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("instrument_chunk_size_static", self.instrument_chunk_size_static),
            ("instrument_chunk_size_historic", self.instrument_chunk_size_historic),
            ("static_field_chunk_size", self.static_field_chunk_size),
            ("historic_field_chunk_size", self.historic_field_chunk_size),
            ("max_workers", self.max_workers),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if !self.retry_delay_secs.is_finite() || self.retry_delay_secs < 0.0 {
            return Err(invalid("retry_delay_secs", "must be a non-negative number"));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier <= 0.0 {
            return Err(invalid("retry_backoff_multiplier", "must be a positive number"));
        }
        if self.start_date > self.end_date {
            return Err(invalid(
                "start_date",
                format!("{} is after end_date {}", self.start_date, self.end_date),
            ));
        }
        Ok(())
    }

    pub fn year_range(&self) -> Result<YearRange, ConfigError> {
        YearRange::new(self.start_date, self.end_date)
            .ok_or_else(|| invalid("start_date", "must not be after end_date"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or_default(),
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Yearly fiscal-period request parameters covering the configured range,
    /// with any configured overrides applied on top.
    pub fn history_params(&self) -> HistoryParams {
        let mut params = HistoryParams::new();
        params.insert("SDate".into(), format!("CY{}", self.start_date.year()));
        params.insert("EDate".into(), format!("CY{}", self.end_date.year()));
        params.insert("Period".into(), "FY0".into());
        params.insert("Frq".into(), "CY".into());
        params.extend(self.history_parameters.clone());
        params
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    /// Validate, read every list file and apply the exclusion lists.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let instruments = read_list(&self.instruments_file)?;
        let static_fields = read_list(&self.static_fields_file)?;
        let historic_fields = read_list(&self.historic_fields_file)?;
        let removed_instruments = self
            .removed_instruments_file
            .as_deref()
            .map(read_list)
            .transpose()?
            .unwrap_or_default();
        let removed_fields = self
            .removed_fields_file
            .as_deref()
            .map(read_list)
            .transpose()?
            .unwrap_or_default();

        ResolvedConfig::from_lists(
            self,
            exclude(instruments, &removed_instruments),
            exclude(static_fields, &removed_fields),
            exclude(historic_fields, &removed_fields),
        )
    }
}

/// Settings plus the loaded lists; immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub settings: PipelineConfig,
    pub instruments: Vec<String>,
    pub static_fields: Vec<String>,
    pub historic_fields: Vec<String>,
}

impl ResolvedConfig {
    /// Build from in-memory lists. Lists are de-duplicated preserving order.
    pub fn from_lists(
        settings: PipelineConfig,
        instruments: Vec<String>,
        static_fields: Vec<String>,
        historic_fields: Vec<String>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            instruments: unique_in_order(&instruments),
            static_fields: unique_in_order(&static_fields),
            historic_fields: unique_in_order(&historic_fields),
        })
    }

    /// Number of instrument chunks a run requests: (static, historic).
    /// Honours `chunk_limit` and `skip_chunks`.
    pub fn planned_chunks(&self) -> Result<(usize, usize), ChunkError> {
        let s = &self.settings;
        let plan = |size| split_in_chunks(&self.instruments, size, s.chunk_limit, s.skip_chunks);
        Ok((
            plan(s.instrument_chunk_size_static)?.len(),
            plan(s.instrument_chunk_size_historic)?.len(),
        ))
    }
}

/// Read a list file: one entry per line, surrounding whitespace and blank
/// lines ignored.
pub fn read_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = read_existing(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn read_existing(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingFile(path.to_path_buf())
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn exclude(items: Vec<String>, removed: &[String]) -> Vec<String> {
    if removed.is_empty() {
        return items;
    }
    let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
    items
        .into_iter()
        .filter(|item| !removed.contains(item.as_str()))
        .collect()
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
