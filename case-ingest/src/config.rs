//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by `CASE_INGEST_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::enrichment::EnrichmentPoolConfig;
use crate::error::{Error, Result};
use crate::ingest::SchedulerConfig;
use crate::logging::DEFAULT_LOG_FILTER;
use crate::node::DisplayPreferencesConfig;

const ENV_PREFIX: &str = "CASE_INGEST_";

fn default_file_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_enrichment_pool_size() -> usize {
    10
}

fn default_event_capacity() -> usize {
    256
}

fn default_terminator_poll_ms() -> u64 {
    100
}

fn default_process_timeout_secs() -> u64 {
    process_utils::DEFAULT_PROCESS_TIMEOUT.as_secs()
}

fn default_finished_job_retention() -> usize {
    64
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Files ingested concurrently per data source.
    pub file_workers: usize,
    /// Maximum enrichment tasks running at once.
    pub enrichment_pool_size: usize,
    pub event_capacity: usize,
    pub terminator_poll_ms: u64,
    /// Process timeout used when a job does not set its own.
    pub default_process_timeout_secs: u64,
    pub finished_job_retention: usize,
    pub log_filter: String,
    /// Write rolling log files here when set.
    pub log_dir: Option<PathBuf>,
    pub display: DisplayPreferencesConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            file_workers: default_file_workers(),
            enrichment_pool_size: default_enrichment_pool_size(),
            event_capacity: default_event_capacity(),
            terminator_poll_ms: default_terminator_poll_ms(),
            default_process_timeout_secs: default_process_timeout_secs(),
            finished_job_retention: default_finished_job_retention(),
            log_filter: default_log_filter(),
            log_dir: None,
            display: DisplayPreferencesConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("Failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("Invalid configuration: {e}")))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{key}: {e}")))
        }

        let lookup = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            var(&key).map(|value| (key, value))
        };

        if let Some((key, v)) = lookup("FILE_WORKERS") {
            self.file_workers = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("ENRICHMENT_POOL_SIZE") {
            self.enrichment_pool_size = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("EVENT_CAPACITY") {
            self.event_capacity = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("TERMINATOR_POLL_MS") {
            self.terminator_poll_ms = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("PROCESS_TIMEOUT_SECS") {
            self.default_process_timeout_secs = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("FINISHED_JOB_RETENTION") {
            self.finished_job_retention = parse(&key, &v)?;
        }
        if let Some((_, v)) = lookup("LOG_FILTER") {
            self.log_filter = v;
        }
        if let Some((_, v)) = lookup("LOG_DIR") {
            self.log_dir = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some((key, v)) = lookup("DISPLAY_TRANSLATED_NAMES") {
            self.display.display_translated_names = parse(&key, &v)?;
        }
        if let Some((key, v)) = lookup("HIDE_CASE_REPOSITORY_COMMENTS") {
            self.display.hide_case_repository_comments_and_occurrences = parse(&key, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("file_workers", self.file_workers as u64),
            ("enrichment_pool_size", self.enrichment_pool_size as u64),
            ("event_capacity", self.event_capacity as u64),
            ("terminator_poll_ms", self.terminator_poll_ms),
            ("default_process_timeout_secs", self.default_process_timeout_secs),
            ("finished_job_retention", self.finished_job_retention as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }
        Ok(())
    }

    /// Install the process-wide default process timeout.
    pub fn apply_process_defaults(&self) {
        let timeout = Duration::from_secs(self.default_process_timeout_secs);
        process_utils::set_default_timeout(timeout);
        debug!(timeout_secs = self.default_process_timeout_secs, "Default process timeout set");
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            file_workers: self.file_workers,
            event_capacity: self.event_capacity,
            terminator_poll_ms: self.terminator_poll_ms,
            finished_job_retention: self.finished_job_retention,
        }
    }

    pub fn enrichment_config(&self) -> EnrichmentPoolConfig {
        EnrichmentPoolConfig {
            max_in_flight: self.enrichment_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.enrichment_pool_size, 10);
        assert_eq!(config.default_process_timeout_secs, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = IngestConfig::from_toml(
            r#"
            file_workers = 2
            log_dir = "/var/log/case-ingest"

            [display]
            display_translated_names = true
            "#,
        )
        .unwrap();

        assert_eq!(config.file_workers, 2);
        assert_eq!(config.enrichment_pool_size, 10);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/case-ingest")));
        assert!(config.display.display_translated_names);
        assert!(!config.display.hide_case_repository_comments_and_occurrences);
        assert_eq!(config.scheduler_config().file_workers, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<_, _> = [
            ("CASE_INGEST_FILE_WORKERS", "3"),
            ("CASE_INGEST_PROCESS_TIMEOUT_SECS", "60"),
            ("CASE_INGEST_DISPLAY_TRANSLATED_NAMES", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = IngestConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.file_workers, 3);
        assert_eq!(config.default_process_timeout_secs, 60);
        assert!(config.display.display_translated_names);

        let err = config
            .apply_env(|key| (key == "CASE_INGEST_FILE_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CASE_INGEST_FILE_WORKERS"));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = IngestConfig {
            file_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case-ingest.toml");
        std::fs::write(&path, "enrichment_pool_size = 4\n").unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.enrichment_pool_size, 4);
        assert!(IngestConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
