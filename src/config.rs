//! Configuration for kubeplay
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/kubeplay/kubeplay.toml)
//! - User configuration (~/.kubeplay/config.toml)
//! - Project configuration (./kubeplay.toml)
//! - Environment variables
//!
//! Command-line flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::ExecutorConfig;
use crate::store::DEFAULT_NAMESPACE;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution defaults
    pub defaults: Defaults,

    /// Progress and log output
    pub output: OutputConfig,
}

/// Execution defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Upper bound for a single task, e.g. "60m" or "90s"
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,

    /// Retries of a status update after a version conflict
    pub conflict_retries: u32,

    /// Directory relative paths are resolved against
    pub work_dir: Option<PathBuf>,

    /// Namespace work orders are created in
    pub namespace: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60 * 60),
            conflict_retries: 5,
            work_dir: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Format of diagnostic log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Color the progress stream
    pub color: bool,

    /// Diagnostic log format
    pub log_format: LogFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            color: true,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge(Self::from_file(&path)?);
            } else if config_path == Some(&path) {
                anyhow::bail!("config file not found: {}", path.display());
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/kubeplay/kubeplay.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".kubeplay/config.toml"));
        }
        paths.push(PathBuf::from("kubeplay.toml"));
        paths
    }

    /// Read a single configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(config)
    }

    /// Merge another config into this one; values that differ from the
    /// defaults in `other` win
    fn merge(&self, other: Config) -> Config {
        let defaults = Defaults::default();
        let output = OutputConfig::default();
        Config {
            defaults: Defaults {
                task_timeout: if other.defaults.task_timeout != defaults.task_timeout {
                    other.defaults.task_timeout
                } else {
                    self.defaults.task_timeout
                },
                conflict_retries: if other.defaults.conflict_retries != defaults.conflict_retries {
                    other.defaults.conflict_retries
                } else {
                    self.defaults.conflict_retries
                },
                work_dir: other
                    .defaults
                    .work_dir
                    .or_else(|| self.defaults.work_dir.clone()),
                namespace: if other.defaults.namespace != defaults.namespace {
                    other.defaults.namespace
                } else {
                    self.defaults.namespace.clone()
                },
            },
            output: OutputConfig {
                color: if other.output.color != output.color {
                    other.output.color
                } else {
                    self.output.color
                },
                log_format: if other.output.log_format != output.log_format {
                    other.output.log_format
                } else {
                    self.output.log_format
                },
            },
        }
    }

    /// Apply environment variable overrides read through `lookup`
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = lookup("KUBEPLAY_TASK_TIMEOUT") {
            match humantime_serde::re::humantime::parse_duration(&timeout) {
                Ok(d) => self.defaults.task_timeout = d,
                Err(e) => tracing::warn!(value = %timeout, error = %e, "ignoring KUBEPLAY_TASK_TIMEOUT"),
            }
        }

        if let Some(dir) = lookup("KUBEPLAY_WORK_DIR") {
            self.defaults.work_dir = Some(PathBuf::from(dir));
        }

        if lookup("NO_COLOR").is_some() || lookup("KUBEPLAY_NO_COLOR").is_some() {
            self.output.color = false;
        }

        if let Some(format) = lookup("KUBEPLAY_LOG_FORMAT") {
            match format.parse() {
                Ok(f) => self.output.log_format = f,
                Err(e) => tracing::warn!(error = %e, "ignoring KUBEPLAY_LOG_FORMAT"),
            }
        }
    }

    /// Executor settings derived from this configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            task_timeout: self.defaults.task_timeout,
            conflict_retries: self.defaults.conflict_retries,
            namespace: self.defaults.namespace.clone(),
        }
    }
}
