use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics::payload::DEFAULT_COLLECTION;
use crate::metrics::timer::TimerMode;

pub const WRITE_KEY_ENV: &str = "KEEN_PROJECT_WRITE_KEY";
pub const PROJECT_ID_ENV: &str = "KEEN_PROJECT_ID";

/// Main stepmetrics configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub keen: KeenConfig,
    pub delivery: DeliveryConfig,
    pub tracking: TrackingConfig,
    pub sinks: Vec<Sink>,
    /// JSONL file for the file sink
    pub output: PathBuf,
    pub log_level: LogLevel,
}

/// Ingestion backend credentials and location
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeenConfig {
    pub project_write_key: String,
    pub project_id: String,
    pub collection: String,
    pub api_url: String,
}

impl fmt::Debug for KeenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeenConfig")
            .field("project_write_key", &redact(&self.project_write_key))
            .field("project_id", &self.project_id)
            .field("collection", &self.collection)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// How records reach the sinks
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// One request per record, on the caller's thread
    Direct,
    /// Buffered on a worker thread and flushed in batches
    #[default]
    Batched,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    /// Flush once this many records are buffered
    pub batch_size: usize,
    /// Flush at least this often while records are buffered
    pub flush_interval_ms: u64,
    /// Upper bound for a single backend request
    pub flush_timeout_ms: u64,
    /// Records that may wait for the worker before new ones are dropped
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub mode: TimerMode,
}

/// Where records are sent
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sink {
    /// Keen IO event API
    Keen,
    /// Append to a JSONL file
    File,
    /// Print to stdout
    Stdout,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

/// Missing backend credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    MissingWriteKey,
    MissingProjectId,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingWriteKey => write!(f, "No Keen project write key specified"),
            ConfigError::MissingProjectId => write!(f, "No Keen project id specified"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            keen: KeenConfig::default(),
            delivery: DeliveryConfig::default(),
            tracking: TrackingConfig::default(),
            sinks: vec![Sink::Keen],
            output: Self::stepmetrics_dir().join("records.jsonl"),
            log_level: LogLevel::default(),
        }
    }
}

impl Default for KeenConfig {
    fn default() -> Self {
        Self {
            project_write_key: String::new(),
            project_id: String::new(),
            collection: DEFAULT_COLLECTION.to_string(),
            api_url: "https://api.keen.io/3.0".to_string(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Batched,
            batch_size: 50,
            flush_interval_ms: 5_000,
            flush_timeout_ms: 10_000,
            queue_capacity: 1_000,
        }
    }
}

impl KeenConfig {
    /// Check that both credentials are present
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.project_write_key.trim().is_empty() {
            return Err(ConfigError::MissingWriteKey);
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        Ok(())
    }

    /// Copy with the write key masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            project_write_key: redact(&self.project_write_key),
            ..self.clone()
        }
    }
}

impl DeliveryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms.max(1))
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply env overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Ok(env_path) = std::env::var("STEPMETRICS_CONFIG") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from STEPMETRICS_CONFIG: {}", e);
                    }
                }
            }
        }

        if let Ok(dir) = std::env::var("STEPMETRICS_DIR") {
            let path = PathBuf::from(dir).join("stepmetrics.yaml");
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from STEPMETRICS_DIR: {}", e);
                    }
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("stepmetrics").join("stepmetrics.yaml");
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Try ./stepmetrics.yaml (for development)
        let local_config = PathBuf::from("stepmetrics.yaml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load local config: {}", e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(WRITE_KEY_ENV)
            && !key.is_empty()
        {
            self.keen.project_write_key = key;
        }
        if let Ok(id) = std::env::var(PROJECT_ID_ENV)
            && !id.is_empty()
        {
            self.keen.project_id = id;
        }
    }

    /// Directory holding stepmetrics config and default output
    pub fn stepmetrics_dir() -> PathBuf {
        std::env::var("STEPMETRICS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("stepmetrics"))
    }

    /// Expand a path that may contain ~ or env vars
    pub fn expand_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = shellexpand::full(&path_str).unwrap_or_else(|_| path_str.clone());
        PathBuf::from(expanded.as_ref())
    }
}
