//! Configuration management for the aggregation engine
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Engine behaviour
    #[serde(default)]
    pub engine: EngineSection,

    /// Record ingestion
    #[serde(default)]
    pub ingestion: IngestionSection,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    /// Re-check group invariants after every filter change
    #[serde(default)]
    pub verify_invariants: bool,

    /// Default `k` for top-N listings
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

/// Ingestion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionSection {
    /// chrono format string for date columns
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Trim surrounding whitespace before coercion
    #[serde(default = "default_true")]
    pub trim_whitespace: bool,

    /// Maximum rows per batch (0 = unlimited)
    #[serde(default)]
    pub max_rows: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSection {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_top_k() -> usize { 10 }
fn default_date_format() -> String { "%m/%d/%Y".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            verify_invariants: false,
            default_top_k: default_top_k(),
        }
    }
}

impl Default for IngestionSection {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            trim_whitespace: true,
            max_rows: 0,
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Engine
        if let Ok(verify) = std::env::var("CROSSAGG_VERIFY_INVARIANTS") {
            if let Ok(v) = verify.parse() {
                self.engine.verify_invariants = v;
            }
        }
        if let Ok(top_k) = std::env::var("CROSSAGG_DEFAULT_TOP_K") {
            if let Ok(k) = top_k.parse() {
                self.engine.default_top_k = k;
            }
        }

        // Ingestion
        if let Ok(format) = std::env::var("CROSSAGG_DATE_FORMAT") {
            self.ingestion.date_format = format;
        }
        if let Ok(max_rows) = std::env::var("CROSSAGG_MAX_ROWS") {
            if let Ok(n) = max_rows.parse() {
                self.ingestion.max_rows = n;
            }
        }

        // Monitoring
        if let Ok(enabled) = std::env::var("CROSSAGG_METRICS_ENABLED") {
            if let Ok(v) = enabled.parse() {
                self.monitoring.metrics_enabled = v;
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.default_top_k == 0 {
            return Err(Error::Configuration(
                "Default top-k must be > 0".to_string(),
            ));
        }

        if self.ingestion.date_format.trim().is_empty() {
            return Err(Error::Configuration(
                "Date format cannot be empty".to_string(),
            ));
        }

        // chrono accepts any format string; a round trip catches unusable ones
        let probe = chrono::NaiveDate::from_ymd_opt(2014, 3, 31)
            .map(|d| d.format(&self.ingestion.date_format).to_string());
        let parses_back = probe
            .as_deref()
            .map(|s| chrono::NaiveDate::parse_from_str(s, &self.ingestion.date_format).is_ok())
            .unwrap_or(false);
        if !parses_back {
            return Err(Error::Configuration(format!(
                "Date format '{}' cannot round-trip a date",
                self.ingestion.date_format
            )));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}
