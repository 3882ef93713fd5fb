//! Run configuration
//!
//! A run is configured from an optional TOML file, then overridden by
//! command-line flags. Every field has a default, so an empty file is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Options for one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Glob pattern selecting the keys to copy
    pub pattern: String,

    /// Key enumeration method
    pub key_emitter: EmitterChoice,

    /// Value transfer method
    pub strategy: StrategyChoice,

    /// Percentage of copied keys to verify (0-100)
    pub verify_percent: u8,

    /// Group the writes for one key into a single round trip
    pub pipeline: bool,

    /// Stop at the first failed copy or verification
    pub fail_fast: bool,

    /// Allow copying into a destination that already holds keys
    pub allow_nonempty: bool,

    /// Ask the operator before starting
    pub prompt: bool,

    /// Emit per-key debug notifications
    pub debug: bool,

    /// Keys requested per cursor scan call
    pub scan_batch_size: usize,

    /// Attempts between progress notifications
    pub progress_interval: u64,

    /// Allowed TTL drift between source and destination, in seconds
    pub ttl_tolerance_secs: u64,

    /// Source key count above which a full scan needs confirmation
    pub full_scan_confirm_threshold: u64,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            key_emitter: EmitterChoice::Auto,
            strategy: StrategyChoice::Auto,
            verify_percent: 0,
            pipeline: true,
            fail_fast: false,
            allow_nonempty: false,
            prompt: true,
            debug: false,
            scan_batch_size: 1000,
            progress_interval: 1000,
            ttl_tolerance_secs: 1,
            full_scan_confirm_threshold: 10_000,
            logging: LoggingConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CopyError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| CopyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| CopyError::Config(format!("Failed to render config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.verify_percent > 100 {
            return Err(CopyError::Config(format!(
                "verify_percent must be between 0 and 100, got {}",
                self.verify_percent
            )));
        }
        if self.pattern.is_empty() {
            return Err(CopyError::Config("Pattern cannot be empty".to_string()));
        }
        if self.scan_batch_size == 0 {
            return Err(CopyError::Config(
                "Scan batch size cannot be 0".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(CopyError::Config(
                "Progress interval cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Requested key emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmitterChoice {
    /// Cursor scan when the source supports it, else full scan
    #[default]
    Auto,
    /// Always use a single `KEYS` call
    FullScan,
    /// Always use `SCAN`
    CursorScan,
}

/// Requested transfer strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyChoice {
    /// Snapshot when both endpoints support it, else classic
    #[default]
    Auto,
    /// Type-specific reads and writes
    Classic,
    /// `DUMP` / `RESTORE`
    Snapshot,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}
