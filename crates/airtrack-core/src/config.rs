//! Configuration for airtrack
//!
//! Loaded from TOML. Every section is optional; missing keys take their
//! defaults.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [rrd]
//! aggregator = "peak_signal"
//! update_before_serialize = false
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::{Aggregator, AggregatorKind};
use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Ring-buffer defaults applied to RRDs built from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrdConfig {
    /// Fast-forward with the policy default before each export
    pub update_before_serialize: bool,
    /// Aggregation policy for new RRDs
    pub aggregator: AggregatorKind,
}

impl Default for RrdConfig {
    fn default() -> Self {
        Self {
            update_before_serialize: default_update_before_serialize(),
            aggregator: AggregatorKind::default(),
        }
    }
}

fn default_update_before_serialize() -> bool {
    true
}

impl RrdConfig {
    /// Policy instance for the configured aggregator.
    #[must_use]
    pub fn build_aggregator(&self) -> Arc<dyn Aggregator> {
        self.aggregator.build()
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Logging configuration
    pub logging: LogConfig,
    /// RRD defaults
    pub rrd: RrdConfig,
}

impl TrackerConfig {
    /// Read and parse a TOML file, then validate it.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse TOML text, then validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no subsystem can use.
    pub fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level",
                message: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }
}
