//! Emulator configuration.
//!
//! Settings are read from a JSON file; every field is optional:
//!
//! ```json
//! { "delay_ms": 100, "start_paused": false, "max_cycles": 100000, "log_level": "info" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Verbosity of diagnostic logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    #[default]
    Warning,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(LogLevel::Critical),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::InvalidValue {
                field: "log_level",
                value: s.to_string(),
            }),
        }
    }
}

/// Runtime settings for the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Sleep before every micro-step, in milliseconds.
    pub delay_ms: u64,
    /// Start with execution paused (single-step from the beginning).
    pub start_paused: bool,
    /// Stop after this many clock cycles.
    pub max_cycles: Option<u64>,
    pub log_level: LogLevel,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            start_paused: false,
            max_cycles: None,
            log_level: LogLevel::Warning,
        }
    }
}

impl EmulatorConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Errors that can occur while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmulatorConfig::from_json("{}").unwrap();
        assert_eq!(config, EmulatorConfig::default());
        assert_eq!(config.log_level, LogLevel::Warning);
    }

    #[test]
    fn test_partial_json() {
        let config =
            EmulatorConfig::from_json(r#"{ "delay_ms": 250, "log_level": "debug" }"#).unwrap();
        assert_eq!(config.delay_ms, 250);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.start_paused);
        assert_eq!(config.max_cycles, None);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EmulatorConfig {
            delay_ms: 10,
            start_paused: true,
            max_cycles: Some(500),
            log_level: LogLevel::Trace,
        };
        let json = config.to_json().unwrap();
        assert_eq!(EmulatorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EmulatorConfig::from_json(r#"{ "delay_ms": "fast" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
