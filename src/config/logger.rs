//! Logging configuration structures and validation logic.
//!
//! All structures deserialize from the `[logger]` table and are checked with
//! the `validator` crate before the subscriber is installed.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Available formats for console log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// How each console line is timestamped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// Wall-clock time, RFC 3339.
    #[default]
    Rfc3339,
    /// Time since the process started.
    Uptime,
    /// No timestamp, useful under journald which stamps entries itself.
    None,
}

/// Top-level logging configuration.
///
/// Controls global log level, timestamp format, and output targets (console and/or journald).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// Global log level. Valid values: trace, debug, info, warn, error (case-insensitive).
    /// Overridden by `RUST_LOG` when set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,

    pub timestamp_format: TimestampFormat,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some(format!("Invalid log level: {}", level).into());
            Err(err)
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            timestamp_format: TimestampFormat::default(),
            console: Some(ConsoleConfig::default()),
            journald: Some(JournaldConfig::default()),
        }
    }
}

impl LoggerConfig {
    pub fn console_enabled(&self) -> bool {
        self.console.as_ref().is_some_and(|c| c.enabled)
    }

    pub fn journald_enabled(&self) -> bool {
        self.journald.as_ref().is_some_and(|j| j.enabled)
    }
}

/// Configuration for console log output.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    pub format: LogFormat,

    /// Include the log target (module path) in output.
    pub show_target: bool,

    pub show_thread_ids: bool,

    /// Include span close events in output.
    pub show_spans: bool,

    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

/// Configuration for systemd journald output.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JournaldConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Syslog identifier attached to journal entries.
    #[validate(length(min = 1))]
    #[serde(default = "default_identifier")]
    pub identifier: String,
}

fn default_identifier() -> String {
    "sysqtt".to_string()
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: default_identifier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_console_only() {
        let config = LoggerConfig::default();
        assert!(config.console_enabled());
        assert!(!config.journald_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn level_is_case_insensitive() {
        let config = LoggerConfig {
            level: "DEBUG".into(),
            ..LoggerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_journald_identifier_is_rejected() {
        let config = LoggerConfig {
            journald: Some(JournaldConfig {
                enabled: true,
                identifier: String::new(),
            }),
            ..LoggerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_lowercase_variants() {
        let config: LoggerConfig = toml::from_str(
            r#"
            level = "warn"
            timestamp_format = "uptime"

            [console]
            format = "json"

            [journald]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.timestamp_format, TimestampFormat::Uptime);
        assert_eq!(config.console.unwrap().format, LogFormat::Json);
        assert_eq!(config.journald.unwrap().identifier, "sysqtt");
    }
}
