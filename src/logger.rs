//! Logging initialization.
//!
//! The `LoggerManager` validates logging configuration and installs the
//! global `tracing` subscriber with a console layer, a journald layer, or
//! both. `RUST_LOG` takes precedence over the configured level.

use std::io;

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::FormatTime},
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald was the only output and could not be opened.
    #[error("Failed to initialize journald logger and console output is disabled")]
    JournaldFailedWithConsoleDisabled,
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Validates `config`.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once, before anything logs.
    ///
    /// # Errors
    ///
    /// Fails when no layer could be built, or when journald cannot be opened
    /// and it is the only enabled output.
    pub fn init(&self) -> Result<(), LoggerError> {
        let layers = self.layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(console_layer(
                console,
                &self.config.timestamp_format,
                self.filter(),
            ));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match tracing_journald::layer() {
                Ok(layer) => {
                    let layer = layer.with_syslog_identifier(journald.identifier.clone());
                    layers.push(layer.with_filter(self.filter()).boxed());
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if !self.config.console_enabled() {
                        return Err(LoggerError::JournaldFailedWithConsoleDisabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }
}

fn console_layer(
    config: &ConsoleConfig,
    timestamp: &TimestampFormat,
    filter: EnvFilter,
) -> BoxedLayer {
    match timestamp {
        TimestampFormat::Rfc3339 => formatted(config, fmt::time::SystemTime, filter),
        TimestampFormat::Uptime => formatted(config, fmt::time::Uptime::default(), filter),
        TimestampFormat::None => formatted(config, (), filter),
    }
}

fn formatted<T>(config: &ConsoleConfig, timer: T, filter: EnvFilter) -> BoxedLayer
where
    T: FormatTime + Send + Sync + 'static,
{
    let spans = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer()
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(spans)
        .with_ansi(config.ansi_colors)
        .with_writer(io::stdout)
        .with_timer(timer);

    match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::logger::JournaldConfig;

    #[test]
    fn new_rejects_invalid_level() {
        let config = LoggerConfig {
            level: "chatty".into(),
            ..LoggerConfig::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn no_outputs_is_an_error() {
        let config = LoggerConfig {
            console: None,
            journald: None,
            ..LoggerConfig::default()
        };
        let manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.layers(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }

    #[test]
    fn console_layer_is_built_for_every_format() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            for timestamp in [
                TimestampFormat::Rfc3339,
                TimestampFormat::Uptime,
                TimestampFormat::None,
            ] {
                let config = LoggerConfig {
                    console: Some(ConsoleConfig {
                        format: format.clone(),
                        ..ConsoleConfig::default()
                    }),
                    journald: Some(JournaldConfig::default()),
                    timestamp_format: timestamp,
                    ..LoggerConfig::default()
                };
                let manager = LoggerManager::new(config).unwrap();
                assert_eq!(manager.layers().unwrap().len(), 1);
            }
        }
    }
}
