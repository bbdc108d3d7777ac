//! Configuration loading and validation.
//!
//! The configuration file is TOML with these sections:
//!
//! - `[general]` broker connection, device identity and timing
//! - `[sensors]` sensor id to mode (`true`/`false`, `"on"`, `"off"`, `"dynamic"`, `"static"`)
//! - `[disk_mounted]` label to filesystem path, optional
//! - `[logger]` and `[transport]`, optional
//!
//! Parsing only checks TOML syntax and the typed `[logger]`/`[transport]`
//! tables. The `[general]` and `[sensors]` sections are checked by the registry
//! builder so every problem can be reported together with sensor warnings.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use sysqtt_mqtt::TransportOptions;
use validator::Validate;

use crate::config::{general::RawGeneral, logger::LoggerConfig};

pub mod general;
pub mod logger;
pub mod sensors;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SYSQTT_CONFIG";

/// Searched in order when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["/etc/sysqtt/config.toml", "config.toml"];

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[doc(hidden)]
pub fn early_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_else(|_| String::from("----------T--:--:--.------Z"))
}

/// Errors that make the configuration unusable. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing configuration section [{0}]")]
    MissingSection(&'static str),

    #[error("Missing required fields in [general]: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Sensor catalog error: {0}")]
    Catalog(String),
}

/// The configuration file as written by the user.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ConfigDocument {
    /// Alternative sensor catalog (JSON) replacing the bundled one.
    pub catalog: Option<PathBuf>,

    pub general: Option<RawGeneral>,

    /// Kept as a raw table so invalid modes can be reported per sensor.
    pub sensors: Option<toml::Table>,

    pub disk_mounted: Option<toml::Table>,

    #[serde(default)]
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub transport: TransportOptions,
}

impl ConfigDocument {
    /// Locates and loads the configuration file.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Priority:
    /// 1. `SYSQTT_CONFIG` environment variable
    /// 2. `/etc/sysqtt/config.toml`
    /// 3. `./config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                print_info!("Using default config path: {}", path.display());
                return Ok(path.to_path_buf());
            }
        }

        Err(ConfigError::Config(format!(
            "No configuration file found. Set {} or create one of: {}",
            CONFIG_ENV,
            DEFAULT_CONFIG_PATHS.join(", ")
        )))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let document = Self::from_toml_str(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(document)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        document
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(document)
    }
}
