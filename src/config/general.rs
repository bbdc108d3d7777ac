//! The `[general]` section: broker, device identity and timing.

use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;
use sysqtt_mqtt::TransportOptions;
use tracing::info;

use super::ConfigError;
use crate::core::identity::{
    forbidden_topic_char, BrokerIdentity, DeviceIdentity, Topics, DEFAULT_MANUFACTURER,
    DEFAULT_MODEL, OFFLINE, PLATFORM_STATUS_TOPIC,
};

pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_ALLOWED_SENSOR_FAILS: u32 = 0;
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 5000;

/// `[general]` exactly as written; nothing is required at this stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGeneral {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub broker_user: Option<String>,
    pub broker_pass: Option<String>,
    pub device_name: Option<String>,
    pub client_id: Option<String>,
    pub timezone: Option<String>,
    /// Seconds between state publications.
    pub update_interval: Option<u64>,
    /// Seconds between connection attempts.
    #[serde(alias = "retry_time")]
    pub retry_interval: Option<u64>,
    pub allowed_sensor_fails: Option<u32>,
    pub provider_timeout_ms: Option<u64>,
    pub device_manufacturer: Option<String>,
    pub device_model: Option<String>,
    /// Topic Home Assistant publishes its birth message on.
    pub status_topic: Option<String>,
}

/// Validated `[general]` with defaults applied.
#[derive(Clone)]
pub struct GeneralSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_user: String,
    pub broker_pass: String,
    /// Human-readable device name, as configured.
    pub device_name: String,
    /// Slug of `device_name`, used in topics and unique ids.
    pub device_id: String,
    pub client_id: String,
    pub timezone: Tz,
    pub update_interval: Duration,
    pub retry_interval: Duration,
    /// Advisory: exceeding it is logged, nothing is disabled.
    pub allowed_sensor_fails: u32,
    pub provider_timeout: Duration,
    pub device_manufacturer: String,
    pub device_model: String,
    pub status_topic: String,
}

impl std::fmt::Debug for GeneralSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneralSettings")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("broker_user", &self.broker_user)
            .field("broker_pass", &"<redacted>")
            .field("device_name", &self.device_name)
            .field("device_id", &self.device_id)
            .field("client_id", &self.client_id)
            .field("timezone", &self.timezone)
            .field("update_interval", &self.update_interval)
            .field("retry_interval", &self.retry_interval)
            .field("allowed_sensor_fails", &self.allowed_sensor_fails)
            .field("provider_timeout", &self.provider_timeout)
            .field("status_topic", &self.status_topic)
            .finish()
    }
}

/// Lowercase with spaces replaced by underscores.
pub fn slugify(value: &str) -> String {
    value.replace(' ', "_").to_lowercase()
}

fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn with_default<T: std::fmt::Debug + Copy>(value: Option<T>, default: T, field: &str) -> T {
    value.unwrap_or_else(|| {
        info!("'{}' not set in [general], using default {:?}", field, default);
        default
    })
}

fn positive(value: u64, field: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

/// The device slug becomes one topic level, so it must not contain a
/// wildcard or a separator.
fn device_slug(device_name: &str) -> Result<String, ConfigError> {
    let slug = slugify(device_name);
    match forbidden_topic_char(&slug) {
        Some(c) => Err(ConfigError::InvalidValue {
            field: "device_name",
            reason: format!("'{c}' is not allowed in MQTT topics"),
        }),
        None => Ok(slug),
    }
}

/// Subscribed to as a plain topic: separators are fine, wildcards are not.
fn status_topic(raw: &Option<String>) -> Result<String, ConfigError> {
    let Some(topic) = raw.as_deref() else {
        return Ok(PLATFORM_STATUS_TOPIC.to_string());
    };
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "status_topic",
            reason: "must not be empty".into(),
        });
    }
    if let Some(c) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(ConfigError::InvalidValue {
            field: "status_topic",
            reason: format!("'{c}' is not allowed in a topic name"),
        });
    }
    Ok(topic.to_string())
}

impl GeneralSettings {
    /// Checks required fields, reporting every missing one at once, then
    /// applies defaults and validates values.
    pub fn from_raw(raw: &RawGeneral) -> Result<Self, ConfigError> {
        let fields = [
            ("broker_host", required(&raw.broker_host)),
            ("broker_user", required(&raw.broker_user)),
            ("broker_pass", required(&raw.broker_pass)),
            ("device_name", required(&raw.device_name)),
            ("client_id", required(&raw.client_id)),
            ("timezone", required(&raw.timezone)),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }
        let [host, user, pass, device_name, client_id, timezone] =
            fields.map(|(_, value)| value.unwrap_or_default());

        let device_id = device_slug(device_name)?;
        let status_topic = status_topic(&raw.status_topic)?;

        let timezone: Tz = timezone.parse().map_err(|_| ConfigError::InvalidValue {
            field: "timezone",
            reason: format!("'{timezone}' is not an IANA timezone name"),
        })?;

        let broker_port = with_default(raw.broker_port, DEFAULT_BROKER_PORT, "broker_port");
        if broker_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broker_port",
                reason: "must be between 1 and 65535".into(),
            });
        }
        let update_interval = positive(
            with_default(
                raw.update_interval,
                DEFAULT_UPDATE_INTERVAL_SECS,
                "update_interval",
            ),
            "update_interval",
        )?;
        let retry_interval = positive(
            with_default(
                raw.retry_interval,
                DEFAULT_RETRY_INTERVAL_SECS,
                "retry_interval",
            ),
            "retry_interval",
        )?;
        let provider_timeout_ms = positive(
            with_default(
                raw.provider_timeout_ms,
                DEFAULT_PROVIDER_TIMEOUT_MS,
                "provider_timeout_ms",
            ),
            "provider_timeout_ms",
        )?;
        let allowed_sensor_fails = with_default(
            raw.allowed_sensor_fails,
            DEFAULT_ALLOWED_SENSOR_FAILS,
            "allowed_sensor_fails",
        );

        Ok(Self {
            broker_host: host.to_string(),
            broker_port,
            broker_user: user.to_string(),
            broker_pass: pass.to_string(),
            device_name: device_name.to_string(),
            device_id,
            client_id: client_id.to_string(),
            timezone,
            update_interval: Duration::from_secs(update_interval),
            retry_interval: Duration::from_secs(retry_interval),
            allowed_sensor_fails,
            provider_timeout: Duration::from_millis(provider_timeout_ms),
            device_manufacturer: required(&raw.device_manufacturer)
                .unwrap_or(DEFAULT_MANUFACTURER)
                .to_string(),
            device_model: required(&raw.device_model)
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            status_topic,
        })
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            display_name: self.device_name.clone(),
            device_id: self.device_id.clone(),
            manufacturer: self.device_manufacturer.clone(),
            model: self.device_model.clone(),
        }
    }

    pub fn broker_identity(&self) -> BrokerIdentity {
        BrokerIdentity {
            device: self.device_identity(),
            client_id: self.client_id.clone(),
            host: self.broker_host.clone(),
            port: self.broker_port,
            username: self.broker_user.clone(),
            password: self.broker_pass.clone(),
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::for_device(&self.device_id).with_platform_status(&self.status_topic)
    }

    /// Link configuration with credentials and the `offline` last will on
    /// the availability topic.
    pub fn link_config(&self, options: TransportOptions) -> sysqtt_mqtt::Config {
        let topics = self.topics();
        sysqtt_mqtt::Config::new(&self.broker_host, self.broker_port, &self.client_id)
            .with_credentials(&self.broker_user, &self.broker_pass)
            .with_last_will(sysqtt_mqtt::LastWill::new(
                topics.availability_endpoint(),
                OFFLINE,
            ))
            .with_options(options)
    }
}
