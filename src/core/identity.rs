//! Device and broker identity, and the topics derived from them.

use std::fmt;

use sysqtt_mqtt::EndpointMetadata;

pub const DISCOVERY_PREFIX: &str = "homeassistant";
/// Home Assistant publishes `online` here when it (re)starts.
pub const PLATFORM_STATUS_TOPIC: &str = "homeassistant/status";
pub const STATE_PREFIX: &str = "sys-qtt/sensor";

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

pub const DEFAULT_MANUFACTURER: &str = "Sys-QTT";
pub const DEFAULT_MODEL: &str = "System Metrics MQTT Client";

/// The device every sensor is grouped under in Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub display_name: String,
    /// Slug of `display_name`.
    pub device_id: String,
    pub manufacturer: String,
    pub model: String,
}

#[derive(Clone)]
pub struct BrokerIdentity {
    pub device: DeviceIdentity,
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BrokerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerIdentity")
            .field("device", &self.device)
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-device topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub state: String,
    pub availability: String,
    pub platform_status: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            state: format!("{STATE_PREFIX}/{device_id}/state"),
            availability: format!("{STATE_PREFIX}/{device_id}/availability"),
            platform_status: PLATFORM_STATUS_TOPIC.to_string(),
        }
    }

    /// Replaces the topic Home Assistant announces its restarts on.
    pub fn with_platform_status(mut self, topic: impl Into<String>) -> Self {
        self.platform_status = topic.into();
        self
    }

    /// QoS 1, not retained.
    pub fn state_endpoint(&self) -> EndpointMetadata {
        EndpointMetadata::at_least_once(self.state.clone(), false)
    }

    /// QoS 1, retained so late subscribers see the last known status.
    pub fn availability_endpoint(&self) -> EndpointMetadata {
        EndpointMetadata::at_least_once(self.availability.clone(), true)
    }
}

/// `homeassistant/<kind>/<device_id>/<sensor_id>/config`
pub fn discovery_topic(kind: &str, device_id: &str, sensor_id: &str) -> String {
    format!("{DISCOVERY_PREFIX}/{kind}/{device_id}/{sensor_id}/config")
}

/// The first character that cannot appear inside a single MQTT topic level:
/// the `+` and `#` wildcards, the `/` separator and NUL.
pub fn forbidden_topic_char(level: &str) -> Option<char> {
    level.chars().find(|c| matches!(c, '+' | '#' | '/' | '\0'))
}
