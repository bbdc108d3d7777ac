//! The runtime sensor: merged metadata, its provider and its discovery config.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    config::general::slugify,
    core::{
        catalog::{SensorKind, SensorSpec},
        identity::{discovery_topic, forbidden_topic_char, DeviceIdentity, Topics},
        providers::{MetricProvider, ProviderError, ProviderResult, SensorValue},
    },
};

/// Why one configured sensor was left out of the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorBuildError {
    #[error("Sensor '{0}' is not in the catalog")]
    UnknownSensor(String),

    #[error("Sensor '{id}' has invalid mode '{mode}'")]
    InvalidMode { id: String, mode: String },

    #[error("Sensor '{0}' is configured more than once")]
    Duplicate(String),

    #[error("No provider is registered for sensor '{0}'")]
    NoProvider(String),

    #[error("Sensor '{0}' needs a path; configure it under [disk_mounted]")]
    NeedsMountPath(String),

    #[error("Mounted disk '{label}' collides with existing sensor '{id}'")]
    MountCollision { label: String, id: String },

    #[error("Mounted disk '{label}': '{forbidden}' is not allowed in MQTT topics")]
    InvalidMountLabel { label: String, forbidden: char },

    #[error("Mounted disk '{0}' has no path")]
    MountWithoutPath(String),

    #[error("Mounted disk '{label}': {path} is not a directory")]
    MountPathMissing { label: String, path: String },

    #[error("The catalog has no mountable entry, [disk_mounted] is ignored")]
    MountUnsupported,

    #[error("Sensor '{id}' failed its first read: {reason}")]
    ProbeFailed { id: String, reason: String },

    #[error("Discovery config for '{id}' could not be built: {reason}")]
    Discovery { id: String, reason: String },
}

/// When a sensor reads its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Once at startup.
    Static,
    /// Every publication cycle.
    Dynamic,
}

impl fmt::Display for Refresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Refresh::Static => "static",
            Refresh::Dynamic => "dynamic",
        })
    }
}

/// A retained discovery message, computed once per sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub topic: String,
    pub payload: String,
}

#[derive(Serialize)]
struct DiscoveryDevice<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    manufacturer: &'a str,
    model: &'a str,
}

#[derive(Serialize)]
struct DiscoveryPayload<'a> {
    name: String,
    state_topic: &'a str,
    value_template: String,
    unique_id: String,
    availability_topic: &'a str,
    device: DiscoveryDevice<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

fn mdi_icon(icon: &str) -> String {
    if icon.contains(':') {
        icon.to_string()
    } else {
        format!("mdi:{icon}")
    }
}

pub struct Sensor {
    id: String,
    title: String,
    icon: Option<String>,
    kind: SensorKind,
    refresh: Refresh,
    path: Option<PathBuf>,
    provider: Arc<dyn MetricProvider>,
    baked: OnceLock<SensorValue>,
    failures: AtomicU32,
    discovery: DiscoveryConfig,
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("kind", &self.kind)
            .field("refresh", &self.refresh)
            .field("path", &self.path)
            .field("failures", &self.failures())
            .finish()
    }
}

impl Sensor {
    pub fn from_spec(
        spec: &SensorSpec,
        refresh: Refresh,
        provider: Arc<dyn MetricProvider>,
        device: &DeviceIdentity,
        topics: &Topics,
    ) -> Result<Self, SensorBuildError> {
        Self::assemble(
            spec.id.clone(),
            spec.title_or_id().to_string(),
            spec,
            refresh,
            None,
            provider,
            device,
            topics,
        )
    }

    /// A `[disk_mounted]` sensor: id `disk_<slug(label)>`, title
    /// `Disk <label> Use`, always dynamic.
    pub fn mounted(
        label: &str,
        path: &Path,
        template: &SensorSpec,
        provider: Arc<dyn MetricProvider>,
        device: &DeviceIdentity,
        topics: &Topics,
    ) -> Result<Self, SensorBuildError> {
        Self::assemble(
            mounted_id(label),
            format!("Disk {label} Use"),
            template,
            Refresh::Dynamic,
            Some(path.to_path_buf()),
            provider,
            device,
            topics,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        id: String,
        title: String,
        spec: &SensorSpec,
        refresh: Refresh,
        path: Option<PathBuf>,
        provider: Arc<dyn MetricProvider>,
        device: &DeviceIdentity,
        topics: &Topics,
    ) -> Result<Self, SensorBuildError> {
        if let Some(c) = forbidden_topic_char(&id) {
            return Err(SensorBuildError::Discovery {
                id,
                reason: format!("'{c}' is not allowed in MQTT topics"),
            });
        }
        let payload = DiscoveryPayload {
            name: format!("{} {}", device.display_name, title),
            state_topic: &topics.state,
            value_template: format!("{{{{value_json.{id}}}}}"),
            unique_id: format!("{}_sensor_{}", device.device_id, id),
            availability_topic: &topics.availability,
            device: DiscoveryDevice {
                identifiers: [device.device_id.as_str()],
                name: &device.display_name,
                manufacturer: &device.manufacturer,
                model: &device.model,
            },
            device_class: spec.device_class.as_deref(),
            unit_of_measurement: spec.unit.as_deref(),
            icon: spec.icon.as_deref().map(mdi_icon),
        };
        let payload = serde_json::to_string(&payload).map_err(|e| SensorBuildError::Discovery {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        let discovery = DiscoveryConfig {
            topic: discovery_topic(spec.kind.as_str(), &device.device_id, &id),
            payload,
        };

        Ok(Self {
            id,
            title,
            icon: spec.icon.clone(),
            kind: spec.kind,
            refresh,
            path,
            provider,
            baked: OnceLock::new(),
            failures: AtomicU32::new(0),
            discovery,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn refresh(&self) -> Refresh {
        self.refresh
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    /// The memoized value of a static sensor, once baked.
    pub fn baked(&self) -> Option<&SensorValue> {
        self.baked.get()
    }

    /// Reads the provider once and memoizes the result. Later calls return
    /// the memo without reading again.
    pub async fn bake(&self, timeout: Duration) -> ProviderResult<SensorValue> {
        if let Some(value) = self.baked.get() {
            return Ok(value.clone());
        }
        let value = self.read_provider(timeout).await?;
        Ok(self.baked.get_or_init(|| value).clone())
    }

    /// The value to publish this cycle: the memo for static sensors, a fresh
    /// read for dynamic ones.
    pub async fn current_value(&self, timeout: Duration) -> ProviderResult<SensorValue> {
        match self.refresh {
            Refresh::Static => self
                .baked
                .get()
                .cloned()
                .ok_or_else(|| ProviderError::NotBaked(self.id.clone())),
            Refresh::Dynamic => self.read_provider(timeout).await,
        }
    }

    async fn read_provider(&self, timeout: Duration) -> ProviderResult<SensorValue> {
        let value = tokio::time::timeout(timeout, self.provider.read())
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;
        if value.is_empty_text() {
            return Err(ProviderError::NoValue(format!("'{}' returned nothing", self.id)));
        }
        Ok(value)
    }

    /// Counts a failed read; returns the new total.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Registry id of a mounted disk sensor.
pub fn mounted_id(label: &str) -> String {
    format!("disk_{}", slugify(label))
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::{fixtures::*, *};
    use crate::core::providers::from_fn;

    fn counting() -> (Arc<AtomicI64>, Arc<dyn MetricProvider>) {
        let calls = Arc::new(AtomicI64::new(0));
        let counter = calls.clone();
        let provider = from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(SensorValue::Integer(n)) }
        });
        (calls, provider)
    }

    #[test]
    fn discovery_payload_fields() {
        let sensor = sensor(
            "cpu_usage",
            Refresh::Dynamic,
            from_fn(|| async { Ok(SensorValue::Float(1.0)) }),
        );
        let discovery = sensor.discovery();
        assert_eq!(
            discovery.topic,
            "homeassistant/sensor/living_room_pi/cpu_usage/config"
        );
        let json: serde_json::Value = serde_json::from_str(&discovery.payload).unwrap();
        assert_eq!(json["name"], "Living Room Pi cpu_usage title");
        assert_eq!(json["state_topic"], "sys-qtt/sensor/living_room_pi/state");
        assert_eq!(json["value_template"], "{{value_json.cpu_usage}}");
        assert_eq!(json["unique_id"], "living_room_pi_sensor_cpu_usage");
        assert_eq!(
            json["availability_topic"],
            "sys-qtt/sensor/living_room_pi/availability"
        );
        assert_eq!(json["device"]["identifiers"][0], "living_room_pi");
        assert_eq!(json["device"]["manufacturer"], "Sys-QTT");
        assert_eq!(json["unit_of_measurement"], "%");
        assert_eq!(json["icon"], "mdi:memory");
        assert!(json.get("device_class").is_none());
    }

    #[test]
    fn discovery_is_deterministic() {
        let a = sensor("x", Refresh::Dynamic, from_fn(|| async { Ok(SensorValue::Integer(1)) }));
        let b = sensor("x", Refresh::Static, from_fn(|| async { Ok(SensorValue::Integer(2)) }));
        assert_eq!(a.discovery(), b.discovery());
    }

    #[test]
    fn catalog_id_must_be_topic_safe() {
        let result = Sensor::from_spec(
            &spec("net/rx"),
            Refresh::Dynamic,
            from_fn(|| async { Ok(SensorValue::Integer(1)) }),
            &device(),
            &topics(),
        );
        assert!(matches!(
            result,
            Err(SensorBuildError::Discovery { id, .. }) if id == "net/rx"
        ));
    }

    #[test]
    fn prefixed_icon_is_kept() {
        assert_eq!(mdi_icon("hass:wifi"), "hass:wifi");
        assert_eq!(mdi_icon("wifi"), "mdi:wifi");
    }

    #[test]
    fn binary_sensor_topic() {
        let spec = SensorSpec {
            kind: SensorKind::BinarySensor,
            ..spec("door")
        };
        let sensor = Sensor::from_spec(
            &spec,
            Refresh::Dynamic,
            from_fn(|| async { Ok(SensorValue::Integer(0)) }),
            &device(),
            &topics(),
        )
        .unwrap();
        assert!(sensor.discovery().topic.starts_with("homeassistant/binary_sensor/"));
    }

    #[test]
    fn mounted_sensor_naming() {
        let sensor = Sensor::mounted(
            "My Drive",
            Path::new("/mnt/data"),
            &spec("disk_mounted"),
            from_fn(|| async { Ok(SensorValue::Float(3.0)) }),
            &device(),
            &topics(),
        )
        .unwrap();
        assert_eq!(sensor.id(), "disk_my_drive");
        assert_eq!(sensor.title(), "Disk My Drive Use");
        assert_eq!(sensor.refresh(), Refresh::Dynamic);
        assert_eq!(sensor.path(), Some(Path::new("/mnt/data")));
        assert_eq!(
            sensor.discovery().topic,
            "homeassistant/sensor/living_room_pi/disk_my_drive/config"
        );
    }

    #[tokio::test]
    async fn static_value_is_read_once() {
        let (calls, provider) = counting();
        let sensor = sensor("cpu_model", Refresh::Static, provider);

        assert!(matches!(
            sensor.current_value(Duration::from_secs(1)).await,
            Err(ProviderError::NotBaked(_))
        ));
        assert_eq!(
            sensor.bake(Duration::from_secs(1)).await.unwrap(),
            SensorValue::Integer(1)
        );
        sensor.bake(Duration::from_secs(1)).await.unwrap();
        for _ in 0..3 {
            assert_eq!(
                sensor.current_value(Duration::from_secs(1)).await.unwrap(),
                SensorValue::Integer(1)
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dynamic_value_is_read_each_time() {
        let (calls, provider) = counting();
        let sensor = sensor("cpu_usage", Refresh::Dynamic, provider);
        sensor.current_value(Duration::from_secs(1)).await.unwrap();
        let second = sensor.current_value(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second, SensorValue::Integer(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let provider = from_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SensorValue::Integer(1))
        });
        let sensor = sensor("slow", Refresh::Dynamic, provider);
        assert!(matches!(
            sensor.current_value(Duration::from_millis(50)).await,
            Err(ProviderError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn blank_text_is_no_value() {
        let sensor = sensor(
            "wifi_ssid",
            Refresh::Dynamic,
            from_fn(|| async { Ok(SensorValue::from("")) }),
        );
        assert!(matches!(
            sensor.current_value(Duration::from_secs(1)).await,
            Err(ProviderError::NoValue(_))
        ));
    }

    #[test]
    fn failure_counter_accumulates() {
        let sensor = sensor("x", Refresh::Dynamic, from_fn(|| async { Ok(SensorValue::Integer(1)) }));
        assert_eq!(sensor.record_failure(), 1);
        assert_eq!(sensor.record_failure(), 2);
        assert_eq!(sensor.failures(), 2);
    }
}
