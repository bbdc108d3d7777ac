//! Builds the aggregate state payload and publishes it.

use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;
use serde_json::{Map, Value};
use sysqtt_mqtt::EndpointMetadata;
use tracing::{debug, error, info, warn};

use super::{
    identity::Topics,
    registry::SensorRegistry,
    scheduler::ScheduledJob,
    state::{SessionState, SessionStateHandle},
    transport::Transport,
};
use crate::config::general::{
    GeneralSettings, DEFAULT_ALLOWED_SENSOR_FAILS, DEFAULT_PROVIDER_TIMEOUT_MS,
};

/// Per-cycle knobs taken from `[general]`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub timezone: Tz,
    pub provider_timeout: Duration,
    pub allowed_fails: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
            allowed_fails: DEFAULT_ALLOWED_SENSOR_FAILS,
        }
    }
}

impl From<&GeneralSettings> for EngineOptions {
    fn from(settings: &GeneralSettings) -> Self {
        Self {
            timezone: settings.timezone,
            provider_timeout: settings.provider_timeout,
            allowed_fails: settings.allowed_sensor_fails,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// Not connected; nothing was read or sent.
    Skipped(SessionState),
    Published,
    TransportFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorFailure {
    pub id: String,
    pub reason: String,
    /// Cumulative failures of this sensor, this one included.
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub status: PublishStatus,
    /// Number of values in the payload.
    pub published: usize,
    pub failures: Vec<SensorFailure>,
}

impl PublishReport {
    fn skipped(state: SessionState) -> Self {
        Self {
            status: PublishStatus::Skipped(state),
            published: 0,
            failures: Vec::new(),
        }
    }
}

pub struct PublicationEngine {
    registry: Arc<SensorRegistry>,
    state: SessionStateHandle,
    transport: Arc<dyn Transport>,
    endpoint: EndpointMetadata,
    options: EngineOptions,
}

impl PublicationEngine {
    pub fn new(
        registry: Arc<SensorRegistry>,
        state: SessionStateHandle,
        transport: Arc<dyn Transport>,
        topics: &Topics,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            state,
            transport,
            endpoint: topics.state_endpoint(),
            options,
        }
    }

    /// Reads every sensor and publishes one JSON object of rendered values,
    /// in registry order. A failing sensor is counted and left out of this
    /// payload only.
    pub async fn publish_state(&self) -> PublishReport {
        let state = self.state.current();
        if !state.is_connected() {
            debug!("Skipping state publication while {}", state);
            return PublishReport::skipped(state);
        }

        let mut values = Map::new();
        let mut failures = Vec::new();
        for sensor in self.registry.iter() {
            match sensor.current_value(self.options.provider_timeout).await {
                Ok(value) => {
                    values.insert(
                        sensor.id().to_string(),
                        Value::String(value.render(&self.options.timezone)),
                    );
                }
                Err(e) => {
                    let total = sensor.record_failure();
                    warn!("Sensor '{}' failed to read: {}", sensor.id(), e);
                    if total > self.options.allowed_fails {
                        warn!(
                            "Sensor '{}' has failed {} times (allowed: {})",
                            sensor.id(),
                            total,
                            self.options.allowed_fails
                        );
                    }
                    failures.push(SensorFailure {
                        id: sensor.id().to_string(),
                        reason: e.to_string(),
                        total,
                    });
                }
            }
        }

        let published = values.len();
        let payload = Value::Object(values).to_string();
        let status = match self.transport.publish(&self.endpoint, payload.into_bytes()).await {
            Ok(()) => PublishStatus::Published,
            Err(e) => {
                error!("State publish to '{}' failed: {}", self.endpoint.topic, e);
                PublishStatus::TransportFailed(e.to_string())
            }
        };

        PublishReport {
            status,
            published,
            failures,
        }
    }
}

#[async_trait::async_trait]
impl ScheduledJob for PublicationEngine {
    async fn run_once(&self) {
        let report = self.publish_state().await;
        match &report.status {
            PublishStatus::Skipped(_) => {}
            PublishStatus::Published => info!(
                "Published {} sensor values to '{}' ({} failed)",
                report.published,
                self.endpoint.topic,
                report.failures.len()
            ),
            PublishStatus::TransportFailed(_) => warn!(
                "State cycle lost: {} sensor values not sent ({} failed)",
                report.published,
                report.failures.len()
            ),
        }
    }
}
