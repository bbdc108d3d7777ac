//! Turns the configuration, the catalog and the provider registry into the
//! active sensor registry.
//!
//! Problems with the file as a whole are fatal [`ConfigError`]s. Problems with
//! one sensor are [`SensorBuildError`]s: the sensor is left out, a warning is
//! logged and the build goes on. Every sensor that survives has produced a
//! value at least once.

use std::{collections::HashSet, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    config::{
        general::{GeneralSettings, RawGeneral},
        sensors::{mount_entries, sensor_entries, MountEntry, SensorConfigEntry, SensorMode},
        ConfigDocument, ConfigError,
    },
    core::{
        catalog::{Catalog, SensorSpec},
        identity::{forbidden_topic_char, DeviceIdentity, Topics},
        providers::ProviderRegistry,
        registry::SensorRegistry,
        sensor::{mounted_id, Refresh, Sensor, SensorBuildError},
    },
};

/// What was left out and why.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Rejected while reading the configuration.
    pub skipped: Vec<SensorBuildError>,
    /// Instantiated but failed the static bake or the first read.
    pub dropped: Vec<SensorBuildError>,
    /// Configured as off.
    pub disabled: Vec<String>,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub settings: GeneralSettings,
    pub registry: SensorRegistry,
    /// With title and icon defaults applied.
    pub catalog: Catalog,
    pub report: BuildReport,
}

pub struct RegistryBuilder<'a> {
    catalog: Catalog,
    providers: &'a ProviderRegistry,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(catalog: Catalog, providers: &'a ProviderRegistry) -> Self {
        Self { catalog, providers }
    }

    pub async fn build(self, document: &ConfigDocument) -> Result<BuildOutput, ConfigError> {
        let general = document
            .general
            .as_ref()
            .ok_or(ConfigError::MissingSection("general"))?;
        let sensors = document
            .sensors
            .as_ref()
            .ok_or(ConfigError::MissingSection("sensors"))?;

        let entries = sensor_entries(sensors);
        let mounts = document
            .disk_mounted
            .as_ref()
            .map(mount_entries)
            .unwrap_or_default();
        self.build_parts(general, &entries, &mounts).await
    }

    pub async fn build_parts(
        mut self,
        general: &RawGeneral,
        entries: &[SensorConfigEntry],
        mounts: &[MountEntry],
    ) -> Result<BuildOutput, ConfigError> {
        let settings = GeneralSettings::from_raw(general)?;
        self.catalog.apply_defaults();

        let device = settings.device_identity();
        let topics = settings.topics();
        let mut registry = SensorRegistry::new();
        let mut report = BuildReport::default();
        let mut seen = HashSet::new();

        for entry in entries {
            match self.configured(entry, &mut seen, &device, &topics) {
                Ok(Some(sensor)) => {
                    debug!("Sensor '{}' configured ({})", sensor.id(), sensor.refresh());
                    if let Err(e) = registry.push(sensor) {
                        warn!("Skipping sensor: {}", e);
                        report.skipped.push(e);
                    }
                }
                Ok(None) => report.disabled.push(entry.id.clone()),
                Err(e) => {
                    warn!("Skipping sensor: {}", e);
                    report.skipped.push(e);
                }
            }
        }

        self.add_mounts(mounts, &mut registry, &mut report, &device, &topics);
        probe(&mut registry, settings.provider_timeout, &mut report).await;

        info!(
            "Sensor registry built: {} active, {} skipped, {} dropped, {} disabled",
            registry.len(),
            report.skipped.len(),
            report.dropped.len(),
            report.disabled.len()
        );
        if registry.is_empty() {
            warn!("No sensors are active; only availability will be published");
        }

        Ok(BuildOutput {
            settings,
            registry,
            catalog: self.catalog,
            report,
        })
    }

    /// `Ok(None)` for a sensor switched off.
    fn configured(
        &self,
        entry: &SensorConfigEntry,
        seen: &mut HashSet<String>,
        device: &DeviceIdentity,
        topics: &Topics,
    ) -> Result<Option<Sensor>, SensorBuildError> {
        let spec = self
            .catalog
            .get(&entry.id)
            .ok_or_else(|| SensorBuildError::UnknownSensor(entry.id.clone()))?;

        let mode = entry
            .mode
            .clone()
            .map_err(|mode| SensorBuildError::InvalidMode {
                id: entry.id.clone(),
                mode,
            })?;

        if !seen.insert(entry.id.clone()) {
            return Err(SensorBuildError::Duplicate(entry.id.clone()));
        }
        if mode == SensorMode::Off {
            return Ok(None);
        }
        if spec.mountable {
            return Err(SensorBuildError::NeedsMountPath(entry.id.clone()));
        }
        let provider = self
            .providers
            .get(&entry.id)
            .ok_or_else(|| SensorBuildError::NoProvider(entry.id.clone()))?;

        let refresh = if mode.is_static() {
            Refresh::Static
        } else {
            Refresh::Dynamic
        };
        Sensor::from_spec(spec, refresh, provider, device, topics).map(Some)
    }

    fn add_mounts(
        &self,
        mounts: &[MountEntry],
        registry: &mut SensorRegistry,
        report: &mut BuildReport,
        device: &DeviceIdentity,
        topics: &Topics,
    ) {
        if mounts.is_empty() {
            return;
        }
        let Some(template) = self.catalog.mounted_template() else {
            warn!("{}", SensorBuildError::MountUnsupported);
            report.skipped.push(SensorBuildError::MountUnsupported);
            return;
        };

        for mount in mounts {
            let result = self.mounted(mount, template, registry, device, topics);
            match result.and_then(|sensor| registry.push(sensor)) {
                Ok(()) => debug!("Mounted disk '{}' configured", mount.label),
                Err(e) => {
                    warn!("Skipping mounted disk: {}", e);
                    report.skipped.push(e);
                }
            }
        }
    }

    fn mounted(
        &self,
        mount: &MountEntry,
        template: &SensorSpec,
        registry: &SensorRegistry,
        device: &DeviceIdentity,
        topics: &Topics,
    ) -> Result<Sensor, SensorBuildError> {
        if let Some(forbidden) = forbidden_topic_char(&mount.label) {
            return Err(SensorBuildError::InvalidMountLabel {
                label: mount.label.clone(),
                forbidden,
            });
        }
        let id = mounted_id(&mount.label);
        for taken in [mount.label.as_str(), id.as_str()] {
            if registry.contains(taken) {
                return Err(SensorBuildError::MountCollision {
                    label: mount.label.clone(),
                    id: taken.to_string(),
                });
            }
        }
        let path = mount
            .path
            .as_deref()
            .ok_or_else(|| SensorBuildError::MountWithoutPath(mount.label.clone()))?;
        if !path.is_dir() {
            return Err(SensorBuildError::MountPathMissing {
                label: mount.label.clone(),
                path: path.display().to_string(),
            });
        }
        Sensor::mounted(
            &mount.label,
            path,
            template,
            self.providers.mounted(path),
            device,
            topics,
        )
    }
}

/// Bakes static sensors, then reads every sensor once. Sequential, so each
/// provider sees at most one request at a time during startup.
async fn probe(registry: &mut SensorRegistry, timeout: Duration, report: &mut BuildReport) {
    let mut failed = HashSet::new();

    for sensor in registry.iter().filter(|s| s.refresh() == Refresh::Static) {
        if let Err(e) = sensor.bake(timeout).await {
            let err = SensorBuildError::ProbeFailed {
                id: sensor.id().to_string(),
                reason: format!("static value could not be read: {e}"),
            };
            warn!("Dropping sensor: {}", err);
            report.dropped.push(err);
            failed.insert(sensor.id().to_string());
        }
    }

    for sensor in registry.iter() {
        if failed.contains(sensor.id()) {
            continue;
        }
        match sensor.current_value(timeout).await {
            Ok(value) => debug!("Sensor '{}' first value: {}", sensor.id(), value),
            Err(e) => {
                let err = SensorBuildError::ProbeFailed {
                    id: sensor.id().to_string(),
                    reason: e.to_string(),
                };
                warn!("Dropping sensor: {}", err);
                report.dropped.push(err);
                failed.insert(sensor.id().to_string());
            }
        }
    }

    registry.retain(|s| !failed.contains(s.id()));
}
