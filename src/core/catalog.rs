//! Static sensor metadata: title, unit, icon, device class and kind.
//!
//! The catalog is a JSON object keyed by sensor id. A copy is compiled into
//! the binary; the top-level `catalog` key in the configuration can point at
//! a replacement file.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use tracing::warn;

use crate::config::ConfigError;

/// Catalog entry describing the template for `[disk_mounted]` sensors.
pub const MOUNTED_DISK_ID: &str = "disk_mounted";

const BUNDLED: &str = include_str!("../../resources/sensor_properties.json");

const DEFAULT_ICON: &str = "help";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[default]
    Sensor,
    BinarySensor,
}

impl SensorKind {
    /// Discovery topic component.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Sensor => "sensor",
            SensorKind::BinarySensor => "binary_sensor",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct SpecFields {
    title: Option<String>,
    unit: Option<String>,
    icon: Option<String>,
    device_class: Option<String>,
    #[serde(default)]
    kind: SensorKind,
    #[serde(default)]
    mountable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSpec {
    pub id: String,
    pub title: Option<String>,
    pub unit: Option<String>,
    /// Material Design icon name, with or without the `mdi:` prefix.
    pub icon: Option<String>,
    pub device_class: Option<String>,
    pub kind: SensorKind,
    /// Needs a path and is only instantiated through `[disk_mounted]`.
    pub mountable: bool,
}

impl SensorSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            unit: None,
            icon: None,
            device_class: None,
            kind: SensorKind::Sensor,
            mountable: false,
        }
    }

    /// The title, or the id when defaults have not been applied.
    pub fn title_or_id(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    specs: HashMap<String, SensorSpec>,
}

impl Catalog {
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::from_json(BUNDLED)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, SpecFields> =
            serde_json::from_str(content).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        let specs = raw
            .into_iter()
            .map(|(id, fields)| {
                let spec = SensorSpec {
                    id: id.clone(),
                    title: fields.title,
                    unit: fields.unit,
                    icon: fields.icon,
                    device_class: fields.device_class,
                    kind: fields.kind,
                    mountable: fields.mountable,
                };
                (id, spec)
            })
            .collect();
        Ok(Self { specs })
    }

    pub fn from_specs(specs: impl IntoIterator<Item = SensorSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SensorSpec> {
        self.specs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The first `mountable` entry, preferring `disk_mounted`.
    pub fn mounted_template(&self) -> Option<&SensorSpec> {
        self.specs
            .get(MOUNTED_DISK_ID)
            .filter(|s| s.mountable)
            .or_else(|| {
                let mut mountable: Vec<&SensorSpec> =
                    self.specs.values().filter(|s| s.mountable).collect();
                mountable.sort_by(|a, b| a.id.cmp(&b.id));
                mountable.into_iter().next()
            })
    }

    /// Fills a missing title with the id and a missing icon with `help`,
    /// warning for each. Returns the ids that were patched, sorted.
    pub fn apply_defaults(&mut self) -> Vec<String> {
        let mut patched = Vec::new();
        for spec in self.specs.values_mut() {
            let mut touched = false;
            if spec.title.as_deref().map_or(true, str::is_empty) {
                warn!("Sensor '{}' has no title, using its id", spec.id);
                spec.title = Some(spec.id.clone());
                touched = true;
            }
            if spec.icon.as_deref().map_or(true, str::is_empty) {
                warn!("Sensor '{}' has no icon, using '{}'", spec.id, DEFAULT_ICON);
                spec.icon = Some(DEFAULT_ICON.to_string());
                touched = true;
            }
            if touched {
                patched.push(spec.id.clone());
            }
        }
        patched.sort();
        patched
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn bundled_catalog_is_complete() {
        let mut catalog = Catalog::bundled().unwrap();
        assert!(catalog.apply_defaults().is_empty());
        for id in ["cpu_usage", "memory_ram", "last_boot", "wifi_strength"] {
            assert!(catalog.contains(id), "{id} missing from bundled catalog");
        }
        let template = catalog.mounted_template().unwrap();
        assert_eq!(template.id, MOUNTED_DISK_ID);
        assert_eq!(template.unit.as_deref(), Some("%"));
    }

    #[test]
    fn bundled_ids_have_providers() {
        let catalog = Catalog::bundled().unwrap();
        let providers = crate::core::providers::ProviderRegistry::builtin();
        for (id, spec) in &catalog.specs {
            if !spec.mountable {
                assert!(providers.contains(id), "no provider for {id}");
            }
        }
    }

    #[test]
    fn fields_default_when_absent() {
        let catalog = Catalog::from_json(r#"{"door": {"kind": "binary_sensor"}}"#).unwrap();
        let spec = catalog.get("door").unwrap();
        assert_eq!(spec.kind, SensorKind::BinarySensor);
        assert!(!spec.mountable);
        assert_eq!(spec.title, None);
        assert_eq!(spec.title_or_id(), "door");
    }

    #[test]
    fn apply_defaults_patches_title_and_icon() {
        let mut catalog =
            Catalog::from_json(r#"{"a": {"title": "A"}, "b": {"icon": "x"}, "c": {"title": "C", "icon": "y"}}"#)
                .unwrap();
        assert_eq!(catalog.apply_defaults(), vec!["a", "b"]);
        assert_eq!(catalog.get("a").unwrap().icon.as_deref(), Some("help"));
        assert_eq!(catalog.get("b").unwrap().title.as_deref(), Some("b"));
    }

    #[test]
    fn invalid_json_is_catalog_error() {
        assert!(matches!(
            Catalog::from_json("{not json"),
            Err(ConfigError::Catalog(_))
        ));
    }

    #[test]
    fn from_path_reads_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"custom": {"title": "Custom"}}"#).unwrap();
        let catalog = Catalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(Catalog::from_path(Path::new("/nonexistent.json")).is_err());
    }

    #[test]
    fn no_template_without_mountable_entry() {
        let catalog = Catalog::from_json(r#"{"disk_mounted": {"title": "x"}}"#).unwrap();
        assert!(catalog.mounted_template().is_none());
    }
}
