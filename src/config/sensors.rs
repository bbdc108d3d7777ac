//! The `[sensors]` and `[disk_mounted]` tables.

use std::{fmt, path::PathBuf};

/// How a configured sensor is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    Off,
    /// Same as `Dynamic`.
    On,
    /// Read on every publication cycle.
    Dynamic,
    /// Read once at startup, then reused.
    Static,
}

impl SensorMode {
    /// `true`/`false` or one of `"on"`, `"off"`, `"dynamic"`, `"static"`.
    /// Anything else comes back as its printed form for the warning.
    pub fn from_value(value: &toml::Value) -> Result<Self, String> {
        match value {
            toml::Value::Boolean(true) => Ok(SensorMode::On),
            toml::Value::Boolean(false) => Ok(SensorMode::Off),
            toml::Value::String(s) => match s.as_str() {
                "on" => Ok(SensorMode::On),
                "off" => Ok(SensorMode::Off),
                "dynamic" => Ok(SensorMode::Dynamic),
                "static" => Ok(SensorMode::Static),
                other => Err(other.to_string()),
            },
            other => Err(other.to_string()),
        }
    }

    pub fn is_static(self) -> bool {
        self == SensorMode::Static
    }
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorMode::Off => "off",
            SensorMode::On => "on",
            SensorMode::Dynamic => "dynamic",
            SensorMode::Static => "static",
        })
    }
}

/// One `[sensors]` line. An unparsable mode is kept so the builder can skip
/// the sensor with a warning instead of rejecting the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfigEntry {
    pub id: String,
    pub mode: Result<SensorMode, String>,
}

impl SensorConfigEntry {
    pub fn new(id: impl Into<String>, mode: SensorMode) -> Self {
        Self {
            id: id.into(),
            mode: Ok(mode),
        }
    }
}

/// Entries in file order.
pub fn sensor_entries(table: &toml::Table) -> Vec<SensorConfigEntry> {
    table
        .iter()
        .map(|(id, value)| SensorConfigEntry {
            id: id.clone(),
            mode: SensorMode::from_value(value),
        })
        .collect()
}

/// One `[disk_mounted]` line. `path` is `None` for an empty or non-string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub label: String,
    pub path: Option<PathBuf>,
}

impl MountEntry {
    pub fn new(label: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path,
        }
    }
}

pub fn mount_entries(table: &toml::Table) -> Vec<MountEntry> {
    table
        .iter()
        .map(|(label, value)| MountEntry {
            label: label.clone(),
            path: value
                .as_str()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Table {
        src.parse().unwrap()
    }

    #[test]
    fn modes_are_parsed() {
        let entries = sensor_entries(&table(
            "a = true\nb = false\nc = \"on\"\nd = \"off\"\ne = \"dynamic\"\nf = \"static\"\n",
        ));
        let modes: Vec<_> = entries.into_iter().map(|e| e.mode.unwrap()).collect();
        assert_eq!(
            modes,
            vec![
                SensorMode::On,
                SensorMode::Off,
                SensorMode::On,
                SensorMode::Off,
                SensorMode::Dynamic,
                SensorMode::Static,
            ]
        );
    }

    #[test]
    fn unknown_mode_is_kept_as_error() {
        let entries = sensor_entries(&table("cpu_usage = \"sometimes\"\nram = 3\n"));
        assert_eq!(entries[0].mode, Err("sometimes".to_string()));
        assert_eq!(entries[1].mode, Err("3".to_string()));
    }

    #[test]
    fn modes_are_case_sensitive() {
        let entries = sensor_entries(&table("cpu_usage = \"ON\"\n"));
        assert!(entries[0].mode.is_err());
    }

    #[test]
    fn mount_paths_are_optional() {
        let entries = mount_entries(&table("data = \"/mnt/data\"\nempty = \"\"\nbad = 5\n"));
        assert_eq!(entries[0], MountEntry::new("data", Some("/mnt/data".into())));
        assert_eq!(entries[1].path, None);
        assert_eq!(entries[2].path, None);
    }
}
