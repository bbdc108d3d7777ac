use super::sensor::{Sensor, SensorBuildError};

/// The active sensors, in configuration order. Immutable once built.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `sensor`, rejecting a second sensor with the same id.
    pub fn push(&mut self, sensor: Sensor) -> Result<(), SensorBuildError> {
        if self.contains(sensor.id()) {
            return Err(SensorBuildError::Duplicate(sensor.id().to_string()));
        }
        self.sensors.push(sensor);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.sensors.iter().map(Sensor::id).collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Drops every sensor for which `keep` returns false.
    pub fn retain(&mut self, keep: impl FnMut(&Sensor) -> bool) {
        self.sensors.retain(keep);
    }
}

impl<'a> IntoIterator for &'a SensorRegistry {
    type Item = &'a Sensor;
    type IntoIter = std::slice::Iter<'a, Sensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.sensors.iter()
    }
}
