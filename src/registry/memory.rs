use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::SensorRegistry;
use crate::error::{LookupError, SensorConfigError};
use crate::models::{Sensor, SensorStatus};

// ---

/// Registry held in process memory, for tests, the simulator and embedding.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    sensors: RwLock<BTreeMap<i64, Sensor>>,
}

impl InMemoryRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensors(sensors: impl IntoIterator<Item = Sensor>) -> Result<Self, SensorConfigError> {
        let registry = Self::new();
        for sensor in sensors {
            registry.upsert(sensor)?;
        }
        Ok(registry)
    }

    /// Insert or replace a sensor after checking its threshold invariant.
    pub fn upsert(&self, sensor: Sensor) -> Result<(), SensorConfigError> {
        sensor.validate()?;
        self.write().insert(sensor.id, sensor);
        Ok(())
    }

    pub fn set_thresholds(
        &self,
        sensor_id: i64,
        threshold_min: Option<f64>,
        threshold_max: Option<f64>,
    ) -> Result<(), SensorConfigError> {
        // ---
        let mut sensors = self.write();
        let sensor = sensors
            .get_mut(&sensor_id)
            .ok_or(SensorConfigError::NotFound(sensor_id))?;

        let mut updated = sensor.clone();
        updated.threshold_min = threshold_min;
        updated.threshold_max = threshold_max;
        updated.validate()?;
        *sensor = updated;
        Ok(())
    }

    pub fn set_status(&self, sensor_id: i64, status: SensorStatus) -> Result<(), SensorConfigError> {
        let mut sensors = self.write();
        let sensor = sensors
            .get_mut(&sensor_id)
            .ok_or(SensorConfigError::NotFound(sensor_id))?;
        sensor.status = status;
        Ok(())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<i64, Sensor>> {
        self.sensors.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SensorRegistry for InMemoryRegistry {
    async fn sensor(&self, sensor_id: i64) -> Result<Sensor, LookupError> {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&sensor_id)
            .cloned()
            .ok_or(LookupError::SensorNotFound(sensor_id))
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>, LookupError> {
        Ok(self
            .sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorType;

    fn humidity(id: i64) -> Sensor {
        Sensor {
            id,
            name: "Cold aisle humidity".into(),
            sensor_type: SensorType::Humidity,
            location: "Row 2".into(),
            unit: "%".into(),
            threshold_min: Some(30.0),
            threshold_max: Some(70.0),
            status: SensorStatus::Active,
            calibration_date: None,
            last_maintenance: None,
        }
    }

    #[tokio::test]
    async fn test_rejects_inverted_thresholds() {
        // ---
        let registry = InMemoryRegistry::with_sensors([humidity(1)]).unwrap();

        let err = registry.set_thresholds(1, Some(80.0), Some(20.0)).unwrap_err();
        assert!(matches!(err, SensorConfigError::InvalidThresholds { .. }));
        // The failed edit left the old bounds in place
        assert_eq!(registry.thresholds(1).await.unwrap(), (Some(30.0), Some(70.0)));

        let mut bad = humidity(2);
        bad.threshold_min = Some(90.0);
        assert!(registry.upsert(bad).is_err());
        assert!(registry.sensor(2).await.is_err());
    }

    #[tokio::test]
    async fn test_edits_visible_immediately() {
        // ---
        let registry = InMemoryRegistry::with_sensors([humidity(1), humidity(2)]).unwrap();

        registry.set_status(2, SensorStatus::Maintenance).unwrap();
        assert_eq!(registry.status(2).await.unwrap(), SensorStatus::Maintenance);
        assert_eq!(registry.list_sensors().await.unwrap().len(), 2);
        assert_eq!(
            registry.set_status(9, SensorStatus::Active).unwrap_err(),
            SensorConfigError::NotFound(9)
        );
    }
}
