//! Sensor registry: read access to per-sensor thresholds and status.
//!
//! The engine reads through this trait on every evaluation so threshold and
//! status edits take effect within one measurement. [`CachedRegistry`] may
//! front a slow backend, but its TTL is clamped to the staleness window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LookupError;
use crate::models::{Sensor, SensorStatus};

mod memory;
mod postgres;

pub use memory::InMemoryRegistry;
pub use postgres::PgSensorRegistry;

#[async_trait]
pub trait SensorRegistry: Send + Sync {
    /// Full configuration of one sensor.
    async fn sensor(&self, sensor_id: i64) -> Result<Sensor, LookupError>;

    /// Every provisioned sensor, retired ones included.
    async fn list_sensors(&self) -> Result<Vec<Sensor>, LookupError>;

    async fn thresholds(&self, sensor_id: i64) -> Result<(Option<f64>, Option<f64>), LookupError> {
        Ok(self.sensor(sensor_id).await?.thresholds())
    }

    async fn status(&self, sensor_id: i64) -> Result<SensorStatus, LookupError> {
        Ok(self.sensor(sensor_id).await?.status)
    }
}

/// Short-TTL read-through cache over another registry.
pub struct CachedRegistry<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<HashMap<i64, (Instant, Sensor)>>,
}

impl<R: SensorRegistry> CachedRegistry<R> {
    /// `ttl` is clamped to `staleness_window`; a zero TTL disables caching.
    pub fn new(inner: R, ttl: Duration, staleness_window: Duration) -> Self {
        let ttl = ttl.min(staleness_window);
        if ttl.is_zero() {
            tracing::debug!("Sensor registry cache disabled");
        } else {
            tracing::debug!(ttl_ms = ttl.as_millis() as u64, "Sensor registry cache enabled");
        }
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Drop a cached entry, e.g. after a local configuration edit.
    pub fn invalidate(&self, sensor_id: i64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sensor_id);
    }

    fn cached(&self, sensor_id: i64) -> Option<Sensor> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&sensor_id)
            .filter(|(loaded, _)| loaded.elapsed() < self.ttl)
            .map(|(_, sensor)| sensor.clone())
    }
}

#[async_trait]
impl<R: SensorRegistry> SensorRegistry for CachedRegistry<R> {
    async fn sensor(&self, sensor_id: i64) -> Result<Sensor, LookupError> {
        // ---
        if self.ttl.is_zero() {
            return self.inner.sensor(sensor_id).await;
        }
        if let Some(sensor) = self.cached(sensor_id) {
            return Ok(sensor);
        }

        match self.inner.sensor(sensor_id).await {
            Ok(sensor) => {
                self.entries
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(sensor_id, (Instant::now(), sensor.clone()));
                Ok(sensor)
            }
            Err(e) => {
                self.invalidate(sensor_id);
                Err(e)
            }
        }
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>, LookupError> {
        self.inner.list_sensors().await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorType;

    fn sensor(id: i64, max: f64) -> Sensor {
        Sensor {
            id,
            name: format!("sensor-{id}"),
            sensor_type: SensorType::Temperature,
            location: "Row 1".into(),
            unit: "°C".into(),
            threshold_min: None,
            threshold_max: Some(max),
            status: SensorStatus::Active,
            calibration_date: None,
            last_maintenance: None,
        }
    }

    #[test]
    fn test_ttl_clamped_to_staleness_window() {
        // ---
        let cached = CachedRegistry::new(
            InMemoryRegistry::new(),
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        assert_eq!(cached.ttl(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        // ---
        let cached = CachedRegistry::new(
            InMemoryRegistry::new(),
            Duration::from_secs(30),
            Duration::from_secs(300),
        );
        cached.inner().upsert(sensor(1, 80.0)).unwrap();

        assert_eq!(cached.thresholds(1).await.unwrap(), (None, Some(80.0)));

        // Edit behind the cache is not visible until invalidated
        cached.inner().set_thresholds(1, None, Some(70.0)).unwrap();
        assert_eq!(cached.thresholds(1).await.unwrap(), (None, Some(80.0)));

        cached.invalidate(1);
        assert_eq!(cached.thresholds(1).await.unwrap(), (None, Some(70.0)));
    }

    #[tokio::test]
    async fn test_zero_ttl_reads_through() {
        // ---
        let cached = CachedRegistry::new(
            InMemoryRegistry::new(),
            Duration::ZERO,
            Duration::from_secs(300),
        );
        cached.inner().upsert(sensor(1, 80.0)).unwrap();
        assert_eq!(cached.status(1).await.unwrap(), SensorStatus::Active);

        cached.inner().set_status(1, SensorStatus::Offline).unwrap();
        assert_eq!(cached.status(1).await.unwrap(), SensorStatus::Offline);

        assert_eq!(
            cached.sensor(2).await.unwrap_err(),
            LookupError::SensorNotFound(2)
        );
    }
}
