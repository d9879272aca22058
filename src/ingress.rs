//! Measurement ingress: validate, record activity, hand off to the pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::activity::SensorActivity;
use crate::error::{LookupError, ValidationError};
use crate::models::Measurement;
use crate::pipeline::EvaluationPipeline;
use crate::registry::SensorRegistry;

// ---

/// Receipt for an accepted reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub sensor_id: i64,
    /// An older queued reading for this sensor was dropped to make room.
    pub dropped_oldest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngressStats {
    pub accepted: u64,
    /// Rejection counts keyed by reason.
    pub rejected: BTreeMap<&'static str, u64>,
}

pub struct MeasurementIngress {
    registry: Arc<dyn SensorRegistry>,
    activity: Arc<SensorActivity>,
    pipeline: Arc<EvaluationPipeline>,
    skew_tolerance: chrono::Duration,
    accepted: AtomicU64,
    rejected: Mutex<BTreeMap<&'static str, u64>>,
}

impl MeasurementIngress {
    // ---
    pub fn new(
        registry: Arc<dyn SensorRegistry>,
        activity: Arc<SensorActivity>,
        pipeline: Arc<EvaluationPipeline>,
        skew_tolerance: chrono::Duration,
    ) -> Self {
        Self {
            registry,
            activity,
            pipeline,
            skew_tolerance,
            accepted: AtomicU64::new(0),
            rejected: Mutex::new(BTreeMap::new()),
        }
    }

    /// Validate and enqueue one reading. Rejections are counted and returned
    /// to the caller; nothing is retried.
    pub async fn submit(&self, measurement: Measurement) -> Result<Accepted, ValidationError> {
        // ---
        match self.admit(measurement).await {
            Ok(accepted) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(accepted)
            }
            Err(e) => {
                *self
                    .rejected
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .entry(e.reason())
                    .or_insert(0) += 1;
                tracing::debug!(reason = e.reason(), error = %e, "Measurement rejected");
                Err(e)
            }
        }
    }

    async fn admit(&self, measurement: Measurement) -> Result<Accepted, ValidationError> {
        // ---
        let sensor_id = measurement.sensor_id;

        if !measurement.value.is_finite() {
            return Err(ValidationError::NonFiniteValue { sensor_id });
        }
        if !(0.0..=1.0).contains(&measurement.quality_score) {
            return Err(ValidationError::QualityOutOfRange {
                sensor_id,
                score: measurement.quality_score,
            });
        }

        let sensor = self.registry.sensor(sensor_id).await.map_err(|e| match e {
            LookupError::SensorNotFound(id) => ValidationError::UnknownSensor(id),
            LookupError::Backend(msg) => ValidationError::RegistryUnavailable(msg),
        })?;

        if measurement.unit.trim() != sensor.unit {
            return Err(ValidationError::UnitMismatch {
                sensor_id,
                expected: sensor.unit,
                actual: measurement.unit,
            });
        }

        if let Some(last_accepted) = self.activity.last_accepted(sensor_id) {
            if measurement.timestamp < last_accepted - self.skew_tolerance {
                return Err(ValidationError::OutOfOrder {
                    sensor_id,
                    timestamp: measurement.timestamp,
                    last_accepted,
                });
            }
        }

        let timestamp = measurement.timestamp;
        let enqueued = self.pipeline.enqueue(measurement)?;
        self.activity.record(sensor_id, timestamp, Utc::now());

        Ok(Accepted {
            sensor_id,
            dropped_oldest: enqueued.dropped_oldest,
        })
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::engine::{AlertEngine, EngineSettings};
    use crate::models::{Sensor, SensorStatus, SensorType};
    use crate::notify::RecordingSink;
    use crate::registry::InMemoryRegistry;
    use crate::retry::RetryPolicy;
    use crate::severity::SeverityPolicy;
    use crate::store::InMemoryAlertStore;
    use crate::models::AlertType;
    use chrono::{Duration, TimeZone};
    use tokio_test::assert_ok;

    struct Fixture {
        ingress: MeasurementIngress,
        engine: Arc<AlertEngine>,
        pipeline: Arc<EvaluationPipeline>,
        store: Arc<InMemoryAlertStore>,
        activity: Arc<SensorActivity>,
    }

    fn fixture() -> Fixture {
        // ---
        let sensor = Sensor {
            id: 7,
            name: "PDU A load".into(),
            sensor_type: SensorType::Power,
            location: "Rack 3".into(),
            unit: "kW".into(),
            threshold_min: None,
            threshold_max: Some(5.0),
            status: SensorStatus::Active,
            calibration_date: None,
            last_maintenance: None,
        };
        let registry = Arc::new(InMemoryRegistry::with_sensors([sensor]).unwrap());
        let store = Arc::new(InMemoryAlertStore::new());
        let activity = Arc::new(SensorActivity::new());
        let engine = Arc::new(AlertEngine::new(
            registry.clone(),
            store.clone(),
            Arc::new(RecordingSink::default()),
            activity.clone(),
            SeverityPolicy::default(),
            EngineSettings::default(),
        ));
        let pipeline = Arc::new(EvaluationPipeline::new(
            engine.clone(),
            store.clone(),
            16,
            RetryPolicy::default(),
        ));
        let ingress = MeasurementIngress::new(
            registry,
            activity.clone(),
            pipeline.clone(),
            Duration::seconds(5),
        );
        Fixture {
            ingress,
            engine,
            pipeline,
            store,
            activity,
        }
    }

    fn reading(value: f64, secs: i64) -> Measurement {
        Measurement {
            sensor_id: 7,
            value,
            unit: "kW".into(),
            quality_score: 0.9,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap()
                + Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn test_accepts_valid_reading() {
        // ---
        let f = fixture();
        let accepted = f.ingress.submit(reading(3.2, 0)).await.unwrap();
        assert_eq!(accepted.sensor_id, 7);
        assert!(!accepted.dropped_oldest);
        assert_eq!(f.activity.last_accepted(7), Some(reading(3.2, 0).timestamp));

        f.pipeline.shutdown().await;
        assert_eq!(f.store.measurements().len(), 1);
        assert_eq!(f.ingress.stats().accepted, 1);
    }

    #[tokio::test]
    async fn test_rejections_counted_per_reason() {
        // ---
        let f = fixture();

        let mut unknown = reading(1.0, 0);
        unknown.sensor_id = 99;
        assert!(matches!(
            f.ingress.submit(unknown).await,
            Err(ValidationError::UnknownSensor(99))
        ));

        assert!(matches!(
            f.ingress.submit(reading(f64::NAN, 0)).await,
            Err(ValidationError::NonFiniteValue { sensor_id: 7 })
        ));
        assert!(matches!(
            f.ingress.submit(reading(f64::INFINITY, 0)).await,
            Err(ValidationError::NonFiniteValue { .. })
        ));

        let mut bad_quality = reading(1.0, 0);
        bad_quality.quality_score = 1.5;
        assert!(matches!(
            f.ingress.submit(bad_quality).await,
            Err(ValidationError::QualityOutOfRange { .. })
        ));

        let mut wrong_unit = reading(1.0, 0);
        wrong_unit.unit = "W".into();
        assert!(matches!(
            f.ingress.submit(wrong_unit).await,
            Err(ValidationError::UnitMismatch { .. })
        ));

        let stats = f.ingress.stats();
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.rejected.get("unknown_sensor"), Some(&1));
        assert_eq!(stats.rejected.get("non_finite_value"), Some(&2));
        assert_eq!(stats.rejected.get("quality_out_of_range"), Some(&1));
        assert_eq!(stats.rejected.get("unit_mismatch"), Some(&1));
        assert!(f.activity.last_accepted(7).is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_beyond_skew_rejected() {
        // ---
        let f = fixture();
        assert_ok!(f.ingress.submit(reading(1.0, 100)).await);

        // Within tolerance
        assert_ok!(f.ingress.submit(reading(1.0, 96)).await);
        assert_eq!(f.activity.last_accepted(7), Some(reading(1.0, 100).timestamp));

        assert!(matches!(
            f.ingress.submit(reading(1.0, 90)).await,
            Err(ValidationError::OutOfOrder { .. })
        ));
        assert_eq!(f.ingress.stats().rejected.get("out_of_order"), Some(&1));
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        // ---
        let f = fixture();
        f.pipeline.shutdown().await;
        assert!(matches!(
            f.ingress.submit(reading(1.0, 0)).await,
            Err(ValidationError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_lagging_sensor_clock_is_not_stale() {
        // ---
        let f = fixture();
        // Source timestamps run far behind the server clock
        let lag = Utc::now() - reading(0.0, 0).timestamp;
        assert!(lag > f.engine.settings().staleness_window);

        for i in 0..5 {
            assert_ok!(f.ingress.submit(reading(3.0, i * 10)).await);
            let opened = f.engine.check_staleness(Utc::now() + Duration::seconds(5)).await;
            assert!(opened.is_empty(), "reading {i} left the sensor stale");
        }

        f.pipeline.shutdown().await;
        let stale: Vec<_> = f
            .store
            .alerts()
            .into_iter()
            .filter(|a| a.alert_type == AlertType::StaleData)
            .collect();
        assert!(stale.is_empty());
        assert!(f.activity.last_received(7) > f.activity.last_accepted(7));
    }

    #[tokio::test]
    async fn test_low_quality_breach_is_archived_not_alerted() {
        // ---
        let f = fixture();
        let mut degraded = reading(9.0, 0);
        degraded.quality_score = 0.2;
        assert_ok!(f.ingress.submit(degraded).await);

        f.pipeline.shutdown().await;
        let archived = f.store.measurements();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].value, 9.0);
        assert!(f.store.alerts().is_empty());
        assert_eq!(f.engine.stats().low_quality_skips, 1);
    }
}
