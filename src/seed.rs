//! Default sensor catalog for a fresh installation.
//!
//! One sensor of each type with the stock thresholds, inserted only when the
//! `sensors` table is empty.

use anyhow::Result;
use sqlx::PgPool;

use crate::models::{Sensor, SensorStatus, SensorType};

// ---

fn stock(
    id: i64,
    name: &str,
    sensor_type: SensorType,
    unit: &str,
    threshold_min: Option<f64>,
    threshold_max: Option<f64>,
) -> Sensor {
    Sensor {
        id,
        name: name.to_string(),
        sensor_type,
        location: "Server room".to_string(),
        unit: unit.to_string(),
        threshold_min,
        threshold_max,
        status: SensorStatus::Active,
        calibration_date: None,
        last_maintenance: None,
    }
}

/// Stock catalog, ids numbered from 1 in insertion order.
pub fn default_catalog() -> Vec<Sensor> {
    // ---
    vec![
        stock(1, "Ambient temperature", SensorType::Temperature, "°C", Some(20.0), Some(30.0)),
        stock(2, "Ambient humidity", SensorType::Humidity, "%", Some(30.0), Some(70.0)),
        stock(3, "CO2 level", SensorType::AirQuality, "ppm", None, Some(1000.0)),
        stock(4, "Smoke detector", SensorType::Smoke, "ppm", None, Some(50.0)),
        stock(5, "Gas detector", SensorType::Gas, "ppm", None, Some(50.0)),
        stock(6, "Motion detector", SensorType::Motion, "binary", None, Some(0.5)),
        stock(7, "Noise level", SensorType::Sound, "dB", None, Some(70.0)),
        stock(8, "Rack vibration", SensorType::Vibration, "g", None, Some(0.5)),
        stock(9, "Floor water leak", SensorType::WaterLeak, "binary", None, Some(0.5)),
        stock(10, "Ambient light", SensorType::Light, "lux", Some(200.0), Some(800.0)),
        stock(11, "Entrance door", SensorType::DoorContact, "binary", None, Some(0.5)),
        stock(12, "PDU load", SensorType::Power, "kW", None, Some(8.0)),
    ]
}

/// Insert [`default_catalog`] when no sensors exist. Returns how many rows
/// were inserted.
pub async fn seed_default_sensors(pool: &PgPool) -> Result<u64> {
    // ---
    let mut tx = pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensors")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        tracing::debug!(existing, "Sensors already provisioned, skipping seed");
        return Ok(0);
    }

    let mut inserted = 0;
    for sensor in default_catalog() {
        inserted += sqlx::query(
            r#"
            INSERT INTO sensors (name, type, location, unit, status, threshold_min, threshold_max)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&sensor.name)
        .bind(sensor.sensor_type.as_str())
        .bind(&sensor.location)
        .bind(&sensor.unit)
        .bind(sensor.status.as_str())
        .bind(sensor.threshold_min)
        .bind(sensor.threshold_max)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    tracing::info!(inserted, "Seeded default sensor catalog");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_covers_every_type_once() {
        // ---
        let catalog = default_catalog();
        let types: HashSet<SensorType> = catalog.iter().map(|s| s.sensor_type).collect();
        assert_eq!(catalog.len(), SensorType::ALL.len());
        assert_eq!(types.len(), SensorType::ALL.len());
    }

    #[test]
    fn test_catalog_thresholds_are_valid() {
        // ---
        for sensor in default_catalog() {
            assert!(sensor.validate().is_ok(), "{} has inverted thresholds", sensor.name);
            assert!(sensor.threshold_max.is_some() || sensor.threshold_min.is_some());
        }
    }

    #[test]
    fn test_binary_sensors_breach_on_trigger() {
        // ---
        for sensor in default_catalog().iter().filter(|s| s.unit == "binary") {
            assert!(sensor.breach(0.0).is_none());
            assert!(sensor.breach(1.0).is_some());
        }
    }
}
