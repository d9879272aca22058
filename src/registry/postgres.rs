use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use super::SensorRegistry;
use crate::error::LookupError;
use crate::models::{Sensor, SensorStatus, SensorType};

// ---

/// Registry backed by the `sensors` table. Reads on every call.
#[derive(Debug, Clone)]
pub struct PgSensorRegistry {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct SensorRow {
    // ---
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    sensor_type: String,
    location: String,
    unit: String,
    calibration_date: Option<NaiveDate>,
    last_maintenance: Option<NaiveDate>,
    status: String,
    threshold_min: Option<f64>,
    threshold_max: Option<f64>,
}

impl TryFrom<SensorRow> for Sensor {
    type Error = LookupError;

    fn try_from(row: SensorRow) -> Result<Self, Self::Error> {
        // ---
        let sensor_type: SensorType = row
            .sensor_type
            .parse()
            .map_err(|e| LookupError::Backend(format!("sensor {}: {e}", row.id)))?;
        let status: SensorStatus = row
            .status
            .parse()
            .map_err(|e| LookupError::Backend(format!("sensor {}: {e}", row.id)))?;

        Ok(Sensor {
            id: row.id,
            name: row.name,
            sensor_type,
            location: row.location,
            unit: row.unit,
            threshold_min: row.threshold_min,
            threshold_max: row.threshold_max,
            status,
            calibration_date: row.calibration_date,
            last_maintenance: row.last_maintenance,
        })
    }
}

const SELECT_SENSOR: &str = r#"
    SELECT id, name, type, location, unit, calibration_date, last_maintenance,
           status, threshold_min, threshold_max
    FROM sensors
"#;

impl PgSensorRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SensorRegistry for PgSensorRegistry {
    async fn sensor(&self, sensor_id: i64) -> Result<Sensor, LookupError> {
        // ---
        let row: Option<SensorRow> = sqlx::query_as(&format!("{SELECT_SENSOR} WHERE id = $1"))
            .bind(sensor_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(LookupError::SensorNotFound(sensor_id))?
            .try_into()
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>, LookupError> {
        // ---
        let rows: Vec<SensorRow> = sqlx::query_as(&format!("{SELECT_SENSOR} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Sensor::try_from).collect()
    }
}
