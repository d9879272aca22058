use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::AlertStore;
use crate::error::StoreError;
use crate::models::{Alert, AlertTransition, AlertType, Measurement, TransitionKind};

// ---

/// PostgreSQL unique violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Store backed by the `alerts`, `alert_transitions` and `measurements`
/// tables.
///
/// Each transition runs in one database transaction that first takes a
/// transaction-scoped advisory lock derived from the alert key, so a
/// find-then-insert on the same key from another process is serialized too.
#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    // ---
    id: Uuid,
    sensor_id: i64,
    #[sqlx(rename = "type")]
    alert_type: String,
    severity: String,
    message: String,
    status: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        // ---
        let alert_type = row.alert_type.parse().map_err(|_| StoreError::Corrupt {
            column: "type",
            value: row.alert_type.clone(),
        })?;
        let severity = row.severity.parse().map_err(|_| StoreError::Corrupt {
            column: "severity",
            value: row.severity.clone(),
        })?;
        let status = row.status.parse().map_err(|_| StoreError::Corrupt {
            column: "status",
            value: row.status.clone(),
        })?;

        Ok(Alert {
            id: row.id,
            sensor_id: row.sensor_id,
            alert_type,
            severity,
            message: row.message,
            status,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

const SELECT_ALERT: &str = r#"
    SELECT id, sensor_id, type, severity, message, status, created_at, resolved_at
    FROM alerts
"#;

/// Advisory lock id for an alert key.
fn key_lock_id(sensor_id: i64, alert_type: AlertType) -> i64 {
    sensor_id.wrapping_mul(8).wrapping_add(alert_type.ordinal())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

impl PgAlertStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        transition: &AlertTransition,
    ) -> Result<(), StoreError> {
        // ---
        match transition.kind {
            TransitionKind::Opened => {
                let active: Option<Uuid> = sqlx::query_scalar(
                    "SELECT id FROM alerts WHERE sensor_id = $1 AND type = $2 AND status <> 'resolved'",
                )
                .bind(transition.sensor_id)
                .bind(transition.alert_type.as_str())
                .fetch_optional(&mut **tx)
                .await?;

                if active.is_some() {
                    return Err(StoreError::ActiveAlertExists {
                        sensor_id: transition.sensor_id,
                        alert_type: transition.alert_type,
                    });
                }

                sqlx::query(
                    r#"
                    INSERT INTO alerts (id, sensor_id, type, severity, message, status, created_at)
                    VALUES ($1, $2, $3, $4, $5, 'open', $6)
                    "#,
                )
                .bind(transition.alert_id)
                .bind(transition.sensor_id)
                .bind(transition.alert_type.as_str())
                .bind(transition.severity.as_str())
                .bind(&transition.message)
                .bind(transition.at)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::ActiveAlertExists {
                            sensor_id: transition.sensor_id,
                            alert_type: transition.alert_type,
                        }
                    } else {
                        StoreError::Database(e)
                    }
                })?;
            }
            TransitionKind::Escalated => {
                let result = sqlx::query(
                    r#"
                    UPDATE alerts SET severity = $2, message = $3, status = 'open'
                    WHERE id = $1 AND status <> 'resolved'
                    "#,
                )
                .bind(transition.alert_id)
                .bind(transition.severity.as_str())
                .bind(&transition.message)
                .execute(&mut **tx)
                .await?;
                Self::expect_row(tx, transition, result.rows_affected()).await?;
            }
            TransitionKind::Acknowledged => {
                let result = sqlx::query(
                    "UPDATE alerts SET status = 'acknowledged' WHERE id = $1 AND status <> 'resolved'",
                )
                .bind(transition.alert_id)
                .execute(&mut **tx)
                .await?;
                Self::expect_row(tx, transition, result.rows_affected()).await?;
            }
            TransitionKind::Resolved => {
                let result = sqlx::query(
                    r#"
                    UPDATE alerts SET status = 'resolved', resolved_at = $2
                    WHERE id = $1 AND status <> 'resolved'
                    "#,
                )
                .bind(transition.alert_id)
                .bind(transition.at)
                .execute(&mut **tx)
                .await?;
                Self::expect_row(tx, transition, result.rows_affected()).await?;
            }
        }
        Ok(())
    }

    /// Turn a zero-row update into the matching error.
    async fn expect_row(
        tx: &mut Transaction<'_, Postgres>,
        transition: &AlertTransition,
        rows: u64,
    ) -> Result<(), StoreError> {
        // ---
        if rows > 0 {
            return Ok(());
        }
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM alerts WHERE id = $1")
            .bind(transition.alert_id)
            .fetch_optional(&mut **tx)
            .await?;

        match exists {
            None => Err(StoreError::AlertNotFound(transition.alert_id)),
            Some(_) => Err(StoreError::InvalidTransition {
                alert_id: transition.alert_id,
                reason: format!("cannot apply {} to a resolved alert", transition.kind),
            }),
        }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn find_open_alert(
        &self,
        sensor_id: i64,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError> {
        // ---
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "{SELECT_ALERT} WHERE sensor_id = $1 AND type = $2 AND status <> 'resolved'"
        ))
        .bind(sensor_id)
        .bind(alert_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Alert::try_from).transpose()
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError> {
        let row: Option<AlertRow> = sqlx::query_as(&format!("{SELECT_ALERT} WHERE id = $1"))
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Alert::try_from).transpose()
    }

    async fn insert_transition(&self, transition: &AlertTransition) -> Result<(), StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key_lock_id(transition.sensor_id, transition.alert_type))
            .execute(&mut *tx)
            .await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO alert_transitions (transition_id, alert_id, kind, severity, applied_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (transition_id) DO NOTHING
            "#,
        )
        .bind(transition.transition_id)
        .bind(transition.alert_id)
        .bind(transition.kind.as_str())
        .bind(transition.severity.as_str())
        .bind(transition.at)
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::DuplicateTransition(transition.transition_id));
        }

        // Dropping `tx` on the error path rolls back.
        Self::apply(&mut tx, transition).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_open(&self, sensor_id: Option<i64>) -> Result<Vec<Alert>, StoreError> {
        // ---
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "{SELECT_ALERT} WHERE status <> 'resolved' AND ($1::BIGINT IS NULL OR sensor_id = $1) ORDER BY created_at"
        ))
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn recent_alerts(
        &self,
        sensor_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Alert>, StoreError> {
        // ---
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "{SELECT_ALERT} WHERE ($1::BIGINT IS NULL OR sensor_id = $1) ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(sensor_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn archive_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO measurements (sensor_id, value, unit, timestamp, quality_score)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(measurement.sensor_id)
        .bind(measurement.value)
        .bind(&measurement.unit)
        .bind(measurement.timestamp)
        .bind(measurement.quality_score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_key_lock_ids_are_distinct_per_key() {
        // ---
        let mut seen = std::collections::HashSet::new();
        for sensor_id in 1..=50 {
            for alert_type in [
                AlertType::ThresholdHigh,
                AlertType::ThresholdLow,
                AlertType::SensorFault,
                AlertType::StaleData,
            ] {
                assert!(seen.insert(key_lock_id(sensor_id, alert_type)));
            }
        }
    }
}
