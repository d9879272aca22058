//! Database schema management for `roomwatch`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensors`, `measurements`, `alerts` and `alert_transitions`. The
/// partial unique index on `alerts` is what keeps a second unresolved alert
/// for the same `(sensor_id, type)` out, even across processes.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Sensor catalog, soft-retired through `status`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id                BIGSERIAL PRIMARY KEY,
            name              TEXT             NOT NULL,
            type              TEXT             NOT NULL,
            location          TEXT             NOT NULL DEFAULT '',
            unit              TEXT             NOT NULL,
            calibration_date  DATE,
            last_maintenance  DATE,
            status            TEXT             NOT NULL DEFAULT 'active',
            threshold_min     DOUBLE PRECISION,
            threshold_max     DOUBLE PRECISION,
            created_at        TIMESTAMPTZ      NOT NULL DEFAULT now(),
            updated_at        TIMESTAMPTZ      NOT NULL DEFAULT now(),
            CHECK (threshold_min IS NULL OR threshold_max IS NULL OR threshold_min <= threshold_max)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Raw measurement archive
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id             BIGSERIAL PRIMARY KEY,
            sensor_id      BIGINT           NOT NULL REFERENCES sensors (id),
            value          DOUBLE PRECISION NOT NULL,
            unit           TEXT             NOT NULL,
            timestamp      TIMESTAMPTZ      NOT NULL,
            quality_score  DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id           UUID PRIMARY KEY,
            sensor_id    BIGINT      NOT NULL REFERENCES sensors (id),
            type         TEXT        NOT NULL,
            severity     TEXT        NOT NULL,
            message      TEXT        NOT NULL,
            status       TEXT        NOT NULL,
            created_at   TIMESTAMPTZ NOT NULL,
            resolved_at  TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Applied transition ids, for idempotent retries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_transitions (
            transition_id  UUID PRIMARY KEY,
            alert_id       UUID        NOT NULL,
            kind           TEXT        NOT NULL,
            severity       TEXT        NOT NULL,
            applied_at     TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_active_per_key
            ON alerts (sensor_id, type)
            WHERE status <> 'resolved';
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_created_at
            ON alerts (created_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_sensor_time
            ON measurements (sensor_id, timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alert_transitions_alert_id
            ON alert_transitions (alert_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
