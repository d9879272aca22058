//! Error taxonomy for the alert pipeline.
//!
//! None of these are fatal to the process. Ingress rejections go back to the
//! caller, lookup failures skip one evaluation, and persistence failures are
//! retried and then queued for replay.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::AlertType;

/// A measurement refused by ingress. Reported to the caller, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Ingress: sensor {0} is not registered")]
    UnknownSensor(i64),

    #[error("Ingress: value for sensor {sensor_id} is not finite")]
    NonFiniteValue { sensor_id: i64 },

    #[error("Ingress: quality score {score} for sensor {sensor_id} is outside 0.0..=1.0")]
    QualityOutOfRange { sensor_id: i64, score: f64 },

    #[error("Ingress: sensor {sensor_id} expects unit '{expected}', got '{actual}'")]
    UnitMismatch {
        sensor_id: i64,
        expected: String,
        actual: String,
    },

    #[error(
        "Ingress: reading for sensor {sensor_id} at {timestamp} is older than last accepted {last_accepted}"
    )]
    OutOfOrder {
        sensor_id: i64,
        timestamp: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
    },

    #[error("Ingress: sensor registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Ingress: shutting down")]
    ShuttingDown,
}

impl ValidationError {
    /// Short label used as the rejection counter key.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::UnknownSensor(_) => "unknown_sensor",
            ValidationError::NonFiniteValue { .. } => "non_finite_value",
            ValidationError::QualityOutOfRange { .. } => "quality_out_of_range",
            ValidationError::UnitMismatch { .. } => "unit_mismatch",
            ValidationError::OutOfOrder { .. } => "out_of_order",
            ValidationError::RegistryUnavailable(_) => "registry_unavailable",
            ValidationError::ShuttingDown => "shutting_down",
        }
    }
}

/// Sensor registry lookup failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("Registry: sensor {0} not found")]
    SensorNotFound(i64),

    #[error("Registry: backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for LookupError {
    fn from(e: sqlx::Error) -> Self {
        LookupError::Backend(e.to_string())
    }
}

/// Invalid sensor configuration offered to a registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorConfigError {
    #[error("Registry: sensor {sensor_id} has threshold_min {min} above threshold_max {max}")]
    InvalidThresholds { sensor_id: i64, min: f64, max: f64 },

    #[error("Registry: sensor {0} not found")]
    NotFound(i64),
}

/// Alert store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The transition id was already applied. Callers treat this as success.
    #[error("Store: transition {0} already applied")]
    DuplicateTransition(Uuid),

    #[error("Store: alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("Store: an unresolved {alert_type} alert already exists for sensor {sensor_id}")]
    ActiveAlertExists { sensor_id: i64, alert_type: AlertType },

    #[error("Store: transition rejected for alert {alert_id}: {reason}")]
    InvalidTransition { alert_id: Uuid, reason: String },

    #[error("Store: unavailable: {0}")]
    Unavailable(String),

    #[error("Store: database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store: unexpected value '{value}' in column '{column}'")]
    Corrupt { column: &'static str, value: String },
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => sqlx_is_transient(e),
            _ => false,
        }
    }
}

fn sqlx_is_transient(error: &sqlx::Error) -> bool {
    // ---
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| sqlstate_is_transient(&code)),
        _ => false,
    }
}

/// SQLSTATE classes that clear without changing the statement: connection
/// exception (08), transaction rollback (40), insufficient resources (53)
/// and operator intervention (57).
fn sqlstate_is_transient(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57"))
}

/// Engine-level failure surfaced to operator actions and evaluation callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Engine: store write failed after {attempts} attempts: {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Engine: alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("Engine: alert {0} is already resolved")]
    AlreadyResolved(Uuid),
}

/// Notification delivery failure. Logged by the engine, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notify: endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Notify: no subscribers on channel")]
    NoSubscribers,
}

impl NotifyError {
    /// Connection failures, throttling and server errors are worth another
    /// attempt; a 4xx will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Http(_) => true,
            NotifyError::Status { status, .. } => *status == 429 || *status >= 500,
            NotifyError::NoSubscribers => false,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_transient_classification() {
        // ---
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::DuplicateTransition(Uuid::nil()).is_transient());
        assert!(!StoreError::AlertNotFound(Uuid::nil()).is_transient());
        assert!(!StoreError::ActiveAlertExists {
            sensor_id: 1,
            alert_type: AlertType::ThresholdHigh
        }
        .is_transient());
    }

    #[test]
    fn test_database_errors_classified_by_cause() {
        // ---
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StoreError::Database(sqlx::Error::WorkerCrashed).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::Database(sqlx::Error::Decode("bad severity".into())).is_transient());
    }

    #[test]
    fn test_sqlstate_classes() {
        // ---
        for code in ["08006", "08001", "40001", "40P01", "53300", "57P01"] {
            assert!(sqlstate_is_transient(code), "{code} should be retried");
        }
        // foreign key, not null, numeric out of range, syntax
        for code in ["23503", "23502", "22003", "42601", ""] {
            assert!(!sqlstate_is_transient(code), "{code} should not be retried");
        }
    }

    #[test]
    fn test_rejection_messages() {
        // ---
        let err = ValidationError::UnitMismatch {
            sensor_id: 3,
            expected: "%".into(),
            actual: "°C".into(),
        };
        assert!(err.to_string().contains("expects unit '%'"));
        assert_eq!(err.reason(), "unit_mismatch");
        assert_eq!(ValidationError::UnknownSensor(9).reason(), "unknown_sensor");
    }
}
