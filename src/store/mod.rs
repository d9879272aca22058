//! Alert store: durable alerts, their transitions, and the raw measurement
//! archive.
//!
//! `insert_transition` must be idempotent under the transition id. A repeat
//! returns [`StoreError::DuplicateTransition`], which callers treat as
//! success. Implementations also refuse to open a second unresolved alert for
//! the same `(sensor_id, type)` key.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Alert, AlertTransition, AlertType, Measurement};

mod memory;
mod postgres;

pub use memory::InMemoryAlertStore;
pub use postgres::PgAlertStore;

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The unresolved (open or acknowledged) alert for a key, if any.
    async fn find_open_alert(
        &self,
        sensor_id: i64,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError>;

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError>;

    /// Apply one transition atomically.
    async fn insert_transition(&self, transition: &AlertTransition) -> Result<(), StoreError>;

    /// Unresolved alerts, optionally for one sensor, oldest first.
    async fn list_open(&self, sensor_id: Option<i64>) -> Result<Vec<Alert>, StoreError>;

    /// Most recent alerts in any status, newest first.
    async fn recent_alerts(
        &self,
        sensor_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Alert>, StoreError>;

    async fn archive_measurement(&self, measurement: &Measurement) -> Result<(), StoreError>;
}
