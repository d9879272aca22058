use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::AlertStore;
use crate::error::StoreError;
use crate::models::{Alert, AlertTransition, AlertType, Measurement, TransitionKind};

// ---

#[derive(Debug, Default)]
struct Tables {
    alerts: HashMap<Uuid, Alert>,
    /// Alert ids in insertion order.
    order: Vec<Uuid>,
    applied: HashSet<Uuid>,
    measurements: Vec<Measurement>,
}

/// Store held in process memory.
///
/// Carries fault injection so outage and lost-acknowledgement behavior can
/// be exercised without a database.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
    read_only: AtomicBool,
    failing_writes: AtomicU32,
    rejected_writes: AtomicU32,
    lost_acks: AtomicU32,
}

impl InMemoryAlertStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While read-only, reads succeed and every write fails with
    /// `Unavailable`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Fail the next `n` writes before they apply.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` writes with a permanent database error.
    pub fn reject_next_writes(&self, n: u32) {
        self.rejected_writes.store(n, Ordering::SeqCst);
    }

    /// Apply the next `n` transitions but report them as failed, as when
    /// the connection drops after commit.
    pub fn lose_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Every alert row, in insertion order.
    pub fn alerts(&self) -> Vec<Alert> {
        let tables = self.lock();
        tables
            .order
            .iter()
            .filter_map(|id| tables.alerts.get(id).cloned())
            .collect()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.lock().measurements.clone()
    }

    pub fn applied_transitions(&self) -> usize {
        self.lock().applied.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check_online()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store read-only".into()));
        }
        if Self::take_one(&self.failing_writes) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        if Self::take_one(&self.rejected_writes) {
            return Err(StoreError::Database(sqlx::Error::Decode("injected rejection".into())));
        }
        Ok(())
    }
}

fn apply(tables: &mut Tables, transition: &AlertTransition) -> Result<(), StoreError> {
    // ---
    if tables.applied.contains(&transition.transition_id) {
        return Err(StoreError::DuplicateTransition(transition.transition_id));
    }

    match transition.kind {
        TransitionKind::Opened => {
            let key = transition.key();
            if tables.alerts.values().any(|a| a.is_active() && a.key() == key) {
                return Err(StoreError::ActiveAlertExists {
                    sensor_id: key.sensor_id,
                    alert_type: key.alert_type,
                });
            }
            tables
                .alerts
                .insert(transition.alert_id, Alert::from_opened(transition));
            tables.order.push(transition.alert_id);
        }
        _ => {
            let alert = tables
                .alerts
                .get_mut(&transition.alert_id)
                .ok_or(StoreError::AlertNotFound(transition.alert_id))?;
            if !alert.is_active() {
                return Err(StoreError::InvalidTransition {
                    alert_id: alert.id,
                    reason: format!("cannot apply {} to a resolved alert", transition.kind),
                });
            }
            alert.apply(transition);
        }
    }

    tables.applied.insert(transition.transition_id);
    Ok(())
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn find_open_alert(
        &self,
        sensor_id: i64,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError> {
        self.check_online()?;
        Ok(self
            .lock()
            .alerts
            .values()
            .find(|a| a.is_active() && a.sensor_id == sensor_id && a.alert_type == alert_type)
            .cloned())
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError> {
        self.check_online()?;
        Ok(self.lock().alerts.get(&alert_id).cloned())
    }

    async fn insert_transition(&self, transition: &AlertTransition) -> Result<(), StoreError> {
        // ---
        self.check_write()?;
        apply(&mut self.lock(), transition)?;
        if Self::take_one(&self.lost_acks) {
            return Err(StoreError::Unavailable("injected lost acknowledgement".into()));
        }
        Ok(())
    }

    async fn list_open(&self, sensor_id: Option<i64>) -> Result<Vec<Alert>, StoreError> {
        self.check_online()?;
        Ok(self
            .alerts()
            .into_iter()
            .filter(|a| a.is_active() && sensor_id.map_or(true, |id| a.sensor_id == id))
            .collect())
    }

    async fn recent_alerts(
        &self,
        sensor_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Alert>, StoreError> {
        // ---
        self.check_online()?;
        let mut alerts: Vec<Alert> = self
            .alerts()
            .into_iter()
            .filter(|a| sensor_id.map_or(true, |id| a.sensor_id == id))
            .collect();
        alerts.reverse();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit as usize);
        Ok(alerts)
    }

    async fn archive_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().measurements.push(measurement.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{AlertKey, AlertStatus, Severity};
    use chrono::{Duration, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    fn open(sensor_id: i64, minutes: i64) -> AlertTransition {
        let at = Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap() + Duration::minutes(minutes);
        AlertTransition::opened(
            AlertKey::new(sensor_id, AlertType::ThresholdHigh),
            Severity::Warning,
            "hot".into(),
            at,
        )
    }

    #[tokio::test]
    async fn test_transition_is_idempotent() {
        // ---
        let store = InMemoryAlertStore::new();
        let t = open(1, 0);

        assert_ok!(store.insert_transition(&t).await);
        let again = store.insert_transition(&t).await;
        assert!(matches!(again, Err(StoreError::DuplicateTransition(id)) if id == t.transition_id));

        assert_eq!(store.alerts().len(), 1);
        assert_eq!(store.applied_transitions(), 1);
    }

    #[tokio::test]
    async fn test_second_active_alert_refused() {
        // ---
        let store = InMemoryAlertStore::new();
        assert_ok!(store.insert_transition(&open(1, 0)).await);

        let dup = store.insert_transition(&open(1, 1)).await;
        assert!(matches!(dup, Err(StoreError::ActiveAlertExists { sensor_id: 1, .. })));

        // Another sensor is independent
        assert_ok!(store.insert_transition(&open(2, 1)).await);
        assert_eq!(store.list_open(None).await.unwrap().len(), 2);
        assert_eq!(store.list_open(Some(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_alert_frees_key() {
        // ---
        let store = InMemoryAlertStore::new();
        let first = open(1, 0);
        assert_ok!(store.insert_transition(&first).await);

        let alert = store.find_open_alert(1, AlertType::ThresholdHigh).await.unwrap().unwrap();
        let resolved =
            AlertTransition::resolved(&alert, "cool".into(), first.at + Duration::minutes(5));
        assert_ok!(store.insert_transition(&resolved).await);
        assert!(store.find_open_alert(1, AlertType::ThresholdHigh).await.unwrap().is_none());

        // No further changes to a resolved alert
        let ack = AlertTransition::acknowledged(&alert, first.at + Duration::minutes(6));
        assert_err!(store.insert_transition(&ack).await);

        assert_ok!(store.insert_transition(&open(1, 10)).await);
        let recent = store.recent_alerts(Some(1), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, AlertStatus::Open);
        assert_eq!(recent[1].status, AlertStatus::Resolved);
        assert_eq!(store.recent_alerts(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        // ---
        let store = InMemoryAlertStore::new();
        let t = open(1, 0);
        let m = Measurement {
            sensor_id: 1,
            value: 21.5,
            unit: "°C".into(),
            quality_score: 0.9,
            timestamp: t.at,
        };

        store.fail_next_writes(1);
        assert!(matches!(store.insert_transition(&t).await, Err(StoreError::Unavailable(_))));
        assert!(store.alerts().is_empty());

        store.lose_next_acks(1);
        assert_err!(store.insert_transition(&t).await);
        assert_eq!(store.alerts().len(), 1);

        store.set_read_only(true);
        assert_err!(store.archive_measurement(&m).await);
        assert_ok!(store.list_open(None).await);
        store.set_read_only(false);
        assert_ok!(store.archive_measurement(&m).await);
        assert_eq!(store.measurements().len(), 1);

        store.set_offline(true);
        assert_err!(store.list_open(None).await);
        store.set_offline(false);
        assert_ok!(store.list_open(None).await);
    }
}
