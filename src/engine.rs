//! Alert evaluation engine.
//!
//! Turns accepted measurements into alert lifecycle transitions:
//!
//! - a breach opens a `threshold_high`/`threshold_low` alert, severity from
//!   the sensor type's band table
//! - further breaches escalate the same alert, never downgrade it
//! - `hysteresis_count` consecutive in-bound readings resolve it
//! - silent sensors get one `stale_data` warning, cleared by the next reading
//!
//! Find, decide, persist and notify run under a per-key lock. Every
//! transition is persisted before it is pushed to the sink, exactly once.
//! Transitions that cannot be written after the retry budget are queued for
//! replay and the engine raises a critical `sensor_fault` health event until
//! the queue drains. Readings for a key with queued transitions are held
//! back and applied in arrival order once the replay lands.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::activity::SensorActivity;
use crate::error::{EngineError, StoreError};
use crate::hysteresis::HysteresisTracker;
use crate::keylock::KeyLocks;
use crate::models::{
    Alert, AlertKey, AlertStatus, AlertTransition, AlertType, Breach, Measurement,
    NotificationEvent, Sensor, SensorStatus, Severity,
};
use crate::notify::{deliver, NotificationSink};
use crate::registry::SensorRegistry;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::severity::{describe_breach, SeverityPolicy};
use crate::store::AlertStore;

// ---

/// Tunables for evaluation. Defaults are starting points, not contracts.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Consecutive in-bound readings needed to resolve a breach alert.
    pub hysteresis_count: u32,
    /// Silence after which a sensor gets a `stale_data` alert.
    pub staleness_window: chrono::Duration,
    /// Readings below this quality are archived but not evaluated.
    pub min_quality: f64,
    pub retry: RetryPolicy,
    /// Transitions held in memory while the store is unreachable.
    pub replay_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hysteresis_count: 3,
            staleness_window: chrono::Duration::seconds(300),
            min_quality: 0.5,
            retry: RetryPolicy::default(),
            replay_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    low_quality_skips: AtomicU64,
    lookup_skips: AtomicU64,
    deferred_evaluations: AtomicU64,
    deferred_dropped: AtomicU64,
    transitions_persisted: AtomicU64,
    duplicate_transitions: AtomicU64,
    rejected_transitions: AtomicU64,
    persistence_failures: AtomicU64,
    replayed: AtomicU64,
    replay_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub evaluations: u64,
    pub low_quality_skips: u64,
    pub lookup_skips: u64,
    pub deferred_evaluations: u64,
    pub deferred_dropped: u64,
    pub deferred_pending: usize,
    pub transitions_persisted: u64,
    pub duplicate_transitions: u64,
    pub rejected_transitions: u64,
    pub persistence_failures: u64,
    pub replayed: u64,
    pub replay_dropped: u64,
    pub replay_pending: usize,
    pub store_degraded: bool,
}

/// One per-key decision taken for a reading.
#[derive(Debug, Clone, Copy)]
enum Step {
    ClearStale,
    Raise(Breach),
    Settle(AlertType),
}

impl Step {
    fn key(&self, sensor_id: i64) -> AlertKey {
        match self {
            Step::ClearStale => AlertKey::new(sensor_id, AlertType::StaleData),
            Step::Raise(breach) => AlertKey::new(sensor_id, breach.alert_type),
            Step::Settle(alert_type) => AlertKey::new(sensor_id, *alert_type),
        }
    }
}

/// A step held back while its key has transitions waiting for replay.
#[derive(Debug, Clone)]
struct DeferredStep {
    sensor: Sensor,
    measurement: Measurement,
    step: Step,
}

pub struct AlertEngine {
    registry: Arc<dyn SensorRegistry>,
    store: Arc<dyn AlertStore>,
    sink: Arc<dyn NotificationSink>,
    activity: Arc<SensorActivity>,
    severity: SeverityPolicy,
    settings: EngineSettings,
    locks: KeyLocks,
    hysteresis: HysteresisTracker,
    replay: Mutex<VecDeque<AlertTransition>>,
    replay_gate: AsyncMutex<()>,
    deferred: Mutex<HashMap<AlertKey, VecDeque<DeferredStep>>>,
    /// Open engine-health fault, present while the store is degraded.
    health: Mutex<Option<NotificationEvent>>,
    counters: Counters,
}

impl AlertEngine {
    // ---
    pub fn new(
        registry: Arc<dyn SensorRegistry>,
        store: Arc<dyn AlertStore>,
        sink: Arc<dyn NotificationSink>,
        activity: Arc<SensorActivity>,
        severity: SeverityPolicy,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            sink,
            activity,
            severity,
            hysteresis: HysteresisTracker::new(settings.hysteresis_count),
            settings,
            locks: KeyLocks::new(),
            replay: Mutex::new(VecDeque::new()),
            replay_gate: AsyncMutex::new(()),
            deferred: Mutex::new(HashMap::new()),
            health: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Evaluate one accepted measurement.
    ///
    /// Returns the transitions decided for it, including any that were
    /// queued for replay. A sensor missing from the registry is an error for
    /// this reading only.
    pub async fn evaluate(
        &self,
        measurement: &Measurement,
    ) -> Result<Vec<AlertTransition>, EngineError> {
        // ---
        bump(&self.counters.evaluations);

        let sensor = match self.registry.sensor(measurement.sensor_id).await {
            Ok(sensor) => sensor,
            Err(e) => {
                bump(&self.counters.lookup_skips);
                tracing::warn!(
                    sensor_id = measurement.sensor_id,
                    error = %e,
                    "Sensor lookup failed, skipping evaluation"
                );
                return Err(e.into());
            }
        };

        if measurement.quality_score < self.settings.min_quality {
            bump(&self.counters.low_quality_skips);
            tracing::info!(
                sensor_id = sensor.id,
                quality = measurement.quality_score,
                min_quality = self.settings.min_quality,
                "Low-quality reading excluded from evaluation"
            );
            return Ok(Vec::new());
        }

        let replay_waiting = !self.replay_queue().is_empty();
        let deferred_waiting = !self.deferred_steps().is_empty();
        if replay_waiting || deferred_waiting {
            self.replay_pending().await;
        }

        let mut transitions = Vec::new();
        transitions.extend(self.step(&sensor, measurement, Step::ClearStale).await);

        if sensor.status != SensorStatus::Active {
            tracing::debug!(
                sensor_id = sensor.id,
                status = %sensor.status,
                "Sensor not active, skipping threshold evaluation"
            );
            return Ok(transitions);
        }

        match sensor.breach(measurement.value) {
            Some(breach) => {
                self.hysteresis.record_breach(sensor.id);
                transitions.extend(self.step(&sensor, measurement, Step::Raise(breach)).await);
            }
            None => {
                for alert_type in [AlertType::ThresholdHigh, AlertType::ThresholdLow] {
                    let settled = self.step(&sensor, measurement, Step::Settle(alert_type)).await;
                    transitions.extend(settled);
                }
            }
        }

        Ok(transitions)
    }

    /// Open a `stale_data` warning for every non-offline sensor that has been
    /// silent longer than the staleness window.
    pub async fn check_staleness(&self, now: DateTime<Utc>) -> Vec<AlertTransition> {
        // ---
        let sensors = match self.registry.list_sensors().await {
            Ok(sensors) => sensors,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list sensors for staleness check");
                return Vec::new();
            }
        };

        let mut transitions = Vec::new();
        for sensor in sensors {
            if sensor.status == SensorStatus::Offline {
                continue;
            }
            let silent_for = now - self.activity.last_seen_or_start(sensor.id);
            if silent_for <= self.settings.staleness_window {
                continue;
            }

            let key = AlertKey::new(sensor.id, AlertType::StaleData);
            if self.is_deferred(key) {
                continue;
            }
            let _guard = self.locks.acquire(key).await;
            match self.find_open(key).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "Cannot read stale-data alert state");
                    continue;
                }
            }

            let message = format!(
                "No measurement from {} for {}s (window {}s)",
                sensor.name,
                silent_for.num_seconds(),
                self.settings.staleness_window.num_seconds()
            );
            let opened = AlertTransition::opened(key, Severity::Warning, message, now);
            transitions.extend(self.commit(opened).await);
        }
        transitions
    }

    /// Operator acknowledgment. Acknowledging twice is a no-op.
    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<Alert, EngineError> {
        // ---
        let key = self.alert_key(alert_id).await?;
        let _guard = self.locks.acquire(key).await;

        let mut alert = self
            .store
            .find_alert(alert_id)
            .await?
            .ok_or(EngineError::AlertNotFound(alert_id))?;

        match alert.status {
            AlertStatus::Resolved => Err(EngineError::AlreadyResolved(alert_id)),
            AlertStatus::Acknowledged => Ok(alert),
            AlertStatus::Open => {
                let transition = AlertTransition::acknowledged(&alert, Utc::now());
                self.commit_operator(&transition).await?;
                alert.apply(&transition);
                Ok(alert)
            }
        }
    }

    /// Operator resolution, accepted regardless of the current reading.
    pub async fn resolve(&self, alert_id: Uuid) -> Result<Alert, EngineError> {
        // ---
        let key = self.alert_key(alert_id).await?;
        let _guard = self.locks.acquire(key).await;

        let mut alert = self
            .store
            .find_alert(alert_id)
            .await?
            .ok_or(EngineError::AlertNotFound(alert_id))?;

        if alert.status == AlertStatus::Resolved {
            return Err(EngineError::AlreadyResolved(alert_id));
        }

        let transition =
            AlertTransition::resolved(&alert, "Resolved by operator".to_string(), Utc::now());
        self.commit_operator(&transition).await?;
        self.hysteresis.clear(key);
        alert.apply(&transition);
        Ok(alert)
    }

    /// Retry queued transitions in order, then apply the readings held back
    /// behind them. Stops at the first transient failure. Returns how many
    /// transitions landed. A replay already in progress elsewhere makes this
    /// a no-op.
    pub async fn replay_pending(&self) -> usize {
        // ---
        let Ok(_gate) = self.replay_gate.try_lock() else {
            return 0;
        };
        self.replay_queued().await
    }

    /// Like [`replay_pending`](Self::replay_pending), but waits for a replay
    /// in progress to finish first. Used on shutdown.
    pub async fn flush_pending(&self) -> usize {
        // ---
        let _gate = self.replay_gate.lock().await;
        self.replay_queued().await
    }

    async fn replay_queued(&self) -> usize {
        // ---
        let mut replayed = 0;
        loop {
            let next = self.replay_queue().front().cloned();
            let Some(transition) = next else {
                break;
            };

            let _guard = self.locks.acquire(transition.key()).await;
            match self.store.insert_transition(&transition).await {
                Ok(()) | Err(StoreError::DuplicateTransition(_)) => {
                    self.replay_queue().pop_front();
                    bump(&self.counters.replayed);
                    replayed += 1;
                    deliver(self.sink.as_ref(), &transition.to_event()).await;
                }
                Err(e) if e.is_transient() => {
                    let pending = self.replay_queue().len();
                    tracing::debug!(error = %e, pending, "Store still unavailable");
                    break;
                }
                Err(e) => {
                    self.replay_queue().pop_front();
                    bump(&self.counters.replay_dropped);
                    tracing::error!(
                        transition_id = %transition.transition_id,
                        key = %transition.key(),
                        error = %e,
                        "Replayed transition rejected by store, dropping"
                    );
                }
            }
        }

        if replayed > 0 {
            tracing::info!(replayed, "Replayed queued alert transitions");
        }
        let applied = self.run_deferred().await;
        if !applied.is_empty() {
            tracing::info!(count = applied.len(), "Deferred readings produced alert transitions");
        }
        if self.replay_queue().is_empty() {
            self.leave_degraded().await;
        }
        replayed
    }

    /// Periodic staleness sweep and replay until `shutdown` flips.
    pub async fn run_maintenance(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // ---
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.replay_pending().await;
                    let opened = self.check_staleness(Utc::now()).await;
                    if !opened.is_empty() {
                        tracing::debug!(count = opened.len(), "Stale-data alerts opened");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Engine maintenance loop stopped");
    }

    /// Current engine-health fault, if the store is degraded.
    pub fn health(&self) -> Option<NotificationEvent> {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self) -> EngineStats {
        // ---
        let c = &self.counters;
        EngineStats {
            evaluations: c.evaluations.load(Ordering::Relaxed),
            low_quality_skips: c.low_quality_skips.load(Ordering::Relaxed),
            lookup_skips: c.lookup_skips.load(Ordering::Relaxed),
            deferred_evaluations: c.deferred_evaluations.load(Ordering::Relaxed),
            deferred_dropped: c.deferred_dropped.load(Ordering::Relaxed),
            deferred_pending: self.deferred_steps().values().map(VecDeque::len).sum(),
            transitions_persisted: c.transitions_persisted.load(Ordering::Relaxed),
            duplicate_transitions: c.duplicate_transitions.load(Ordering::Relaxed),
            rejected_transitions: c.rejected_transitions.load(Ordering::Relaxed),
            persistence_failures: c.persistence_failures.load(Ordering::Relaxed),
            replayed: c.replayed.load(Ordering::Relaxed),
            replay_dropped: c.replay_dropped.load(Ordering::Relaxed),
            replay_pending: self.replay_queue().len(),
            store_degraded: self.health().is_some(),
        }
    }

    // --- evaluation steps

    /// Apply `step` now, or hold it back behind the key's queued transitions.
    async fn step(
        &self,
        sensor: &Sensor,
        measurement: &Measurement,
        step: Step,
    ) -> Option<AlertTransition> {
        // ---
        let key = step.key(sensor.id);
        if self.is_deferred(key) {
            self.defer(
                key,
                DeferredStep {
                    sensor: sensor.clone(),
                    measurement: measurement.clone(),
                    step,
                },
            );
            return None;
        }
        self.apply_step(sensor, measurement, step).await
    }

    async fn apply_step(
        &self,
        sensor: &Sensor,
        measurement: &Measurement,
        step: Step,
    ) -> Option<AlertTransition> {
        match step {
            Step::ClearStale => self.clear_stale(sensor).await,
            Step::Raise(breach) => self.raise(sensor, measurement, breach).await,
            Step::Settle(alert_type) => self.settle(sensor, measurement, alert_type).await,
        }
    }

    /// Apply held-back steps for every key whose queued transitions have
    /// landed, oldest first. A step stays queued until it has been applied,
    /// so newer readings for the key keep lining up behind it.
    async fn run_deferred(&self) -> Vec<AlertTransition> {
        // ---
        let keys: Vec<AlertKey> = self.deferred_steps().keys().copied().collect();
        let mut transitions = Vec::new();

        for key in keys {
            loop {
                if self.replay_queue().iter().any(|t| t.key() == key) {
                    break;
                }
                let next = self.deferred_steps().get(&key).and_then(|q| q.front().cloned());
                let Some(deferred) = next else {
                    break;
                };

                // The live breach already restarted the sensor's counters;
                // restart this key again so held-back in-bound readings
                // before it do not count toward readings after it.
                if let Step::Raise(_) = deferred.step {
                    self.hysteresis.clear(key);
                }
                transitions.extend(
                    self.apply_step(&deferred.sensor, &deferred.measurement, deferred.step)
                        .await,
                );

                let mut steps = self.deferred_steps();
                if let Some(queue) = steps.get_mut(&key) {
                    queue.pop_front();
                    if queue.is_empty() {
                        steps.remove(&key);
                    }
                }
            }
        }
        transitions
    }

    /// Open or escalate the alert for a breach.
    async fn raise(
        &self,
        sensor: &Sensor,
        measurement: &Measurement,
        breach: Breach,
    ) -> Option<AlertTransition> {
        // ---
        let key = AlertKey::new(sensor.id, breach.alert_type);
        let _guard = self.locks.acquire(key).await;

        let severity = self
            .severity
            .classify(sensor.sensor_type, measurement.value, breach.bound, sensor.span());

        let existing = match self.find_open(key).await {
            Ok(existing) => existing,
            Err(e) => {
                bump(&self.counters.deferred_evaluations);
                tracing::error!(%key, error = %e, "Cannot read alert state, breach not recorded");
                return None;
            }
        };

        let message = describe_breach(sensor, measurement.value, breach);
        let transition = match existing {
            None => AlertTransition::opened(key, severity, message, measurement.timestamp),
            Some(alert) if severity > alert.severity => AlertTransition::escalated(
                &alert,
                severity,
                format!("{message} (escalated from {} to {severity})", alert.severity),
                measurement.timestamp,
            ),
            Some(_) => return None,
        };
        self.commit(transition).await
    }

    /// Count an in-bound reading against an unresolved breach alert.
    async fn settle(
        &self,
        sensor: &Sensor,
        measurement: &Measurement,
        alert_type: AlertType,
    ) -> Option<AlertTransition> {
        // ---
        let key = AlertKey::new(sensor.id, alert_type);
        let _guard = self.locks.acquire(key).await;

        let alert = match self.find_open(key).await {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                self.hysteresis.clear(key);
                return None;
            }
            Err(e) => {
                bump(&self.counters.deferred_evaluations);
                tracing::error!(
                    %key,
                    error = %e,
                    "Cannot read alert state, in-bound reading not counted"
                );
                return None;
            }
        };

        if !self.hysteresis.record_in_bound(key) {
            tracing::trace!(%key, count = self.hysteresis.count(key), "In-bound reading counted");
            return None;
        }

        let message = format!(
            "{} back within thresholds for {} consecutive readings (last {:.2} {})",
            sensor.name,
            self.hysteresis.required(),
            measurement.value,
            sensor.unit
        );
        self.commit(AlertTransition::resolved(&alert, message, measurement.timestamp))
            .await
    }

    /// Resolve the sensor's stale-data alert, if one is open. Stamped with
    /// the server clock, the same clock staleness is measured on.
    async fn clear_stale(&self, sensor: &Sensor) -> Option<AlertTransition> {
        // ---
        let key = AlertKey::new(sensor.id, AlertType::StaleData);
        let _guard = self.locks.acquire(key).await;

        let alert = match self.find_open(key).await {
            Ok(alert) => alert?,
            Err(e) => {
                tracing::warn!(%key, error = %e, "Cannot read stale-data alert state");
                return None;
            }
        };
        let message = format!("{} reporting again", sensor.name);
        let at = Utc::now().max(alert.created_at);
        self.commit(AlertTransition::resolved(&alert, message, at)).await
    }

    // --- persistence

    async fn find_open(&self, key: AlertKey) -> Result<Option<Alert>, StoreError> {
        retry_with_backoff(
            &self.settings.retry,
            "find_open_alert",
            || self.store.find_open_alert(key.sensor_id, key.alert_type),
            StoreError::is_transient,
        )
        .await
    }

    /// Persist with retries. A duplicate transition id means an earlier
    /// attempt landed, which counts as success.
    async fn persist(&self, transition: &AlertTransition) -> Result<(), StoreError> {
        // ---
        let result = retry_with_backoff(
            &self.settings.retry,
            "insert_transition",
            || self.store.insert_transition(transition),
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                bump(&self.counters.transitions_persisted);
                Ok(())
            }
            Err(StoreError::DuplicateTransition(id)) => {
                bump(&self.counters.duplicate_transitions);
                tracing::debug!(transition_id = %id, "Transition already applied");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist then notify. Transient failures queue the transition for
    /// replay; permanent ones drop it.
    async fn commit(&self, transition: AlertTransition) -> Option<AlertTransition> {
        // ---
        match self.persist(&transition).await {
            Ok(()) => {
                tracing::debug!(
                    key = %transition.key(),
                    kind = %transition.kind,
                    severity = %transition.severity,
                    "Alert transition committed"
                );
                deliver(self.sink.as_ref(), &transition.to_event()).await;
                Some(transition)
            }
            Err(e) if e.is_transient() => {
                bump(&self.counters.persistence_failures);
                self.enqueue_replay(transition.clone());
                self.enter_degraded(&transition, &e).await;
                Some(transition)
            }
            Err(e) => {
                bump(&self.counters.rejected_transitions);
                tracing::error!(
                    key = %transition.key(),
                    kind = %transition.kind,
                    error = %e,
                    "Store rejected alert transition"
                );
                None
            }
        }
    }

    /// Operator actions report persistence failures to the caller instead
    /// of queueing.
    async fn commit_operator(&self, transition: &AlertTransition) -> Result<(), EngineError> {
        // ---
        if let Err(e) = self.persist(transition).await {
            bump(&self.counters.persistence_failures);
            return Err(if e.is_transient() {
                EngineError::Persistence {
                    attempts: self.settings.retry.attempts,
                    source: e,
                }
            } else {
                EngineError::Store(e)
            });
        }
        deliver(self.sink.as_ref(), &transition.to_event()).await;
        Ok(())
    }

    async fn alert_key(&self, alert_id: Uuid) -> Result<AlertKey, EngineError> {
        self.store
            .find_alert(alert_id)
            .await?
            .map(|a| a.key())
            .ok_or(EngineError::AlertNotFound(alert_id))
    }

    // --- replay queue and health

    fn replay_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<AlertTransition>> {
        self.replay.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deferred_steps(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<AlertKey, VecDeque<DeferredStep>>> {
        self.deferred.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A key with queued transitions, or with readings already held back
    /// behind them, is not evaluated until they land, since the store does
    /// not yet reflect them.
    fn is_deferred(&self, key: AlertKey) -> bool {
        // ---
        let queued = self.replay_queue().iter().any(|t| t.key() == key);
        let pending = queued || self.deferred_steps().contains_key(&key);
        if pending {
            bump(&self.counters.deferred_evaluations);
            tracing::debug!(%key, "Transitions pending replay, deferring evaluation");
        }
        pending
    }

    fn defer(&self, key: AlertKey, step: DeferredStep) {
        // ---
        let mut steps = self.deferred_steps();
        let queue = steps.entry(key).or_default();
        if queue.len() >= self.settings.replay_capacity {
            queue.pop_front();
            bump(&self.counters.deferred_dropped);
            tracing::warn!(
                %key,
                capacity = self.settings.replay_capacity,
                "Deferred readings full, dropping oldest"
            );
        }
        queue.push_back(step);
    }

    fn enqueue_replay(&self, transition: AlertTransition) {
        // ---
        let mut queue = self.replay_queue();
        if queue.len() >= self.settings.replay_capacity {
            bump(&self.counters.replay_dropped);
            tracing::error!(
                transition_id = %transition.transition_id,
                key = %transition.key(),
                capacity = self.settings.replay_capacity,
                "Replay queue full, dropping alert transition"
            );
            return;
        }
        queue.push_back(transition);
    }

    async fn enter_degraded(&self, transition: &AlertTransition, error: &StoreError) {
        // ---
        let event = {
            let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            if health.is_some() {
                return;
            }
            let event = NotificationEvent {
                alert_id: Uuid::new_v4(),
                sensor_id: transition.sensor_id,
                alert_type: AlertType::SensorFault,
                severity: Severity::Critical,
                status: AlertStatus::Open,
                message: format!(
                    "Alert store unavailable after {} attempts ({error}); transitions queued for replay",
                    self.settings.retry.attempts
                ),
                timestamp: Utc::now(),
            };
            *health = Some(event.clone());
            event
        };

        tracing::error!(error = %error, "Alert store degraded, queueing transitions");
        deliver(self.sink.as_ref(), &event).await;
    }

    async fn leave_degraded(&self) {
        // ---
        let event = self
            .health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut event) = event else {
            return;
        };

        event.status = AlertStatus::Resolved;
        event.message = "Alert store recovered; queued transitions replayed".to_string();
        event.timestamp = Utc::now();
        tracing::info!("Alert store recovered");
        deliver(self.sink.as_ref(), &event).await;
    }
}
