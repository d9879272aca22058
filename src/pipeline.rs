//! Per-sensor evaluation workers.
//!
//! Each sensor gets a bounded queue and one worker task, so a sensor's
//! readings are archived and evaluated in arrival order while different
//! sensors run in parallel. Enqueueing never blocks: when a queue is full
//! the oldest unevaluated reading is dropped and counted as a gap.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::AlertEngine;
use crate::error::{StoreError, ValidationError};
use crate::models::Measurement;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::AlertStore;

// ---

/// Bounded drop-oldest queue for one sensor.
#[derive(Debug)]
struct SensorQueue {
    capacity: usize,
    items: Mutex<VecDeque<Measurement>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SensorQueue {
    // ---
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<Measurement>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push a reading, dropping the oldest when full. Returns the dropped
    /// reading, if any.
    fn push(&self, measurement: Measurement) -> Option<Measurement> {
        // ---
        let dropped = {
            let mut items = self.items();
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(measurement);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Measurement> {
        self.items().pop_front()
    }

    fn len(&self) -> usize {
        self.items().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    gaps: AtomicU64,
    archived: AtomicU64,
    archive_failures: AtomicU64,
    evaluated: AtomicU64,
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub gaps: u64,
    pub archived: u64,
    pub archive_failures: u64,
    pub evaluated: u64,
    pub workers: usize,
    pub queued: usize,
}

/// What happened to an enqueued reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Enqueued {
    /// An older reading was dropped to make room.
    pub dropped_oldest: bool,
}

struct Worker {
    queue: Arc<SensorQueue>,
    handle: JoinHandle<()>,
}

pub struct EvaluationPipeline {
    engine: Arc<AlertEngine>,
    store: Arc<dyn AlertStore>,
    capacity: usize,
    retry: RetryPolicy,
    workers: Mutex<HashMap<i64, Worker>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl EvaluationPipeline {
    // ---
    pub fn new(
        engine: Arc<AlertEngine>,
        store: Arc<dyn AlertStore>,
        capacity: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            store,
            capacity,
            retry,
            workers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Worker>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a validated reading for its sensor's worker, spawning the
    /// worker on first use. Must be called inside a tokio runtime.
    pub fn enqueue(&self, measurement: Measurement) -> Result<Enqueued, ValidationError> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(ValidationError::ShuttingDown);
        }

        let sensor_id = measurement.sensor_id;
        let queue = {
            let mut workers = self.workers();
            let worker = workers.entry(sensor_id).or_insert_with(|| self.spawn_worker(sensor_id));
            worker.queue.clone()
        };

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        let dropped = queue.push(measurement);
        if let Some(dropped) = &dropped {
            self.counters.gaps.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                sensor_id,
                dropped_timestamp = %dropped.timestamp,
                capacity = self.capacity,
                "Sensor queue full, dropped oldest reading"
            );
        }

        Ok(Enqueued {
            dropped_oldest: dropped.is_some(),
        })
    }

    fn spawn_worker(&self, sensor_id: i64) -> Worker {
        // ---
        let queue = Arc::new(SensorQueue::new(self.capacity));
        let handle = tokio::spawn(run_worker(
            sensor_id,
            queue.clone(),
            self.engine.clone(),
            self.store.clone(),
            self.retry,
            self.counters.clone(),
        ));
        tracing::debug!(sensor_id, "Started evaluation worker");
        Worker { queue, handle }
    }

    /// Stop accepting, drain every queue, then replay pending transitions.
    pub async fn shutdown(&self) {
        // ---
        self.closed.store(true, Ordering::SeqCst);

        let workers: Vec<(i64, Worker)> = self.workers().drain().collect();
        for (_, worker) in &workers {
            worker.queue.close();
        }

        let count = workers.len();
        for (sensor_id, worker) in workers {
            if let Err(e) = worker.handle.await {
                tracing::error!(sensor_id, error = %e, "Evaluation worker panicked");
            }
        }

        let replayed = self.engine.flush_pending().await;
        let stats = self.engine.stats();
        if stats.replay_pending > 0 || stats.deferred_pending > 0 {
            tracing::warn!(
                pending = stats.replay_pending,
                deferred = stats.deferred_pending,
                "Alert transitions still pending at shutdown"
            );
        }
        tracing::info!(workers = count, replayed, "Evaluation pipeline drained");
    }

    pub fn stats(&self) -> PipelineStats {
        // ---
        let workers = self.workers();
        let c = &self.counters;
        PipelineStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            gaps: c.gaps.load(Ordering::Relaxed),
            archived: c.archived.load(Ordering::Relaxed),
            archive_failures: c.archive_failures.load(Ordering::Relaxed),
            evaluated: c.evaluated.load(Ordering::Relaxed),
            workers: workers.len(),
            queued: workers.values().map(|w| w.queue.len()).sum(),
        }
    }
}

async fn run_worker(
    sensor_id: i64,
    queue: Arc<SensorQueue>,
    engine: Arc<AlertEngine>,
    store: Arc<dyn AlertStore>,
    retry: RetryPolicy,
    counters: Arc<Counters>,
) {
    // ---
    loop {
        let Some(measurement) = queue.pop() else {
            if queue.is_closed() {
                break;
            }
            queue.notify.notified().await;
            continue;
        };

        let archived = retry_with_backoff(
            &retry,
            "archive_measurement",
            || store.archive_measurement(&measurement),
            StoreError::is_transient,
        )
        .await;
        match archived {
            Ok(()) => {
                counters.archived.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.archive_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(sensor_id, error = %e, "Failed to archive measurement");
            }
        }

        if let Err(e) = engine.evaluate(&measurement).await {
            tracing::debug!(sensor_id, error = %e, "Measurement not evaluated");
        }
        counters.evaluated.fetch_add(1, Ordering::Relaxed);
    }
    tracing::debug!(sensor_id, "Evaluation worker stopped");
}
