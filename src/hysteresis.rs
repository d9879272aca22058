//! Consecutive in-bound reading counters for breach alerts.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{AlertKey, AlertType};

/// Counts in-bound readings per key. A breach alert resolves once its
/// counter reaches `required`; any out-of-bound reading for the sensor
/// resets its counters.
#[derive(Debug)]
pub struct HysteresisTracker {
    required: u32,
    counters: Mutex<HashMap<AlertKey, u32>>,
}

impl HysteresisTracker {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    /// Count one in-bound reading for `key`. Returns `true` when the
    /// counter reaches the required run, and starts the key over.
    pub fn record_in_bound(&self, key: AlertKey) -> bool {
        // ---
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let count = counters.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.required {
            counters.remove(&key);
            true
        } else {
            false
        }
    }

    /// Out-of-bound reading: restart both breach counters of the sensor.
    pub fn record_breach(&self, sensor_id: i64) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        for alert_type in [AlertType::ThresholdHigh, AlertType::ThresholdLow] {
            counters.remove(&AlertKey::new(sensor_id, alert_type));
        }
    }

    pub fn clear(&self, key: AlertKey) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    pub fn count(&self, key: AlertKey) -> u32 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied()
            .unwrap_or(0)
    }
}
