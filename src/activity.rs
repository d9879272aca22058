//! Last accepted reading per sensor.
//!
//! Shared by ingress (out-of-order rejection, on the source clock) and the
//! engine (staleness, on the server clock). The two clocks are kept apart so
//! a sensor whose clock lags is never mistaken for a silent one.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
struct LastSeen {
    /// Newest source timestamp accepted.
    source: DateTime<Utc>,
    /// Server time the latest reading was accepted.
    received: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SensorActivity {
    started_at: DateTime<Utc>,
    seen: RwLock<HashMap<i64, LastSeen>>,
}

impl Default for SensorActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorActivity {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Sensors that never report are measured from `started_at`.
    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            seen: RwLock::new(HashMap::new()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn get(&self, sensor_id: i64) -> Option<LastSeen> {
        self.seen
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&sensor_id)
            .copied()
    }

    /// Newest source timestamp accepted for the sensor.
    pub fn last_accepted(&self, sensor_id: i64) -> Option<DateTime<Utc>> {
        self.get(sensor_id).map(|s| s.source)
    }

    /// Server time of the latest accepted reading.
    pub fn last_received(&self, sensor_id: i64) -> Option<DateTime<Utc>> {
        self.get(sensor_id).map(|s| s.received)
    }

    /// Server receipt time of the latest reading, or the tracker start for
    /// silent sensors.
    pub fn last_seen_or_start(&self, sensor_id: i64) -> DateTime<Utc> {
        self.last_received(sensor_id).unwrap_or(self.started_at)
    }

    /// Record an accepted reading. The source timestamp only moves forward,
    /// so readings admitted inside the skew tolerance never rewind it.
    pub fn record(&self, sensor_id: i64, source: DateTime<Utc>, received: DateTime<Utc>) {
        // ---
        let mut map = self.seen.write().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(sensor_id).or_insert(LastSeen { source, received });
        entry.source = entry.source.max(source);
        entry.received = entry.received.max(received);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_record_keeps_newest() {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap();
        let activity = SensorActivity::starting_at(start);

        assert_eq!(activity.last_accepted(1), None);
        assert_eq!(activity.last_seen_or_start(1), start);

        let t1 = start + Duration::seconds(10);
        activity.record(1, t1, t1);
        activity.record(1, t1 - Duration::seconds(2), t1 + Duration::seconds(1));
        assert_eq!(activity.last_accepted(1), Some(t1));
        assert_eq!(activity.last_received(1), Some(t1 + Duration::seconds(1)));

        let t2 = t1 + Duration::seconds(5);
        activity.record(1, t2, t2);
        assert_eq!(activity.last_seen_or_start(1), t2);
        assert_eq!(activity.last_accepted(2), None);
    }

    #[test]
    fn test_lagging_source_clock_does_not_age_receipt() {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap();
        let activity = SensorActivity::starting_at(start);

        let received = start + Duration::minutes(30);
        let source = received - Duration::minutes(10);
        activity.record(4, source, received);

        assert_eq!(activity.last_accepted(4), Some(source));
        assert_eq!(activity.last_seen_or_start(4), received);
    }
}
