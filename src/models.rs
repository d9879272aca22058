//! Data models for sensors, measurements, alerts and their transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SensorConfigError;

// ---

/// Kinds of sensor installed in the server room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    DoorContact,
    Power,
    Smoke,
    Vibration,
    AirQuality,
    Gas,
    Motion,
    Sound,
    WaterLeak,
    Light,
}

impl SensorType {
    pub const ALL: [SensorType; 12] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::DoorContact,
        SensorType::Power,
        SensorType::Smoke,
        SensorType::Vibration,
        SensorType::AirQuality,
        SensorType::Gas,
        SensorType::Motion,
        SensorType::Sound,
        SensorType::WaterLeak,
        SensorType::Light,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::DoorContact => "door_contact",
            SensorType::Power => "power",
            SensorType::Smoke => "smoke",
            SensorType::Vibration => "vibration",
            SensorType::AirQuality => "air_quality",
            SensorType::Gas => "gas",
            SensorType::Motion => "motion",
            SensorType::Sound => "sound",
            SensorType::WaterLeak => "water_leak",
            SensorType::Light => "light",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        SensorType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown sensor type: {s}"))
    }
}

/// Operational state of a sensor as maintained by provisioning and maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Active,
    Maintenance,
    Faulted,
    Offline,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Active => "active",
            SensorStatus::Maintenance => "maintenance",
            SensorStatus::Faulted => "faulted",
            SensorStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SensorStatus::Active),
            "maintenance" => Ok(SensorStatus::Maintenance),
            "faulted" => Ok(SensorStatus::Faulted),
            "offline" => Ok(SensorStatus::Offline),
            _ => Err(format!("unknown sensor status: {s}")),
        }
    }
}

/// Per-sensor configuration read by the engine on every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    // ---
    pub id: i64,
    pub name: String,
    pub sensor_type: SensorType,
    pub location: String,
    /// Unit every measurement for this sensor must carry.
    pub unit: String,
    pub threshold_min: Option<f64>,
    pub threshold_max: Option<f64>,
    pub status: SensorStatus,
    pub calibration_date: Option<NaiveDate>,
    pub last_maintenance: Option<NaiveDate>,
}

/// The bound a reading crossed and the alert kind that crossing maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub alert_type: AlertType,
    pub bound: f64,
}

impl Sensor {
    // ---
    /// Check the `threshold_min <= threshold_max` invariant.
    pub fn validate(&self) -> Result<(), SensorConfigError> {
        // ---
        if let (Some(min), Some(max)) = (self.threshold_min, self.threshold_max) {
            if min > max {
                return Err(SensorConfigError::InvalidThresholds {
                    sensor_id: self.id,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> (Option<f64>, Option<f64>) {
        (self.threshold_min, self.threshold_max)
    }

    /// Width of the configured band, when both bounds are set.
    pub fn span(&self) -> Option<f64> {
        match (self.threshold_min, self.threshold_max) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }

    /// Returns the breached bound for `value`, if any. Values equal to a
    /// bound are in range.
    pub fn breach(&self, value: f64) -> Option<Breach> {
        // ---
        if let Some(max) = self.threshold_max {
            if value > max {
                return Some(Breach {
                    alert_type: AlertType::ThresholdHigh,
                    bound: max,
                });
            }
        }
        if let Some(min) = self.threshold_min {
            if value < min {
                return Some(Breach {
                    alert_type: AlertType::ThresholdLow,
                    bound: min,
                });
            }
        }
        None
    }
}

/// A single timestamped reading as produced by an acquisition source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    // ---
    pub sensor_id: i64,
    pub value: f64,
    pub unit: String,
    /// Confidence of the reading, 0.0 to 1.0.
    pub quality_score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdHigh,
    ThresholdLow,
    SensorFault,
    StaleData,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ThresholdHigh => "threshold_high",
            AlertType::ThresholdLow => "threshold_low",
            AlertType::SensorFault => "sensor_fault",
            AlertType::StaleData => "stale_data",
        }
    }

    /// Stable small integer used to derive per-key database locks.
    pub fn ordinal(&self) -> i64 {
        match self {
            AlertType::ThresholdHigh => 0,
            AlertType::ThresholdLow => 1,
            AlertType::SensorFault => 2,
            AlertType::StaleData => 3,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "threshold_high" => Ok(AlertType::ThresholdHigh),
            "threshold_low" => Ok(AlertType::ThresholdLow),
            "sensor_fault" => Ok(AlertType::SensorFault),
            "stale_data" => Ok(AlertType::StaleData),
            _ => Err(format!("unknown alert type: {s}")),
        }
    }
}

/// Alert severity, ordered `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// De-duplication key: at most one unresolved alert per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AlertKey {
    pub sensor_id: i64,
    pub alert_type: AlertType,
}

impl AlertKey {
    pub fn new(sensor_id: i64, alert_type: AlertType) -> Self {
        Self {
            sensor_id,
            alert_type,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sensor_id, self.alert_type)
    }
}

/// Persisted alert record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: Uuid,
    pub sensor_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    // ---
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.sensor_id, self.alert_type)
    }

    /// Open and acknowledged alerts both hold their key.
    pub fn is_active(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    /// Build the record created by an `Opened` transition.
    pub fn from_opened(transition: &AlertTransition) -> Self {
        Self {
            id: transition.alert_id,
            sensor_id: transition.sensor_id,
            alert_type: transition.alert_type,
            severity: transition.severity,
            message: transition.message.clone(),
            status: AlertStatus::Open,
            created_at: transition.at,
            resolved_at: None,
        }
    }

    /// Apply a follow-up transition in place. Identity fields and
    /// `created_at` are never touched.
    pub fn apply(&mut self, transition: &AlertTransition) {
        // ---
        match transition.kind {
            TransitionKind::Opened => {}
            TransitionKind::Escalated => {
                self.severity = transition.severity;
                self.message = transition.message.clone();
                self.status = AlertStatus::Open;
            }
            TransitionKind::Acknowledged => {
                self.status = AlertStatus::Acknowledged;
            }
            TransitionKind::Resolved => {
                self.status = AlertStatus::Resolved;
                self.resolved_at = Some(transition.at);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Opened,
    Escalated,
    Acknowledged,
    Resolved,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Opened => "opened",
            TransitionKind::Escalated => "escalated",
            TransitionKind::Acknowledged => "acknowledged",
            TransitionKind::Resolved => "resolved",
        }
    }

    /// Alert status after this transition lands. Escalation reopens an
    /// acknowledged alert.
    pub fn resulting_status(&self) -> AlertStatus {
        match self {
            TransitionKind::Opened | TransitionKind::Escalated => AlertStatus::Open,
            TransitionKind::Acknowledged => AlertStatus::Acknowledged,
            TransitionKind::Resolved => AlertStatus::Resolved,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opened" => Ok(TransitionKind::Opened),
            "escalated" => Ok(TransitionKind::Escalated),
            "acknowledged" => Ok(TransitionKind::Acknowledged),
            "resolved" => Ok(TransitionKind::Resolved),
            _ => Err(format!("unknown transition kind: {s}")),
        }
    }
}

/// One atomic change to an alert. `transition_id` is minted once and reused
/// across retries so the store can apply it idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    // ---
    pub transition_id: Uuid,
    pub alert_id: Uuid,
    pub sensor_id: i64,
    pub alert_type: AlertType,
    pub kind: TransitionKind,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AlertTransition {
    // ---
    pub fn opened(key: AlertKey, severity: Severity, message: String, at: DateTime<Utc>) -> Self {
        Self {
            transition_id: Uuid::new_v4(),
            alert_id: Uuid::new_v4(),
            sensor_id: key.sensor_id,
            alert_type: key.alert_type,
            kind: TransitionKind::Opened,
            severity,
            message,
            at,
        }
    }

    pub fn escalated(
        alert: &Alert,
        severity: Severity,
        message: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self::follow_up(alert, TransitionKind::Escalated, severity, message, at)
    }

    pub fn acknowledged(alert: &Alert, at: DateTime<Utc>) -> Self {
        Self::follow_up(
            alert,
            TransitionKind::Acknowledged,
            alert.severity,
            alert.message.clone(),
            at,
        )
    }

    pub fn resolved(alert: &Alert, message: String, at: DateTime<Utc>) -> Self {
        Self::follow_up(alert, TransitionKind::Resolved, alert.severity, message, at)
    }

    fn follow_up(
        alert: &Alert,
        kind: TransitionKind,
        severity: Severity,
        message: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            transition_id: Uuid::new_v4(),
            alert_id: alert.id,
            sensor_id: alert.sensor_id,
            alert_type: alert.alert_type,
            kind,
            severity,
            message,
            at,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.sensor_id, self.alert_type)
    }

    pub fn to_event(&self) -> NotificationEvent {
        NotificationEvent {
            alert_id: self.alert_id,
            sensor_id: self.sensor_id,
            alert_type: self.alert_type,
            severity: self.severity,
            status: self.kind.resulting_status(),
            message: self.message.clone(),
            timestamp: self.at,
        }
    }
}

/// Event pushed to notification sinks, once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub alert_id: Uuid,
    pub sensor_id: i64,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_sensor(min: Option<f64>, max: Option<f64>) -> Sensor {
        // ---
        Sensor {
            id: 1,
            name: "Rack A inlet".to_string(),
            sensor_type: SensorType::Temperature,
            location: "Row 1".to_string(),
            unit: "°C".to_string(),
            threshold_min: min,
            threshold_max: max,
            status: SensorStatus::Active,
            calibration_date: None,
            last_maintenance: None,
        }
    }

    #[test]
    fn test_breach_detection() {
        // ---
        let sensor = create_test_sensor(Some(10.0), Some(80.0));

        assert_eq!(sensor.breach(50.0), None);
        assert_eq!(sensor.breach(80.0), None);
        assert_eq!(sensor.breach(10.0), None);

        let high = sensor.breach(85.0).unwrap();
        assert_eq!(high.alert_type, AlertType::ThresholdHigh);
        assert_eq!(high.bound, 80.0);

        let low = sensor.breach(5.0).unwrap();
        assert_eq!(low.alert_type, AlertType::ThresholdLow);
        assert_eq!(low.bound, 10.0);
    }

    #[test]
    fn test_breach_with_one_sided_thresholds() {
        // ---
        let sensor = create_test_sensor(None, Some(50.0));
        assert_eq!(sensor.breach(-1000.0), None);
        assert!(sensor.breach(51.0).is_some());
        assert_eq!(sensor.span(), None);
    }

    #[test]
    fn test_threshold_invariant() {
        // ---
        assert!(create_test_sensor(Some(10.0), Some(80.0)).validate().is_ok());
        assert!(create_test_sensor(Some(80.0), Some(80.0)).validate().is_ok());
        assert!(create_test_sensor(None, Some(80.0)).validate().is_ok());
        assert!(create_test_sensor(Some(90.0), Some(80.0)).validate().is_err());
    }

    #[test]
    fn test_enum_string_forms() {
        // ---
        for t in SensorType::ALL {
            assert_eq!(t.as_str().parse::<SensorType>().unwrap(), t);
        }
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(AlertType::StaleData.to_string(), "stale_data");
        assert!("bogus".parse::<AlertStatus>().is_err());
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_apply_preserves_identity() {
        // ---
        let created = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 3, 26, 19, 0, 0).unwrap();
        let key = AlertKey::new(1, AlertType::ThresholdHigh);

        let opened = AlertTransition::opened(key, Severity::Warning, "hot".into(), created);
        let mut alert = Alert::from_opened(&opened);
        assert_eq!(alert.status, AlertStatus::Open);

        let ack = AlertTransition::acknowledged(&alert, later);
        alert.apply(&ack);
        assert_eq!(alert.status, AlertStatus::Acknowledged);

        let esc = AlertTransition::escalated(&alert, Severity::Critical, "hotter".into(), later);
        alert.apply(&esc);
        assert_eq!(alert.status, AlertStatus::Open);
        assert_eq!(alert.severity, Severity::Critical);

        let resolved = AlertTransition::resolved(&alert, "cool".into(), later);
        alert.apply(&resolved);
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.resolved_at, Some(later));
        assert_eq!(alert.created_at, created);
        assert_eq!(alert.key(), key);
        assert_eq!(alert.id, opened.alert_id);
    }

    #[test]
    fn test_event_serializes_type_field() {
        // ---
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let t = AlertTransition::opened(
            AlertKey::new(7, AlertType::ThresholdLow),
            Severity::Info,
            "cold".into(),
            at,
        );
        let json = serde_json::to_value(t.to_event()).unwrap();
        assert_eq!(json["type"], "threshold_low");
        assert_eq!(json["status"], "open");
        assert_eq!(json["sensor_id"], 7);
    }
}
