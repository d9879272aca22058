//! Severity band policies.
//!
//! A breach is classified by its distance from the crossed bound, expressed
//! as a percentage of that bound. Each sensor type maps to a band table; the
//! first band whose ceiling covers the distance wins.
//!
//! Breach descriptions are worded per sensor type as well, so a leak reads
//! as a leak rather than as a number above a threshold.

use std::collections::HashMap;

use crate::models::{AlertType, Breach, Sensor, SensorType, Severity};

/// Bounds closer to zero than this fall back to the threshold span.
const ZERO_BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityBand {
    /// Inclusive ceiling on the distance percentage; `None` is unbounded.
    pub up_to_pct: Option<f64>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    bands: Vec<SeverityBand>,
}

impl BandTable {
    /// `Warning` within `warning_pct` of the bound, `Critical` beyond.
    pub fn banded(warning_pct: f64) -> Self {
        Self::from_bands(vec![
            SeverityBand {
                up_to_pct: Some(warning_pct),
                severity: Severity::Warning,
            },
            SeverityBand {
                up_to_pct: None,
                severity: Severity::Critical,
            },
        ])
    }

    /// Every breach gets the same severity.
    pub fn flat(severity: Severity) -> Self {
        Self::from_bands(vec![SeverityBand {
            up_to_pct: None,
            severity,
        }])
    }

    /// Bands are sorted by ceiling, unbounded last.
    pub fn from_bands(mut bands: Vec<SeverityBand>) -> Self {
        bands.sort_by(|a, b| match (a.up_to_pct, b.up_to_pct) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Self { bands }
    }

    pub fn classify(&self, distance_pct: f64) -> Severity {
        self.bands
            .iter()
            .find(|b| b.up_to_pct.map_or(true, |ceiling| distance_pct <= ceiling))
            .or(self.bands.last())
            .map(|b| b.severity)
            .unwrap_or(Severity::Warning)
    }
}

/// Lookup table from sensor type to band table.
#[derive(Debug, Clone)]
pub struct SeverityPolicy {
    default: BandTable,
    by_type: HashMap<SensorType, BandTable>,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self::with_warning_band(10.0)
    }
}

impl SeverityPolicy {
    /// Standard table: banded for analog sensors, flat for hazard and
    /// intrusion contacts, informational near-misses for ambient light and
    /// sound.
    pub fn with_warning_band(warning_pct: f64) -> Self {
        // ---
        let mut by_type = HashMap::new();
        for t in [SensorType::Smoke, SensorType::WaterLeak, SensorType::Gas] {
            by_type.insert(t, BandTable::flat(Severity::Critical));
        }
        for t in [SensorType::DoorContact, SensorType::Motion] {
            by_type.insert(t, BandTable::flat(Severity::Warning));
        }
        for t in [SensorType::Light, SensorType::Sound] {
            by_type.insert(
                t,
                BandTable::from_bands(vec![
                    SeverityBand {
                        up_to_pct: Some(warning_pct),
                        severity: Severity::Info,
                    },
                    SeverityBand {
                        up_to_pct: None,
                        severity: Severity::Warning,
                    },
                ]),
            );
        }

        Self {
            default: BandTable::banded(warning_pct),
            by_type,
        }
    }

    pub fn set_table(&mut self, sensor_type: SensorType, table: BandTable) {
        self.by_type.insert(sensor_type, table);
    }

    pub fn table_for(&self, sensor_type: SensorType) -> &BandTable {
        self.by_type.get(&sensor_type).unwrap_or(&self.default)
    }

    /// Severity for `value` having crossed `bound`. `span` is the width of
    /// the sensor's threshold range, used when the bound itself is zero.
    pub fn classify(
        &self,
        sensor_type: SensorType,
        value: f64,
        bound: f64,
        span: Option<f64>,
    ) -> Severity {
        self.table_for(sensor_type)
            .classify(distance_pct(value, bound, span))
    }
}

/// Distance of `value` from `bound` as a percentage of the bound.
pub fn distance_pct(value: f64, bound: f64, span: Option<f64>) -> f64 {
    // ---
    let scale = if bound.abs() > ZERO_BOUND_EPSILON {
        bound.abs()
    } else {
        span.filter(|s| *s > ZERO_BOUND_EPSILON).unwrap_or(1.0)
    };
    (value - bound).abs() / scale * 100.0
}

/// Operator-facing description of a breach.
pub fn describe_breach(sensor: &Sensor, value: f64, breach: Breach) -> String {
    // ---
    let high = breach.alert_type != AlertType::ThresholdLow;
    let level = if high { "High" } else { "Low" };
    let reading = format!("{value} {}", sensor.unit);

    let what = match sensor.sensor_type {
        SensorType::WaterLeak => "Water leak detected".to_string(),
        SensorType::Motion => "Unauthorized motion detected".to_string(),
        SensorType::DoorContact => "Door opened".to_string(),
        SensorType::Temperature => format!("{level} temperature: {reading}"),
        SensorType::Humidity => format!("{level} humidity: {reading}"),
        SensorType::AirQuality => format!("{level} CO2 level: {reading}"),
        SensorType::Smoke => format!("{level} smoke level: {reading}"),
        SensorType::Gas => format!("{level} gas level: {reading}"),
        SensorType::Sound => format!("{level} sound level: {reading}"),
        SensorType::Light => format!("{level} light level: {reading}"),
        SensorType::Vibration => format!("Abnormal vibration: {reading}"),
        SensorType::Power => format!("{level} power draw: {reading}"),
    };

    match sensor.sensor_type {
        SensorType::WaterLeak | SensorType::Motion | SensorType::DoorContact => {
            format!("{what} ({})", sensor.name)
        }
        _ => {
            let limit = if high { "max" } else { "min" };
            format!("{what} ({}, {limit} {} {})", sensor.name, breach.bound, sensor.unit)
        }
    }
}
