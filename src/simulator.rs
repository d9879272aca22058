//! Simulated acquisition source.
//!
//! Drives every registered sensor with a bounded random walk shaped by its
//! type and submits the readings through ingress, like a real collector.
//! Each type samples at its own interval; the simulator period is only the
//! scheduling resolution.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::ingress::MeasurementIngress;
use crate::models::{Measurement, Sensor, SensorType};

// ---

/// Walk shape for one sensor type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorProfile {
    /// Range the first value is drawn from.
    pub initial: (f64, f64),
    /// Largest change between two readings.
    pub step: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub decimals: i32,
    /// For binary sensors: chance a reading flips to 1.
    pub trigger_probability: Option<f64>,
    /// Time between two readings.
    pub interval: Duration,
}

impl SensorProfile {
    const fn walk(initial: (f64, f64), step: f64, floor: f64, ceiling: f64, decimals: i32) -> Self {
        Self {
            initial,
            step,
            floor,
            ceiling,
            decimals,
            trigger_probability: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    const fn binary(trigger_probability: f64) -> Self {
        Self {
            initial: (0.0, 0.0),
            step: 0.0,
            floor: 0.0,
            ceiling: 1.0,
            decimals: 0,
            trigger_probability: Some(trigger_probability),
            interval: DEFAULT_INTERVAL,
        }
    }

    const fn every_ms(mut self, millis: u64) -> Self {
        self.interval = Duration::from_millis(millis);
        self
    }
}

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

pub fn profile_for(sensor_type: SensorType) -> SensorProfile {
    // ---
    match sensor_type {
        SensorType::Temperature => SensorProfile::walk((20.0, 25.0), 0.5, 15.0, 35.0, 1),
        SensorType::Humidity => SensorProfile::walk((40.0, 60.0), 2.0, 20.0, 80.0, 1),
        SensorType::AirQuality => SensorProfile::walk((400.0, 800.0), 50.0, 400.0, 1500.0, 2),
        SensorType::Smoke => SensorProfile::walk((0.0, 10.0), 5.0, 0.0, 100.0, 2),
        SensorType::Gas => SensorProfile::walk((0.0, 20.0), 10.0, 0.0, 200.0, 2),
        SensorType::Sound => SensorProfile::walk((30.0, 50.0), 5.0, 20.0, 80.0, 1).every_ms(100),
        SensorType::Vibration => SensorProfile::walk((0.1, 0.2), 0.05, 0.0, 1.0, 4).every_ms(20),
        SensorType::Light => SensorProfile::walk((300.0, 400.0), 20.0, 100.0, 1000.0, 2),
        SensorType::Power => SensorProfile::walk((2.0, 4.0), 0.25, 0.0, 10.0, 2),
        SensorType::Motion => SensorProfile::binary(0.02).every_ms(200),
        SensorType::DoorContact => SensorProfile::binary(0.01).every_ms(200),
        SensorType::WaterLeak => SensorProfile::binary(0.002),
    }
}

/// Current position of one sensor's walk.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    profile: SensorProfile,
    value: f64,
}

impl RandomWalk {
    pub fn new(profile: SensorProfile, rng: &mut impl Rng) -> Self {
        let (low, high) = profile.initial;
        let value = if high > low { rng.gen_range(low..=high) } else { low };
        Self { profile, value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn next_value(&mut self, rng: &mut impl Rng) -> f64 {
        // ---
        let p = &self.profile;
        let raw = match p.trigger_probability {
            Some(chance) => f64::from(u8::from(rng.gen_bool(chance))),
            None => self.value + rng.gen_range(-p.step..=p.step),
        };
        let scale = 10f64.powi(p.decimals);
        self.value = (raw.clamp(p.floor, p.ceiling) * scale).round() / scale;
        self.value
    }
}

/// Scheduler ticks between two readings of a sensor sampled every
/// `interval`, never fewer than one.
pub fn ticks_per_sample(interval: Duration, period: Duration) -> u32 {
    // ---
    if period.is_zero() {
        return 1;
    }
    let ticks = interval.as_nanos().div_ceil(period.as_nanos());
    u32::try_from(ticks).unwrap_or(u32::MAX).max(1)
}

struct SimulatedSensor {
    sensor: Sensor,
    walk: RandomWalk,
    every: u32,
    /// Ticks left until the next reading; due at zero.
    countdown: u32,
}

pub struct Simulator {
    ingress: Arc<MeasurementIngress>,
    walks: Vec<SimulatedSensor>,
    period: Duration,
    rng: StdRng,
}

impl Simulator {
    // ---
    pub fn new(ingress: Arc<MeasurementIngress>, sensors: Vec<Sensor>, period: Duration) -> Self {
        Self::with_rng(ingress, sensors, period, StdRng::from_entropy())
    }

    pub fn with_rng(
        ingress: Arc<MeasurementIngress>,
        sensors: Vec<Sensor>,
        period: Duration,
        mut rng: StdRng,
    ) -> Self {
        let walks = sensors
            .into_iter()
            .map(|sensor| {
                let profile = profile_for(sensor.sensor_type);
                SimulatedSensor {
                    walk: RandomWalk::new(profile, &mut rng),
                    every: ticks_per_sample(profile.interval, period),
                    countdown: 0,
                    sensor,
                }
            })
            .collect();
        Self {
            ingress,
            walks,
            period,
            rng,
        }
    }

    /// Advance one period: every sensor that is due produces a reading and
    /// submits it. Returns how many were accepted.
    pub async fn tick(&mut self) -> usize {
        // ---
        let mut accepted = 0;
        for sim in &mut self.walks {
            if sim.countdown > 0 {
                sim.countdown -= 1;
                continue;
            }
            sim.countdown = sim.every - 1;

            let sensor = &sim.sensor;
            let value = sim.walk.next_value(&mut self.rng);
            // Occasional degraded reading exercises the quality gate
            let quality_score = if self.rng.gen_bool(0.02) {
                self.rng.gen_range(0.1..0.5)
            } else {
                self.rng.gen_range(0.85..=1.0)
            };
            let measurement = Measurement {
                sensor_id: sensor.id,
                value,
                unit: sensor.unit.clone(),
                quality_score,
                timestamp: Utc::now(),
            };
            match self.ingress.submit(measurement).await {
                Ok(_) => accepted += 1,
                Err(e) => {
                    tracing::debug!(sensor_id = sensor.id, error = %e, "Simulated reading rejected")
                }
            }
        }
        accepted
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        // ---
        tracing::info!(
            sensors = self.walks.len(),
            period_ms = self.period.as_millis() as u64,
            "Simulator started"
        );
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Simulator stopped");
    }
}
