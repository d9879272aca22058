//! `roomwatch`: alert evaluation and lifecycle engine for server-room
//! environmental sensors.
//!
//! Measurements enter through [`ingress::MeasurementIngress`], are queued per
//! sensor by [`pipeline::EvaluationPipeline`], archived, and evaluated by
//! [`engine::AlertEngine`] against the thresholds in a
//! [`registry::SensorRegistry`]. Resulting alert transitions are persisted to
//! an [`store::AlertStore`] and pushed to a [`notify::NotificationSink`].

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod hysteresis;
pub mod ingress;
pub mod keylock;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod schema;
pub mod seed;
pub mod severity;
pub mod simulator;
pub mod store;

pub use config::Config;
pub use engine::{AlertEngine, EngineSettings, EngineStats};
pub use error::{EngineError, LookupError, NotifyError, StoreError, ValidationError};
pub use ingress::MeasurementIngress;
pub use models::{
    Alert, AlertKey, AlertStatus, AlertTransition, AlertType, Measurement, NotificationEvent,
    Sensor, SensorStatus, SensorType, Severity,
};
pub use pipeline::EvaluationPipeline;
