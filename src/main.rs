//! Application entry point for the `roomwatch` alert service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema and seeding the default sensor catalog
//! - Wiring registry, store, notification sinks, engine, pipeline and ingress
//! - Starting the staleness/replay maintenance loop (and the simulator, if enabled)
//! - Mounting all API routes via the `routes` gateway and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `ROOMWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `ROOMWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see [`roomwatch::config::load_from_env`] for the engine tunables
//!
//! On Ctrl-C the server stops accepting requests, every sensor queue is
//! drained, pending transitions are replayed and the pool is closed.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use roomwatch::activity::SensorActivity;
use roomwatch::notify::{FanoutSink, NotificationSink, TracingSink, WebhookSink};
use roomwatch::registry::{CachedRegistry, PgSensorRegistry, SensorRegistry};
use roomwatch::routes::{self, AppState};
use roomwatch::severity::SeverityPolicy;
use roomwatch::simulator::Simulator;
use roomwatch::store::{AlertStore, PgAlertStore};
use roomwatch::{config, schema, seed};
use roomwatch::{AlertEngine, EvaluationPipeline, MeasurementIngress};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let masked_url = config::mask_db_url(&cfg.db_url);
    tracing::info!("Attempting to connect to database: {}", masked_url);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database '{}': {}", masked_url, e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    if cfg.seed_default_sensors {
        seed::seed_default_sensors(&pool).await?;
    }

    // Seams
    let registry: Arc<dyn SensorRegistry> = Arc::new(CachedRegistry::new(
        PgSensorRegistry::new(pool.clone()),
        cfg.registry_cache_ttl(),
        cfg.staleness_window(),
    ));
    let store: Arc<dyn AlertStore> = Arc::new(PgAlertStore::new(pool.clone()));

    let mut sinks = FanoutSink::default();
    sinks.push(Arc::new(TracingSink));
    if let Some(url) = &cfg.notify_webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }
    tracing::info!(sinks = sinks.len(), "Notification sinks configured");
    let sink: Arc<dyn NotificationSink> = Arc::new(sinks);

    // Engine, pipeline, ingress
    let activity = Arc::new(SensorActivity::new());
    let engine = Arc::new(AlertEngine::new(
        registry.clone(),
        store.clone(),
        sink,
        activity.clone(),
        SeverityPolicy::with_warning_band(cfg.warning_band_pct),
        cfg.engine_settings(),
    ));
    let pipeline = Arc::new(EvaluationPipeline::new(
        engine.clone(),
        store.clone(),
        cfg.queue_capacity,
        cfg.retry_policy(),
    ));
    let ingress = Arc::new(MeasurementIngress::new(
        registry.clone(),
        activity,
        pipeline.clone(),
        cfg.skew_tolerance(),
    ));

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(
        engine
            .clone()
            .run_maintenance(cfg.staleness_check_period(), shutdown_rx.clone()),
    );
    let simulator = if cfg.simulator {
        let sensors = registry.list_sensors().await?;
        let sim = Simulator::new(ingress.clone(), sensors, cfg.simulator_period());
        Some(tokio::spawn(sim.run(shutdown_rx.clone())))
    } else {
        None
    };

    // Build app from routes gateway
    let app: Router = routes::router(AppState {
        ingress,
        engine,
        pipeline: pipeline.clone(),
        store,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    shutdown_tx.send(true).ok();
    if let Some(handle) = simulator {
        handle.await.ok();
    }
    maintenance.await.ok();
    pipeline.shutdown().await;
    pool.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `ROOMWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, or else the `ROOMWATCH_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("ROOMWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to ROOMWATCH_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("ROOMWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
