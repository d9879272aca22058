//! Notification sinks.
//!
//! The engine pushes one [`NotificationEvent`] per persisted transition and
//! never waits on delivery outcome: a failed send is logged and dropped.
//! Built-in sinks write to the log, POST to a webhook, or fan out over a
//! broadcast channel for in-process consumers such as a dashboard panel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::NotifyError;
use crate::models::{NotificationEvent, Severity};
use crate::retry::{retry_with_backoff, RetryPolicy};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;

    /// Short name used in logs (e.g., `"webhook"`).
    fn sink_name(&self) -> &str;
}

/// Deliver to `sink`, logging instead of propagating failures.
pub async fn deliver(sink: &dyn NotificationSink, event: &NotificationEvent) {
    if let Err(e) = sink.notify(event).await {
        tracing::error!(
            sink = sink.sink_name(),
            alert_id = %event.alert_id,
            error = %e,
            "Failed to deliver notification"
        );
    }
}

/// Writes every event to the log at a level matching its severity.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        // ---
        match event.severity {
            Severity::Critical => tracing::error!(
                alert_id = %event.alert_id,
                sensor_id = event.sensor_id,
                alert_type = %event.alert_type,
                status = %event.status,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                alert_id = %event.alert_id,
                sensor_id = event.sensor_id,
                alert_type = %event.alert_type,
                status = %event.status,
                "{}",
                event.message
            ),
            Severity::Info => tracing::info!(
                alert_id = %event.alert_id,
                sensor_id = event.sensor_id,
                alert_type = %event.alert_type,
                status = %event.status,
                "{}",
                event.message
            ),
        }
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

/// POSTs each event as JSON to a fixed URL.
///
/// Delivery runs on a spawned task with up to three attempts so a slow
/// endpoint never holds an alert key lock.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        let retry = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        Self::with_retry(url, retry)
    }

    pub fn with_retry(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send with retries, returning the last failure.
    pub async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        retry_with_backoff(&self.retry, "webhook", || self.post(event), NotifyError::is_transient)
            .await
    }

    async fn post(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        // ---
        let resp = self.client.post(&self.url).json(event).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(NotifyError::Status { status, body })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let sink = self.clone();
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(&event).await {
                tracing::error!(
                    url = %sink.url,
                    alert_id = %event.alert_id,
                    error = %e,
                    "Webhook failed after retries"
                );
            }
        });
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}

/// Publishes events on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers)
    }

    fn sink_name(&self) -> &str {
        "broadcast"
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        for sink in &self.sinks {
            deliver(sink.as_ref(), event).await;
        }
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "fanout"
    }
}

/// Test sink that keeps every event it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: std::sync::Mutex<Vec<NotificationEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{AlertKey, AlertTransition, AlertType};
    use chrono::Utc;

    fn event() -> NotificationEvent {
        AlertTransition::opened(
            AlertKey::new(1, AlertType::ThresholdHigh),
            Severity::Warning,
            "Value 85.0 above 80.0".into(),
            Utc::now(),
        )
        .to_event()
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        // ---
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let fanout = FanoutSink::new(vec![
            a.clone() as Arc<dyn NotificationSink>,
            Arc::new(TracingSink),
            b.clone(),
        ]);

        deliver(&fanout, &event()).await;

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
        assert_eq!(fanout.len(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_fails_softly() {
        // ---
        let sink = BroadcastSink::new(8);
        assert!(matches!(sink.notify(&event()).await, Err(NotifyError::NoSubscribers)));

        let mut rx = sink.subscribe();
        let e = event();
        sink.notify(&e).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), e);

        // A failing sink inside a fan-out does not stop the others
        let tail = Arc::new(RecordingSink::default());
        let fanout = FanoutSink::new(vec![
            Arc::new(BroadcastSink::new(1)) as Arc<dyn NotificationSink>,
            tail.clone(),
        ]);
        fanout.notify(&e).await.unwrap();
        assert_eq!(tail.events().len(), 1);
    }

    /// Local endpoint answering `status` for the first `failures` posts,
    /// then 200.
    async fn webhook_endpoint(
        failures: u32,
        status: axum::http::StatusCode,
    ) -> (String, Arc<std::sync::atomic::AtomicU32>) {
        // ---
        use std::sync::atomic::{AtomicU32, Ordering};

        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/hook",
            axum::routing::post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        status
                    } else {
                        axum::http::StatusCode::OK
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}/hook"), hits)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_webhook_retries_server_errors() {
        // ---
        let (url, hits) = webhook_endpoint(2, axum::http::StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = WebhookSink::with_retry(url, fast_retry());

        assert!(sink.send(&event()).await.is_ok());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_webhook_client_error_is_not_retried() {
        // ---
        let (url, hits) = webhook_endpoint(5, axum::http::StatusCode::BAD_REQUEST).await;
        let sink = WebhookSink::with_retry(url, fast_retry());

        let err = sink.send(&event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 400, .. }));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
