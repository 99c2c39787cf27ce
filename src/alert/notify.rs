//! Alert notification fan-out.
//!
//! Notifiers receive alert lifecycle events. Critical alerts are delivered
//! inline by the engine; everything else flows through a bounded queue
//! drained by a background task, so a slow webhook never stalls a send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{Alert, Severity};
use crate::bootstrap::Shutdown;
use crate::telemetry::counters;

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(String),
}

/// An alert lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum AlertEvent {
    Opened { alert: Alert },
    Resolved { alert: Alert },
}

impl AlertEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Opened { alert } | AlertEvent::Resolved { alert } => alert,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertEvent::Opened { .. } => "opened",
            AlertEvent::Resolved { .. } => "resolved",
        }
    }
}

/// Sink for alert events.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Notifier name for logging.
    fn name(&self) -> &str;

    /// Deliver one event.
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the log at a level matching severity.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let alert = event.alert();
        match event {
            AlertEvent::Opened { .. } => match alert.severity {
                Severity::Critical => error!(
                    alert = %alert.id,
                    error_kind = alert.error_kind.name(),
                    channel = alert.channel.name(),
                    occurrences = alert.occurrence_count,
                    message = %alert.message,
                    "critical alert opened"
                ),
                Severity::High => warn!(
                    alert = %alert.id,
                    error_kind = alert.error_kind.name(),
                    channel = alert.channel.name(),
                    occurrences = alert.occurrence_count,
                    message = %alert.message,
                    "alert opened"
                ),
                Severity::Medium | Severity::Low => info!(
                    alert = %alert.id,
                    error_kind = alert.error_kind.name(),
                    channel = alert.channel.name(),
                    occurrences = alert.occurrence_count,
                    "alert opened"
                ),
            },
            AlertEvent::Resolved { .. } => info!(
                alert = %alert.id,
                error_kind = alert.error_kind.name(),
                channel = alert.channel.name(),
                resolved_by = alert.resolved_by.as_deref().unwrap_or("-"),
                "alert resolved"
            ),
        }
        Ok(())
    }
}

/// Notifier that POSTs alert events to an HTTP endpoint as JSON.
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
    retry_count: u32,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebhookNotifier {
    /// Create a webhook notifier.
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            client,
            timeout,
            retry_count: 2,
        })
    }

    /// Override the retry budget.
    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let mut last_error = None;

        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!(url = %self.url, attempt, "retrying alert webhook");
            }

            match self.client.post(&self.url).json(event).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(());
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(url = %self.url, status = %response.status(), "alert webhook rate limited");
                        last_error = Some(NotifyError::Status(response.status().as_u16()));
                        continue;
                    } else if response.status().is_server_error() {
                        last_error = Some(NotifyError::Status(response.status().as_u16()));
                        continue;
                    } else {
                        return Err(NotifyError::Status(response.status().as_u16()));
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(NotifyError::Timeout(self.timeout));
                    } else {
                        last_error = Some(NotifyError::Transport(e.to_string()));
                    }
                    continue;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NotifyError::Transport("unknown error".into())))
    }
}

/// Fans alert events out to the configured notifiers.
///
/// `notify_now` delivers inline and is reserved for critical alerts;
/// `enqueue` hands the event to the background drain task and drops it
/// with a counter when the queue is full.
pub struct AlertDispatcher {
    notifiers: Arc<Vec<Box<dyn AlertNotifier>>>,
    tx: mpsc::Sender<AlertEvent>,
    rx: Mutex<Option<mpsc::Receiver<AlertEvent>>>,
    dropped: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(notifiers: Vec<Box<dyn AlertNotifier>>, buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        Self {
            notifiers: Arc::new(notifiers),
            tx,
            rx: Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Deliver an event inline, awaiting every notifier.
    pub async fn notify_now(&self, event: &AlertEvent) {
        Self::fan_out(&self.notifiers, event).await;
    }

    /// Queue an event for the background drain task. Never blocks.
    pub fn enqueue(&self, event: AlertEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            counters::notification_dropped();
            warn!(
                alert = %e.into_inner().alert().id,
                "alert notification queue full, event dropped"
            );
        }
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the drain task. Runs until shutdown, then flushes what is
    /// already queued before exiting.
    pub fn start(&self, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
        let Some(mut rx) = self.rx.lock().unwrap().take() else {
            warn!("alert dispatcher already started");
            return tokio::spawn(async {});
        };
        let notifiers = Arc::clone(&self.notifiers);
        let mut shutdown_rx = shutdown.subscribe();

        tokio::spawn(async move {
            debug!(notifiers = notifiers.len(), "alert dispatcher started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        while let Ok(event) = rx.try_recv() {
                            Self::fan_out(&notifiers, &event).await;
                        }
                        debug!("alert dispatcher stopped");
                        break;
                    }
                    maybe = rx.recv() => {
                        match maybe {
                            Some(event) => Self::fan_out(&notifiers, &event).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn fan_out(notifiers: &[Box<dyn AlertNotifier>], event: &AlertEvent) {
        for notifier in notifiers.iter() {
            match notifier.notify(event).await {
                Ok(()) => counters::notification_sent(notifier.name()),
                Err(e) => {
                    counters::notification_failed(notifier.name());
                    warn!(
                        notifier = notifier.name(),
                        alert = %event.alert().id,
                        event = event.name(),
                        error = %e,
                        "alert notification failed"
                    );
                }
            }
        }
    }
}

/// Test notifier that records every event it receives.
#[cfg(test)]
pub(crate) struct RecordingNotifier {
    pub events: Mutex<Vec<AlertEvent>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl AlertNotifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            Err(NotifyError::Transport("induced failure".into()))
        } else {
            Ok(())
        }
    }
}

// Lets tests hand the dispatcher a notifier while keeping a handle on it.
#[cfg(test)]
#[async_trait]
impl AlertNotifier for Arc<RecordingNotifier> {
    fn name(&self) -> &str {
        AlertNotifier::name(self.as_ref())
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        self.as_ref().notify(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, ErrorKind};

    fn sample_alert() -> Alert {
        Alert::open(
            ErrorKind::ApiFailure,
            ChannelKind::Whatsapp,
            Severity::High,
            "provider error (status 503): unavailable",
            10,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn test_event_serialization() {
        let event = AlertEvent::Opened {
            alert: sample_alert(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "opened");
        assert_eq!(json["alert"]["error_kind"], "api_failure");
        assert_eq!(json["alert"]["channel"], "whatsapp");
        assert_eq!(json["alert"]["occurrence_count"], 10);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            let mut alert = sample_alert();
            alert.severity = severity;
            let event = AlertEvent::Opened { alert };
            assert!(notifier.notify(&event).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_webhook_unreachable_endpoint() {
        // Port 1 refuses connections immediately
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/alerts", Duration::from_secs(1))
            .unwrap()
            .with_retries(0);

        let event = AlertEvent::Opened {
            alert: sample_alert(),
        };
        let err = notifier.notify(&event).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::Transport(_) | NotifyError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_notify_now_fans_out_to_all() {
        let first = Arc::new(RecordingNotifier::new());
        let second = Arc::new(RecordingNotifier::failing());

        let dispatcher = AlertDispatcher::new(
            vec![
                Box::new(Arc::clone(&first)),
                Box::new(Arc::clone(&second)),
            ],
            8,
        );

        let event = AlertEvent::Opened {
            alert: sample_alert(),
        };
        dispatcher.notify_now(&event).await;

        // A failing notifier does not stop the fan-out
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_drops_when_full() {
        let dispatcher = AlertDispatcher::new(vec![Box::new(LogNotifier)], 1);

        // Drain task not started, so the second event has nowhere to go
        dispatcher.enqueue(AlertEvent::Opened {
            alert: sample_alert(),
        });
        dispatcher.enqueue(AlertEvent::Opened {
            alert: sample_alert(),
        });

        assert_eq!(dispatcher.dropped(), 1);
    }

    #[tokio::test]
    async fn test_drain_task_delivers_queued_events() {
        let recorder = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::new(vec![Box::new(Arc::clone(&recorder))], 8);
        let shutdown = Shutdown::new(Duration::from_secs(1));
        let handle = dispatcher.start(Arc::clone(&shutdown));

        dispatcher.enqueue(AlertEvent::Opened {
            alert: sample_alert(),
        });
        dispatcher.enqueue(AlertEvent::Resolved {
            alert: sample_alert(),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.start_drain();
        handle.await.unwrap();

        assert_eq!(recorder.count(), 2);
        assert_eq!(dispatcher.dropped(), 0);
    }
}
