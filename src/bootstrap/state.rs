//! Shared application state.
//!
//! Contains all the core components shared across the daemon:
//! - Channels (provider clients, primary/fallback roles)
//! - Health monitor (channel availability)
//! - Alert engine (error thresholding, alert lifecycle)
//! - Delivery store (recent delivery records)
//! - Orchestrator (send entry point)
//! - Config (settings)

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::alert::{AlertEngine, AlertNotifier, LogNotifier, WebhookNotifier};
use crate::channel::{Channels, HealthMonitor};
use crate::config::{AlertConfig, Config};
use crate::delivery::Orchestrator;
use crate::store::{InMemoryStore, SharedStore};
use crate::telemetry::counters;

use super::Shutdown;

/// Shared application state.
///
/// Passed to every component that needs daemon-wide resources, including
/// each admin request handler. All fields are thread-safe and can be
/// cloned cheaply.
#[derive(Clone)]
pub struct AppState {
    /// Configured channel clients with primary/fallback roles resolved
    pub channels: Arc<Channels>,
    /// Channel availability (probes plus live-traffic hysteresis)
    pub health: Arc<HealthMonitor>,
    /// Error thresholding and alert lifecycle
    pub alerts: Arc<AlertEngine>,
    /// Recent delivery records
    pub store: SharedStore,
    /// Send entry point
    pub orchestrator: Arc<Orchestrator>,
    /// Drain-aware shutdown handle
    pub shutdown: Arc<Shutdown>,
    /// Configuration
    pub config: Arc<Config>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Create application state from configuration.
    pub fn new(config: Arc<Config>, shutdown: Arc<Shutdown>) -> anyhow::Result<Self> {
        let channels = Arc::new(Channels::from_config(&config)?);
        let health = Arc::new(HealthMonitor::new(channels.all(), &config.health_check));

        let notifiers = alert_notifiers(&config.alerts)?;
        let alerts = Arc::new(AlertEngine::new(config.alerts.clone(), notifiers));

        let store: SharedStore = Arc::new(InMemoryStore::new(config.settings.store_capacity));

        let orchestrator = Arc::new(Orchestrator::new(
            channels.clone(),
            health.clone(),
            alerts.clone(),
            store.clone(),
            &config,
        ));

        info!(
            channels = channels.all().len(),
            primary = %channels.primary().kind(),
            fallback = channels.fallback().map(|c| c.kind().name()).unwrap_or("none"),
            "application state initialized"
        );

        Ok(Self {
            channels,
            health,
            alerts,
            store,
            orchestrator,
            shutdown,
            config,
            started_at: Instant::now(),
        })
    }

    /// Seconds since the daemon started.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Run periodic maintenance tasks.
    ///
    /// Call this from a background task:
    /// - Prune delivery records past the retention age
    /// - Refresh the store size gauge
    pub fn maintenance(&self) {
        let pruned = self.store.prune(self.config.settings.record_retention);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned aged delivery records");
        }

        counters::store_records_set(self.store.len() as i64);
    }
}

/// Notifier set for alert transitions. Always logs; posts to a webhook
/// when one is configured.
fn alert_notifiers(config: &AlertConfig) -> anyhow::Result<Vec<Box<dyn AlertNotifier>>> {
    let mut notifiers: Vec<Box<dyn AlertNotifier>> = vec![Box::new(LogNotifier)];

    if let Some(url) = &config.webhook_url {
        notifiers.push(Box::new(WebhookNotifier::new(url, config.webhook_timeout)?));
    }

    Ok(notifiers)
}

/// Shared application state handle.
pub type SharedAppState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::delivery::{SendPolicy, SendRequest};
    use std::time::Duration;

    fn test_config() -> Config {
        Config::from_yaml(
            r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response: success
  - name: sms
    kind: sms
    mock:
      response: success

delivery:
  primary: whatsapp
  fallback: sms
"#,
        )
        .unwrap()
    }

    fn test_shutdown() -> Arc<Shutdown> {
        Shutdown::new(Duration::from_secs(30))
    }

    #[test]
    fn test_state_wires_channel_roles() {
        let state = AppState::new(Arc::new(test_config()), test_shutdown()).unwrap();

        assert_eq!(state.channels.primary().kind(), ChannelKind::Whatsapp);
        assert_eq!(state.channels.fallback().unwrap().kind(), ChannelKind::Sms);
        assert!(state.health.is_available(ChannelKind::Whatsapp));
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_state_delivers_through_orchestrator() {
        let state = AppState::new(Arc::new(test_config()), test_shutdown()).unwrap();

        let request = SendRequest::text(
            vec!["9876543210".to_string()],
            "welcome",
            vec!["Asha".to_string()],
            "91",
        )
        .unwrap();
        let outcome = state.orchestrator.send(request, SendPolicy::default()).await;

        assert!(outcome.success);
        assert_eq!(state.store.len(), 1);
    }

    #[test]
    fn test_maintenance_keeps_fresh_records() {
        let state = AppState::new(Arc::new(test_config()), test_shutdown()).unwrap();

        state.maintenance();
        assert_eq!(state.store.len(), 0);
    }

    #[test]
    fn test_webhook_notifier_built_from_config() {
        let mut config = test_config();
        config.alerts.webhook_url = Some("http://127.0.0.1:9/hooks/alerts".to_string());

        let notifiers = alert_notifiers(&config.alerts).unwrap();
        assert_eq!(notifiers.len(), 2);
        assert_eq!(notifiers[1].name(), "webhook");
    }
}
