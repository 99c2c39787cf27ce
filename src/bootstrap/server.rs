use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Level};

use crate::admin::AdminServer;
use crate::config::Config;
use crate::telemetry::{counters, Metrics};

use super::shutdown::Shutdown;
use super::state::{AppState, SharedAppState};

/// Cadence for store pruning and gauge refresh.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Main notifyd server
///
/// Components:
/// - Main task: signal handling, drain coordination
/// - Health monitor: periodic channel probes
/// - Alert engine: notification dispatch, quiet-period sweeps
/// - Admin server: send API, health/alert/delivery inspection, metrics
pub struct Server {
    /// Configuration
    config: Arc<Config>,

    /// Shutdown coordinator
    shutdown: Arc<Shutdown>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self> {
        let shutdown = Shutdown::new(config.settings.shutdown.drain_timeout);

        Ok(Self {
            config: Arc::new(config),
            shutdown,
        })
    }

    /// Run the server until shutdown
    pub async fn run(self) -> Result<()> {
        let span = span!(Level::INFO, "notifyd", version = env!("CARGO_PKG_VERSION"));
        let _enter = span.enter();

        info!(
            channels = self.config.channels.len(),
            primary = %self.config.delivery.primary,
            fallback = self.config.delivery.fallback.as_deref().unwrap_or("none"),
            "starting notifyd"
        );

        // Metrics registry; the admin server exposes it at /metrics
        let metrics = Metrics::new()?;
        counters::init(&metrics.meter("notifyd"));

        let state: SharedAppState =
            Arc::new(AppState::new(self.config.clone(), self.shutdown.clone())?);

        // Background timers
        let monitor_handle = state.health.start(self.shutdown.clone());
        let alert_handles = state.alerts.start(self.shutdown.clone());
        let maintenance_handle = spawn_maintenance(state.clone(), self.shutdown.clone());

        // Admin API server
        let admin = AdminServer::new(&self.config.admin, state.clone(), metrics.clone());
        let admin_handle = tokio::spawn(async move {
            if let Err(e) = admin.serve().await {
                error!(error = %e, "admin server failed");
            }
        });

        // Log channel information
        for channel in &self.config.channels {
            if channel.mock.is_some() {
                info!(
                    name = %channel.name,
                    kind = %channel.kind,
                    mode = "mock",
                    "channel configured"
                );
            } else {
                info!(
                    name = %channel.name,
                    kind = %channel.kind,
                    api_url = %channel.api_url,
                    timeout_ms = channel.timeout.as_millis() as u64,
                    "channel configured"
                );
            }
        }

        info!(
            admin_address = %self.config.admin.address,
            probe_interval_secs = self.config.health_check.interval.as_secs(),
            drain_timeout_secs = self.config.settings.shutdown.drain_timeout.as_secs(),
            "notifyd server started"
        );

        // Wait for shutdown signal
        self.wait_for_shutdown().await;

        info!("shutdown signal received, starting graceful shutdown");

        // Subscribe before draining so a drain that completes immediately
        // is not missed.
        let mut complete = self.shutdown.complete_signal();
        self.shutdown.start_drain();

        // Wait for in-flight sends or the drain timeout, whichever first
        let drain_timeout = self.config.settings.shutdown.drain_timeout;
        if tokio::time::timeout(drain_timeout, complete.recv())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.shutdown.in_flight(),
                "drain timeout reached, forcing shutdown"
            );
        }
        self.shutdown.terminate();

        // Background tasks exit on the terminated transition
        let _ = monitor_handle.await;
        for handle in alert_handles {
            let _ = handle.await;
        }
        let _ = maintenance_handle.await;

        // Stop admin server
        admin_handle.abort();

        // Flush tracing
        crate::telemetry::shutdown_tracing();

        info!("notifyd server stopped");

        Ok(())
    }

    /// Wait for shutdown signal (SIGINT or SIGTERM)
    async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("received SIGTERM");
            }
        }
    }

    /// Get the shutdown coordinator
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }
}

fn spawn_maintenance(state: SharedAppState, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("stopping maintenance loop");
                    break;
                }
                _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {
                    state.maintenance();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::ShutdownState;

    fn test_config() -> Config {
        Config::from_yaml(
            r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response: success

delivery:
  primary: whatsapp
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_server_creation() {
        let server = Server::new(test_config()).unwrap();
        assert_eq!(server.shutdown_handle().state(), ShutdownState::Running);
    }

    #[tokio::test]
    async fn test_maintenance_loop_stops_on_drain() {
        let config = Arc::new(test_config());
        let shutdown = Shutdown::new(Duration::from_secs(1));
        let state = Arc::new(AppState::new(config, shutdown.clone()).unwrap());

        let handle = spawn_maintenance(state, shutdown.clone());
        shutdown.start_drain();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
