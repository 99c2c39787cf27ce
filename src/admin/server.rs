//! Admin HTTP server.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::bootstrap::SharedAppState;
use crate::config::AdminConfig;
use crate::telemetry::Metrics;

use super::handlers::{
    alert_resolve_handler, alerts_all_handler, alerts_handler, channels_health_handler,
    channels_probe_handler, deliveries_recent_handler, health_handler, live_handler,
    metrics_handler, ready_handler, send_media_handler, send_otp_handler, send_reply_handler,
    send_text_handler, stats_handler,
};

/// State shared with every admin handler.
pub struct AdminState {
    /// Application state (orchestrator, channels, alerts, delivery log)
    pub app: SharedAppState,
    /// Metrics registry rendered at /metrics
    pub metrics: Arc<Metrics>,
}

/// Admin HTTP server.
pub struct AdminServer {
    config: AdminConfig,
    state: Arc<AdminState>,
}

impl AdminServer {
    /// Create a new admin server.
    pub fn new(config: &AdminConfig, app: SharedAppState, metrics: Arc<Metrics>) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(AdminState { app, metrics }),
        }
    }

    /// Build the router.
    fn build_router(&self) -> Router {
        Router::new()
            // Send API
            .route("/send/text", post(send_text_handler))
            .route("/send/media", post(send_media_handler))
            .route("/send/otp", post(send_otp_handler))
            .route("/send/reply", post(send_reply_handler))
            // Channel health
            .route("/channels/health", get(channels_health_handler))
            .route("/channels/probe", post(channels_probe_handler))
            // Alerts
            .route("/alerts", get(alerts_handler))
            .route("/alerts/all", get(alerts_all_handler))
            .route("/alerts/{id}/resolve", post(alert_resolve_handler))
            // Delivery log
            .route("/deliveries/recent", get(deliveries_recent_handler))
            // Kubernetes-style health endpoints
            .route("/healthz", get(health_handler))
            .route("/livez", get(live_handler))
            .route("/readyz", get(ready_handler))
            // Metrics and stats
            .route("/stats", get(stats_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Run the admin server.
    pub async fn serve(self) -> std::io::Result<()> {
        let router = self.build_router();
        let addr = self.config.address;

        info!(address = %addr, "starting admin server");

        let listener = TcpListener::bind(addr).await?;
        let mut shutdown_rx = self.state.app.shutdown.subscribe();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
                info!("admin server shutting down");
            })
            .await?;

        Ok(())
    }
}
