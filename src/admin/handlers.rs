//! Admin API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alert::{AlertId, AlertStats};
use crate::channel::{ChannelKind, HealthSnapshot};
use crate::delivery::{MediaKind, SendPolicy, SendRequest};
use crate::store::{RecordQuery, StoreStats};

use super::server::AdminState;

/// Error body for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: message.into(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Run one send through the orchestrator, honoring the drain gate.
///
/// The outcome is always 200 with the full attempt trail; delivery
/// failure is carried in the body, not the status code. Only a daemon
/// that is draining answers 503.
async fn deliver(state: &AdminState, request: SendRequest, policy: SendPolicy) -> Response {
    // Held across the send: a client disconnect drops this future, and
    // the guard releases the in-flight slot on the way out.
    let Some(_in_flight) = state.app.shutdown.send_started() else {
        let body = ErrorResponse {
            error: "shutting down, not accepting sends".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };

    let outcome = state.app.orchestrator.send(request, policy).await;

    Json(outcome).into_response()
}

/// Body for POST /send/text.
#[derive(Debug, Deserialize)]
pub struct SendTextBody {
    pub recipients: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub policy: SendPolicy,
}

/// Send a templated text notification.
///
/// POST /send/text
pub async fn send_text_handler(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<SendTextBody>,
) -> Response {
    let country = &state.app.config.delivery.country_code;
    match SendRequest::text(body.recipients, body.template, body.parameters, country) {
        Ok(request) => deliver(&state, request, body.policy).await,
        Err(e) => bad_request(e.to_string()),
    }
}

/// Body for POST /send/media.
#[derive(Debug, Deserialize)]
pub struct SendMediaBody {
    pub recipients: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub media_kind: MediaKind,
    pub media_url: String,
    #[serde(default)]
    pub policy: SendPolicy,
}

/// Send a templated notification with a media attachment.
///
/// POST /send/media
pub async fn send_media_handler(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<SendMediaBody>,
) -> Response {
    let country = &state.app.config.delivery.country_code;
    match SendRequest::media(
        body.recipients,
        body.template,
        body.parameters,
        body.media_kind,
        body.media_url,
        country,
    ) {
        Ok(request) => deliver(&state, request, body.policy).await,
        Err(e) => bad_request(e.to_string()),
    }
}

/// Body for POST /send/otp.
#[derive(Debug, Deserialize)]
pub struct SendOtpBody {
    pub recipient: String,
    pub template: String,
    pub code: String,
    #[serde(default)]
    pub policy: SendPolicy,
}

/// Send a one-time password.
///
/// POST /send/otp
pub async fn send_otp_handler(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<SendOtpBody>,
) -> Response {
    let country = &state.app.config.delivery.country_code;
    match SendRequest::otp(&body.recipient, body.template, body.code, country) {
        Ok(request) => deliver(&state, request, body.policy).await,
        Err(e) => bad_request(e.to_string()),
    }
}

/// Body for POST /send/reply.
#[derive(Debug, Deserialize)]
pub struct SendReplyBody {
    pub recipient: String,
    pub text: String,
    #[serde(default)]
    pub policy: SendPolicy,
}

/// Send a free-form reply within an open conversation.
///
/// POST /send/reply
pub async fn send_reply_handler(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<SendReplyBody>,
) -> Response {
    let country = &state.app.config.delivery.country_code;
    match SendRequest::reply(&body.recipient, body.text, country) {
        Ok(request) => deliver(&state, request, body.policy).await,
        Err(e) => bad_request(e.to_string()),
    }
}

/// Current availability of every channel.
///
/// GET /channels/health
pub async fn channels_health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.app.health.snapshot())
}

/// Probe every channel now and return the refreshed snapshot.
///
/// POST /channels/probe
pub async fn channels_probe_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.app.health.force_check().await)
}

/// Open alerts, most severe first.
///
/// GET /alerts
pub async fn alerts_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.app.alerts.active_alerts())
}

/// Open and recently resolved alerts.
///
/// GET /alerts/all
pub async fn alerts_all_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.app.alerts.all_alerts())
}

/// Body for POST /alerts/{id}/resolve.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveBody {
    #[serde(default)]
    pub resolved_by: Option<String>,
}

/// Resolve an open alert.
///
/// POST /alerts/{id}/resolve
pub async fn alert_resolve_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<u64>,
    body: Option<Json<ResolveBody>>,
) -> Response {
    let resolved_by = body
        .and_then(|Json(b)| b.resolved_by)
        .unwrap_or_else(|| "operator".to_string());

    match state.app.alerts.resolve(AlertId::from_u64(id), &resolved_by) {
        Some(alert) => Json(alert).into_response(),
        None => {
            let body = ErrorResponse {
                error: format!("no open alert with id {id}"),
            };
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

/// Query string for GET /deliveries/recent.
#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
    pub channel: Option<ChannelKind>,
    pub success: Option<bool>,
}

/// Recent delivery records, newest first.
///
/// GET /deliveries/recent
pub async fn deliveries_recent_handler(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<RecentParams>,
) -> impl IntoResponse {
    let mut query = RecordQuery::new().with_limit(params.limit.unwrap_or(50));
    if let Some(channel) = params.channel {
        query = query.with_channel(channel);
    }
    if let Some(success) = params.success {
        query = query.with_success(success);
    }

    Json(state.app.store.query(&query))
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check handler.
///
/// GET /healthz
pub async fn health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = if state.app.shutdown.is_accepting() {
        "healthy"
    } else {
        "draining"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Live handler (for Kubernetes).
///
/// GET /livez
pub async fn live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub accepting: bool,
    pub channels: Vec<HealthSnapshot>,
}

/// Ready handler (for Kubernetes).
///
/// Ready while accepting sends and at least one channel is available.
///
/// GET /readyz
pub async fn ready_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let accepting = state.app.shutdown.is_accepting();
    let channels = state.app.health.snapshot();
    let ready = accepting && channels.iter().any(|c| c.available);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            accepting,
            channels,
        }),
    )
}

/// Stats response.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub in_flight_sends: u64,
    pub channels: Vec<HealthSnapshot>,
    pub deliveries: StoreStats,
    pub alerts: AlertStats,
}

/// Stats handler.
///
/// GET /stats
pub async fn stats_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(StatsResponse {
        uptime_seconds: state.app.uptime_secs(),
        in_flight_sends: state.app.shutdown.in_flight(),
        channels: state.app.health.snapshot(),
        deliveries: state.app.store.stats(),
        alerts: state.app.alerts.stats(),
    })
}

/// Metrics handler (Prometheus format).
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
