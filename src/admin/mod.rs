//! Admin HTTP API using Axum.
//!
//! Provides endpoints for:
//! - Sends (/send/text, /send/media, /send/otp, /send/reply)
//! - Channel health (/channels/health, /channels/probe)
//! - Alerts (/alerts, /alerts/all, /alerts/{id}/resolve)
//! - Delivery log (/deliveries/recent)
//! - Health checks (/healthz, /livez, /readyz)
//! - Runtime stats (/stats) and metrics (/metrics)

mod handlers;
mod server;

pub use handlers::{ErrorResponse, ReadinessResponse, StatsResponse};
pub use server::{AdminServer, AdminState};
