//! notifyd - notification delivery daemon.
//!
//! Sends templated notifications over a primary rich channel with automatic
//! degradation to SMS when the primary is unhealthy or a send exhausts its
//! retries. Core pieces:
//!
//! - [`channel`]: provider clients, error classification, channel health
//! - [`delivery`]: retry executor, fallback conversion, orchestrator
//! - [`alert`]: error windows, threshold rules, alert lifecycle
//! - [`store`]: in-memory delivery log
//! - [`admin`]: HTTP API (sends, health, alerts, stats, metrics)
//! - [`bootstrap`]: composition root, shutdown lifecycle

pub mod admin;
pub mod alert;
pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod delivery;
pub mod store;
pub mod telemetry;

pub use channel::{ChannelKind, ErrorKind};
pub use config::Config;
pub use delivery::{DeliveryOutcome, SendPolicy, SendRequest};
