//! Alerting on sustained delivery failures.
//!
//! Every error from the send path is counted in a rolling window keyed by
//! (error kind, channel). Each error kind carries a fixed threshold rule;
//! crossing it opens an alert that absorbs further occurrences until the
//! condition goes quiet or an operator resolves it.
//!
//! # Architecture
//!
//! ```text
//! Send failure → ErrorWindow → threshold? → Alert → Notifiers
//!                                             ↓
//!                                     quiet period → auto-resolve
//! ```

mod engine;
mod notify;
mod types;

pub use engine::{AlertEngine, AlertStats};
pub use notify::{
    AlertDispatcher, AlertEvent, AlertNotifier, LogNotifier, NotifyError, WebhookNotifier,
};
pub use types::{threshold_rule, Alert, AlertId, ErrorWindow, Severity, ThresholdRule};
