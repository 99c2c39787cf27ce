//! Alert records and threshold rules.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ErrorKind};

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(u64);

static ALERT_COUNTER: AtomicU64 = AtomicU64::new(0);

impl AlertId {
    /// Allocate the next alert ID.
    pub fn next() -> Self {
        Self(ALERT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Build an ID from its raw value, for admin lookups.
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert_{}", self.0)
    }
}

/// Alert severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Stable label for logs and metric attributes.
    pub fn name(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When a kind of error becomes an alert: `min_count` occurrences of one
/// (error kind, channel) pair within `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdRule {
    pub min_count: u32,
    pub window: Duration,
    pub severity: Severity,
}

/// The rule for an error kind. Exact match on the closed taxonomy; every
/// kind has exactly one rule, so thresholding never guesses from message
/// text.
pub fn threshold_rule(kind: ErrorKind) -> ThresholdRule {
    match kind {
        // Broken credentials or exhausted capacity fail every send; one
        // occurrence is already an incident.
        ErrorKind::AuthFailure | ErrorKind::QueueOverflow => ThresholdRule {
            min_count: 1,
            window: Duration::from_secs(60),
            severity: Severity::Critical,
        },
        ErrorKind::RateLimited => ThresholdRule {
            min_count: 5,
            window: Duration::from_secs(60),
            severity: Severity::High,
        },
        ErrorKind::ApiFailure | ErrorKind::NetworkError => ThresholdRule {
            min_count: 10,
            window: Duration::from_secs(300),
            severity: Severity::High,
        },
        ErrorKind::Timeout => ThresholdRule {
            min_count: 20,
            window: Duration::from_secs(300),
            severity: Severity::Medium,
        },
        // Validation failures are caller bugs, not channel trouble; only
        // a sustained stream is worth surfacing.
        ErrorKind::InvalidPhone
        | ErrorKind::InvalidTemplate
        | ErrorKind::InvalidMediaUrl
        | ErrorKind::MessageTooLong
        | ErrorKind::InvalidOtp => ThresholdRule {
            min_count: 50,
            window: Duration::from_secs(600),
            severity: Severity::Low,
        },
    }
}

/// A standing record of a sustained error condition on one channel.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: AlertId,
    pub error_kind: ErrorKind,
    pub channel: ChannelKind,
    pub severity: Severity,
    /// Latest error message observed for this condition
    pub message: String,
    pub occurrence_count: u32,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl Alert {
    /// Open a new alert seeded with the occurrences already in the window.
    /// `first_occurrence` is the time of the window's first matching error,
    /// not of the occurrence that crossed the threshold.
    pub fn open(
        error_kind: ErrorKind,
        channel: ChannelKind,
        severity: Severity,
        message: impl Into<String>,
        occurrence_count: u32,
        first_occurrence: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::next(),
            error_kind,
            channel,
            severity,
            message: message.into(),
            occurrence_count,
            first_occurrence,
            last_occurrence: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// Fold another occurrence of the same condition into this alert.
    pub fn record_occurrence(&mut self, message: &str) {
        self.occurrence_count += 1;
        self.last_occurrence = Utc::now();
        self.message = message.to_string();
    }

    /// Mark the alert resolved.
    pub fn resolve(&mut self, resolved_by: impl Into<String>) {
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(resolved_by.into());
    }

    /// Whether no occurrence has landed since `cutoff`.
    pub fn quiet_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_occurrence < cutoff
    }
}

/// Rolling occurrence counter for one (error kind, channel) pair.
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    pub count: u32,
    pub first_seen: Instant,
    /// Wall-clock time of the first occurrence, carried into the alert
    /// this window opens
    pub first_seen_at: DateTime<Utc>,
    pub last_seen: Instant,
}

impl ErrorWindow {
    /// Open a window with its first occurrence.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            count: 1,
            first_seen: now,
            first_seen_at: Utc::now(),
            last_seen: now,
        }
    }

    /// Record an occurrence. A window whose span has fully elapsed starts
    /// over rather than counting stale occurrences toward the threshold.
    pub fn bump(&mut self, window: Duration) {
        if self.first_seen.elapsed() > window {
            *self = Self::new();
        } else {
            self.count += 1;
            self.last_seen = Instant::now();
        }
    }

    /// How long since the last occurrence.
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

impl Default for ErrorWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_ids_are_unique_and_increasing() {
        let a = AlertId::next();
        let b = AlertId::next();
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(format!("{a}"), format!("alert_{}", a.as_u64()));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_every_error_kind_has_a_rule() {
        for kind in ErrorKind::ALL {
            let rule = threshold_rule(kind);
            assert!(rule.min_count >= 1, "kind {kind} has an empty threshold");
            assert!(!rule.window.is_zero());
        }
    }

    #[test]
    fn test_first_occurrence_rules() {
        assert_eq!(threshold_rule(ErrorKind::AuthFailure).min_count, 1);
        assert_eq!(
            threshold_rule(ErrorKind::AuthFailure).severity,
            Severity::Critical
        );
        assert_eq!(threshold_rule(ErrorKind::ApiFailure).min_count, 10);
        assert_eq!(
            threshold_rule(ErrorKind::ApiFailure).window,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_alert_keeps_supplied_first_occurrence() {
        let first = Utc::now() - chrono::Duration::seconds(90);
        let alert = Alert::open(
            ErrorKind::ApiFailure,
            ChannelKind::Whatsapp,
            Severity::High,
            "provider error (status 503): unavailable",
            10,
            first,
        );
        assert_eq!(alert.first_occurrence, first);
        assert!(alert.last_occurrence > alert.first_occurrence);
    }

    #[test]
    fn test_alert_occurrence_folding() {
        let mut alert = Alert::open(
            ErrorKind::ApiFailure,
            ChannelKind::Whatsapp,
            Severity::High,
            "provider error (status 503): unavailable",
            10,
            Utc::now(),
        );
        let id = alert.id;

        alert.record_occurrence("provider error (status 502): bad gateway");
        assert_eq!(alert.id, id);
        assert_eq!(alert.occurrence_count, 11);
        assert!(alert.message.contains("502"));
        assert!(!alert.resolved);
    }

    #[test]
    fn test_alert_resolution_fields() {
        let mut alert = Alert::open(
            ErrorKind::Timeout,
            ChannelKind::Sms,
            Severity::Medium,
            "request timed out",
            20,
            Utc::now(),
        );
        alert.resolve("ops@example.com");
        assert!(alert.resolved);
        assert!(alert.resolved_at.is_some());
        assert_eq!(alert.resolved_by.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_window_counts_within_span() {
        let mut window = ErrorWindow::new();
        window.bump(Duration::from_secs(300));
        window.bump(Duration::from_secs(300));
        assert_eq!(window.count, 3);
    }

    #[test]
    fn test_window_restarts_after_span_elapses() {
        let mut window = ErrorWindow::new();
        window.bump(Duration::from_secs(300));
        assert_eq!(window.count, 2);

        // Back-date the window past its span
        window.first_seen = Instant::now() - Duration::from_secs(301);
        let stale_at = Utc::now() - chrono::Duration::seconds(301);
        window.first_seen_at = stale_at;

        window.bump(Duration::from_secs(300));
        assert_eq!(window.count, 1);
        // A restarted window starts its wall clock over too
        assert!(window.first_seen_at > stale_at);
    }
}
