//! Threshold evaluation and alert lifecycle.
//!
//! Errors reported from the delivery path land in per-(error kind, channel)
//! rolling windows. When a window crosses the threshold for its error kind
//! an alert opens; further occurrences of the same condition fold into the
//! open alert instead of spawning duplicates. Alerts close when an operator
//! resolves them or when the condition stays quiet long enough.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::notify::{AlertDispatcher, AlertEvent, AlertNotifier};
use super::types::{threshold_rule, Alert, AlertId, ErrorWindow, Severity};
use crate::bootstrap::Shutdown;
use crate::channel::{ChannelKind, ErrorKind};
use crate::config::AlertConfig;
use crate::telemetry::counters;

/// One monitored condition: an error kind on a channel.
type ConditionKey = (ErrorKind, ChannelKind);

/// Resolved alerts kept for listing.
const HISTORY_CAP: usize = 512;

/// Counts of the engine's current and lifetime state.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub active: usize,
    pub opened_total: u64,
    pub resolved_total: u64,
    pub open_windows: usize,
    pub dropped_notifications: u64,
}

/// Tracks error windows and the alerts they open.
///
/// Lock discipline: `windows`, `active` and `history` are separate locks,
/// taken one at a time and never held across an await.
pub struct AlertEngine {
    config: AlertConfig,
    windows: RwLock<HashMap<ConditionKey, ErrorWindow>>,
    active: RwLock<HashMap<ConditionKey, Alert>>,
    history: RwLock<VecDeque<Alert>>,
    dispatcher: AlertDispatcher,
    opened: AtomicU64,
    resolved: AtomicU64,
}

impl AlertEngine {
    pub fn new(config: AlertConfig, notifiers: Vec<Box<dyn AlertNotifier>>) -> Self {
        let dispatcher = AlertDispatcher::new(notifiers, config.buffer_size);
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            dispatcher,
            opened: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
        }
    }

    /// Record one error occurrence. Returns the ID of the alert the
    /// occurrence now belongs to, if any. Never fails; a full notification
    /// queue drops the event, not the send.
    pub async fn report_error(
        &self,
        kind: ErrorKind,
        channel: ChannelKind,
        message: &str,
    ) -> Option<AlertId> {
        let rule = threshold_rule(kind);
        let key = (kind, channel);

        let (count, first_seen_at) = {
            let mut windows = self.windows.write().unwrap();
            match windows.get_mut(&key) {
                Some(window) => {
                    window.bump(rule.window);
                    (window.count, window.first_seen_at)
                }
                None => {
                    let window = ErrorWindow::new();
                    let first_seen_at = window.first_seen_at;
                    windows.insert(key, window);
                    (1, first_seen_at)
                }
            }
        };

        let (id, event) = {
            let mut active = self.active.write().unwrap();
            if let Some(alert) = active.get_mut(&key) {
                alert.record_occurrence(message);
                debug!(
                    alert = %alert.id,
                    occurrences = alert.occurrence_count,
                    "occurrence folded into open alert"
                );
                return Some(alert.id);
            }

            if count < rule.min_count {
                return None;
            }

            // Seed the count and first-occurrence time from the window:
            // the alert represents every occurrence that crossed the
            // threshold, dating back to the first one.
            let alert = Alert::open(kind, channel, rule.severity, message, count, first_seen_at);
            info!(
                alert = %alert.id,
                error_kind = kind.name(),
                channel = channel.name(),
                severity = %rule.severity,
                occurrences = count,
                "alert opened"
            );
            counters::alert_opened(kind.name(), rule.severity.name());
            self.opened.fetch_add(1, Ordering::Relaxed);

            let id = alert.id;
            let event = AlertEvent::Opened {
                alert: alert.clone(),
            };
            active.insert(key, alert);
            counters::alerts_active_set(active.len() as i64);
            (id, event)
        };

        if rule.severity == Severity::Critical {
            self.dispatcher.notify_now(&event).await;
        } else {
            self.dispatcher.enqueue(event);
        }

        Some(id)
    }

    /// Record a successful delivery on a channel. Transient error windows
    /// for the channel are discarded, and alerts already quiet for the
    /// full quiet period resolve without waiting for the next sweep.
    /// Validation windows survive; a working channel says nothing about
    /// malformed requests.
    pub fn report_channel_success(&self, channel: ChannelKind) {
        {
            let mut windows = self.windows.write().unwrap();
            windows.retain(|(kind, ch), _| *ch != channel || !kind.is_transient());
        }
        self.resolve_quiet(Some(channel));
    }

    /// Resolve an alert by hand. Returns the resolved alert, or `None` if
    /// no active alert has this ID.
    pub fn resolve(&self, id: AlertId, resolved_by: &str) -> Option<Alert> {
        let alert = {
            let mut active = self.active.write().unwrap();
            let key = active
                .iter()
                .find(|(_, alert)| alert.id == id)
                .map(|(key, _)| *key)?;
            let mut alert = active.remove(&key)?;
            alert.resolve(resolved_by);
            counters::alerts_active_set(active.len() as i64);
            alert
        };

        info!(
            alert = %alert.id,
            error_kind = alert.error_kind.name(),
            channel = alert.channel.name(),
            resolved_by,
            "alert resolved"
        );
        counters::alert_resolved(alert.error_kind.name(), "manual");
        self.resolved.fetch_add(1, Ordering::Relaxed);

        self.push_history(alert.clone());
        self.dispatcher.enqueue(AlertEvent::Resolved {
            alert: alert.clone(),
        });
        Some(alert)
    }

    /// Auto-resolve alerts whose condition has stayed quiet for the whole
    /// quiet period, then evict windows idle past the retention limit.
    pub fn sweep(&self) {
        let resolved = self.resolve_quiet(None);

        let evicted = {
            let mut windows = self.windows.write().unwrap();
            let before = windows.len();
            windows.retain(|_, window| window.idle() <= self.config.window_retention);
            before - windows.len()
        };

        if resolved > 0 || evicted > 0 {
            debug!(resolved, evicted, "alert sweep completed");
        }
    }

    fn resolve_quiet(&self, only: Option<ChannelKind>) -> usize {
        let quiet_period = self.config.quiet_period;
        let mut resolved = Vec::new();
        {
            let mut active = self.active.write().unwrap();
            active.retain(|(_, channel), alert| {
                if let Some(only) = only {
                    if *channel != only {
                        return true;
                    }
                }
                let idle = Utc::now()
                    .signed_duration_since(alert.last_occurrence)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if idle < quiet_period {
                    return true;
                }

                alert.resolve("auto");
                info!(
                    alert = %alert.id,
                    error_kind = alert.error_kind.name(),
                    channel = alert.channel.name(),
                    quiet_secs = idle.as_secs(),
                    "alert auto-resolved after quiet period"
                );
                counters::alert_resolved(alert.error_kind.name(), "auto");
                resolved.push(alert.clone());
                false
            });
            counters::alerts_active_set(active.len() as i64);
        }

        let count = resolved.len();
        self.resolved.fetch_add(count as u64, Ordering::Relaxed);
        for alert in resolved {
            self.push_history(alert.clone());
            self.dispatcher.enqueue(AlertEvent::Resolved { alert });
        }
        count
    }

    fn push_history(&self, alert: Alert) {
        let mut history = self.history.write().unwrap();
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Spawn the periodic sweeper and the notification drain task.
    pub fn start(self: &Arc<Self>, shutdown: Arc<Shutdown>) -> Vec<JoinHandle<()>> {
        let dispatcher_handle = self.dispatcher.start(Arc::clone(&shutdown));

        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        let sweeper = tokio::spawn(async move {
            debug!(
                interval_secs = engine.config.sweep_interval.as_secs(),
                "alert sweeper started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("alert sweeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(engine.config.sweep_interval) => {
                        engine.sweep();
                    }
                }
            }
        });

        vec![sweeper, dispatcher_handle]
    }

    /// Open alerts, most severe first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let active = self.active.read().unwrap();
        let mut alerts: Vec<Alert> = active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.id.as_u64().cmp(&b.id.as_u64()))
        });
        alerts
    }

    /// Open and recently resolved alerts, newest first.
    pub fn all_alerts(&self) -> Vec<Alert> {
        let mut alerts = self.active_alerts();
        {
            let history = self.history.read().unwrap();
            alerts.extend(history.iter().cloned());
        }
        alerts.sort_by(|a, b| b.id.as_u64().cmp(&a.id.as_u64()));
        alerts
    }

    /// Look up one alert, active or resolved.
    pub fn get(&self, id: AlertId) -> Option<Alert> {
        {
            let active = self.active.read().unwrap();
            if let Some(alert) = active.values().find(|alert| alert.id == id) {
                return Some(alert.clone());
            }
        }
        let history = self.history.read().unwrap();
        history.iter().find(|alert| alert.id == id).cloned()
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            active: self.active.read().unwrap().len(),
            opened_total: self.opened.load(Ordering::Relaxed),
            resolved_total: self.resolved.load(Ordering::Relaxed),
            open_windows: self.windows.read().unwrap().len(),
            dropped_notifications: self.dispatcher.dropped(),
        }
    }
}
