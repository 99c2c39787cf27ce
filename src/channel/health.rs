//! Channel health monitoring.
//!
//! Two signals feed each channel's availability flag:
//! - a periodic probe against the provider status endpoint
//! - live send traffic reported by the orchestrator
//!
//! A failed probe flips the channel unavailable immediately; live send
//! failures only flip it after a configured run of consecutive errors, so
//! one flaky attempt does not take a channel out of rotation. Any success
//! from either signal restores availability and clears the error run.
//!
//! Availability is advisory: the orchestrator consults it when a fallback
//! exists, but a send with no alternative still tries the flagged channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bootstrap::Shutdown;
use crate::config::HealthCheckConfig;
use crate::telemetry::counters;

use super::{ChannelKind, SharedClient};

/// Live health state for one channel.
pub struct ChannelHealth {
    available: AtomicBool,
    consecutive_errors: AtomicU32,
    last_check: Mutex<Option<Instant>>,
}

impl ChannelHealth {
    fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            consecutive_errors: AtomicU32::new(0),
            last_check: Mutex::new(None),
        }
    }

    /// Current availability flag.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Current consecutive error run.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        *self.last_check.lock().unwrap() = Some(Instant::now());
    }

    fn last_check_age(&self) -> Option<Duration> {
        self.last_check.lock().unwrap().map(|t| t.elapsed())
    }
}

/// Serializable view of one channel's health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub channel: ChannelKind,
    pub available: bool,
    pub consecutive_errors: u32,
    pub last_check_secs_ago: Option<u64>,
}

/// Tracks availability for every configured channel and runs the probe loop.
pub struct HealthMonitor {
    channels: HashMap<ChannelKind, ChannelHealth>,
    clients: Vec<SharedClient>,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Build a monitor covering the given clients. Every channel starts
    /// available; entries are never removed.
    pub fn new(clients: &[SharedClient], config: &HealthCheckConfig) -> Self {
        let channels = clients
            .iter()
            .map(|c| (c.kind(), ChannelHealth::new()))
            .collect();
        Self {
            channels,
            clients: clients.to_vec(),
            interval: config.interval,
            timeout: config.timeout,
            failure_threshold: config.failure_threshold,
        }
    }

    /// Whether the channel is currently considered available.
    ///
    /// Unknown channels report available: the flag exists to skip channels
    /// with observed trouble, never to veto ones we know nothing about.
    pub fn is_available(&self, kind: ChannelKind) -> bool {
        self.channels.get(&kind).map_or(true, |h| h.is_available())
    }

    /// Record a delivered attempt. Restores availability and clears the
    /// consecutive error run.
    pub fn record_success(&self, kind: ChannelKind) {
        let Some(health) = self.channels.get(&kind) else {
            return;
        };
        health.consecutive_errors.store(0, Ordering::SeqCst);
        health.touch();
        self.set_available(kind, health, true, "send succeeded");
    }

    /// Record a failed attempt. Flips the channel unavailable once the
    /// consecutive run reaches the configured threshold.
    pub fn record_failure(&self, kind: ChannelKind) {
        let Some(health) = self.channels.get(&kind) else {
            return;
        };
        let run = health.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        health.touch();
        if run >= self.failure_threshold {
            self.set_available(kind, health, false, "consecutive send failures");
        } else {
            debug!(channel = %kind, run, "send failure recorded");
        }
    }

    /// Probe every channel once, concurrently. Returns the snapshot after
    /// all probes complete.
    pub async fn force_check(&self) -> Vec<HealthSnapshot> {
        let probes = self.clients.iter().map(|client| self.probe_one(client));
        futures::future::join_all(probes).await;
        self.snapshot()
    }

    /// Current health of every channel, sorted by channel label.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut out: Vec<HealthSnapshot> = self
            .channels
            .iter()
            .map(|(kind, health)| HealthSnapshot {
                channel: *kind,
                available: health.is_available(),
                consecutive_errors: health.consecutive_errors(),
                last_check_secs_ago: health.last_check_age().map(|d| d.as_secs()),
            })
            .collect();
        out.sort_by_key(|s| s.channel.name());
        out
    }

    /// Spawn the periodic probe loop. One probe round runs right away so
    /// startup state reflects the providers, then every `interval`.
    pub fn start(self: &Arc<Self>, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run(shutdown).await;
        })
    }

    async fn run(self: Arc<Self>, shutdown: Arc<Shutdown>) {
        let mut shutdown_rx = shutdown.subscribe();

        info!(
            interval_secs = self.interval.as_secs(),
            channels = self.clients.len(),
            "starting channel probes"
        );
        self.probe_all().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("stopping channel probes");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.probe_all().await;
                }
            }
        }
    }

    async fn probe_all(&self) {
        let probes = self.clients.iter().map(|client| self.probe_one(client));
        futures::future::join_all(probes).await;
    }

    async fn probe_one(&self, client: &SharedClient) {
        let kind = client.kind();
        let result = tokio::time::timeout(self.timeout, client.probe()).await;

        let Some(health) = self.channels.get(&kind) else {
            return;
        };
        health.touch();

        match result {
            Ok(Ok(())) => {
                health.consecutive_errors.store(0, Ordering::SeqCst);
                self.set_available(kind, health, true, "probe succeeded");
                counters::probe_recorded(kind.name(), true);
            }
            Ok(Err(e)) => {
                // A failed probe is authoritative: no threshold applies
                health.consecutive_errors.fetch_add(1, Ordering::SeqCst);
                warn!(channel = %kind, error = %e, "probe failed");
                self.set_available(kind, health, false, "probe failed");
                counters::probe_recorded(kind.name(), false);
            }
            Err(_) => {
                health.consecutive_errors.fetch_add(1, Ordering::SeqCst);
                warn!(channel = %kind, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                self.set_available(kind, health, false, "probe timed out");
                counters::probe_recorded(kind.name(), false);
            }
        }
    }

    fn set_available(&self, kind: ChannelKind, health: &ChannelHealth, available: bool, reason: &str) {
        let was = health.available.swap(available, Ordering::SeqCst);
        if was != available {
            if available {
                info!(channel = %kind, reason, "channel available");
            } else {
                warn!(channel = %kind, reason, "channel unavailable");
            }
            counters::channel_availability(kind.name(), available);
        }
    }
}
