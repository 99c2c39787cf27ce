//! Delivery orchestration.
//!
//! One send walks a short, fixed path: pick a channel using live health,
//! run the retry round, convert and re-run on the fallback channel if the
//! primary round came up empty. Every attempt is reported to the health
//! monitor, the alert engine and the delivery log before the next step, and
//! the caller always receives a [`DeliveryOutcome`]; delivery trouble is
//! data, not a panic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::alert::AlertEngine;
use crate::channel::{Channels, ErrorKind, HealthMonitor, SendError};
use crate::config::{Config, DeliveryConfig};
use crate::store::{DeliveryRecord, SharedStore};
use crate::telemetry::counters;

use super::retry::{RetryExecutor, RetryRound};
use super::{convert, DeliveryOutcome, SendPolicy, SendRequest};

/// Coordinates channels, retries and fallback for every send.
pub struct Orchestrator {
    channels: Arc<Channels>,
    health: Arc<HealthMonitor>,
    alerts: Arc<AlertEngine>,
    store: SharedStore,
    executor: RetryExecutor,
    config: DeliveryConfig,
    in_flight: Semaphore,
    request_seq: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        channels: Arc<Channels>,
        health: Arc<HealthMonitor>,
        alerts: Arc<AlertEngine>,
        store: SharedStore,
        config: &Config,
    ) -> Self {
        Self {
            executor: RetryExecutor::from_config(&config.delivery),
            in_flight: Semaphore::new(config.delivery.max_in_flight),
            config: config.delivery.clone(),
            channels,
            health,
            alerts,
            store,
            request_seq: AtomicU64::new(0),
        }
    }

    /// Deliver a request under the given policy.
    pub async fn send(&self, request: SendRequest, policy: SendPolicy) -> DeliveryOutcome {
        let request_id = self.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.deliver(request_id, request, policy).await
    }

    #[instrument(
        skip_all,
        fields(
            request_id = request_id,
            kind = request.kind_name(),
            priority = ?policy.priority,
        )
    )]
    async fn deliver(
        &self,
        request_id: u64,
        request: SendRequest,
        policy: SendPolicy,
    ) -> DeliveryOutcome {
        let Ok(_permit) = self.in_flight.try_acquire() else {
            let rejection = SendError::QueueOverflow;
            warn!(limit = self.config.max_in_flight, "send rejected, in-flight ceiling reached");
            counters::send_rejected();
            self.alerts
                .report_error(
                    ErrorKind::QueueOverflow,
                    self.channels.primary().kind(),
                    &rejection.to_string(),
                )
                .await;
            return DeliveryOutcome::rejected(&rejection);
        };

        let started = Instant::now();
        let primary = self.channels.primary().clone();
        let fallback = if policy.fallback_allowed() {
            self.channels.fallback().cloned()
        } else {
            None
        };

        // Skip an unavailable primary only when another channel can take
        // the send; with no alternative the flagged channel is still tried.
        let skip_primary = fallback.is_some() && !self.health.is_available(primary.kind());

        let mut attempts = Vec::new();
        let mut fallback_used = false;
        let mut delivered = false;

        if skip_primary {
            info!(channel = %primary.kind(), "primary unavailable, going straight to fallback");
            counters::fallback_triggered("primary_unavailable");
        } else {
            let budget = policy.attempt_budget(&request, &self.config);
            let round = self.executor.execute(primary.as_ref(), &request, budget).await;
            delivered = round.succeeded();
            self.settle_round(&request, &round, false, policy.track_delivery)
                .await;
            attempts.extend(round.attempts);
        }

        if !delivered {
            if let Some(fallback_client) = fallback {
                if !skip_primary {
                    counters::fallback_triggered("primary_exhausted");
                }
                fallback_used = true;
                let converted = convert::to_fallback(&request, &self.config.reply_template);
                let budget = policy.fallback_budget(&self.config);
                let round = self
                    .executor
                    .execute(fallback_client.as_ref(), &converted, budget)
                    .await;
                self.settle_round(&converted, &round, true, policy.track_delivery)
                    .await;
                attempts.extend(round.attempts);
            }
        }

        let outcome = DeliveryOutcome::from_attempts(attempts, fallback_used);
        let latency_ms = started.elapsed().as_millis() as u64;

        if outcome.success {
            info!(
                channel = outcome.final_channel.map(|c| c.name()).unwrap_or("none"),
                retries = outcome.total_retries,
                fallback = outcome.fallback_used,
                latency_ms,
                "send delivered"
            );
        } else {
            error!(
                attempts = outcome.attempts.len(),
                fallback = outcome.fallback_used,
                latency_ms,
                "send failed on every channel"
            );
        }
        counters::send_completed(request.kind_name(), outcome.success, started.elapsed());

        outcome
    }

    /// Report every attempt of a finished round to health, alerting and
    /// the delivery log.
    async fn settle_round(
        &self,
        request: &SendRequest,
        round: &RetryRound,
        fallback: bool,
        track: bool,
    ) {
        for attempt in &round.attempts {
            if attempt.success {
                self.health.record_success(attempt.channel);
                self.alerts.report_channel_success(attempt.channel);
            } else {
                self.health.record_failure(attempt.channel);
                if let Some(kind) = attempt.error_kind {
                    let message = attempt.error_message.as_deref().unwrap_or("unknown error");
                    self.alerts
                        .report_error(kind, attempt.channel, message)
                        .await;
                    counters::attempt_error(attempt.channel.name(), kind.name());
                }
            }

            counters::attempt_recorded(attempt.channel.name(), attempt.success);
            if attempt.attempt > 1 {
                counters::retry_recorded(attempt.channel.name());
            }

            if track {
                self.store
                    .record(DeliveryRecord::from_attempt(request, attempt, fallback));
            }
        }
    }
}
