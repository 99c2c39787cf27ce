//! OTEL metrics with a Prometheus exporter.
//!
//! Instruments are registered once against the global meter and recorded
//! through the free functions in [`counters`]. Recording before `init`
//! is a no-op, so library code never has to care whether metrics are up.

use anyhow::Result;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// OTEL metrics pipeline rendering to Prometheus text format.
pub struct Metrics {
    registry: Registry,
    meter_provider: SdkMeterProvider,
}

impl Metrics {
    /// Create the OTEL → Prometheus pipeline and register it globally.
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let exporter = exporter().with_registry(registry.clone()).build()?;

        let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

        opentelemetry::global::set_meter_provider(meter_provider.clone());

        info!("OTEL metrics configured with Prometheus exporter");

        Ok(Arc::new(Self {
            registry,
            meter_provider,
        }))
    }

    /// Get a meter for registering instruments.
    pub fn meter(&self, name: &'static str) -> opentelemetry::metrics::Meter {
        self.meter_provider.meter(name)
    }

    /// Render current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!(error = %e, "failed to shutdown meter provider");
        }
    }
}

/// Delivery daemon metrics with notifyd_* prefix.
pub mod counters {
    use opentelemetry::metrics::{Counter, Gauge, Histogram};
    use opentelemetry::KeyValue;
    use std::sync::OnceLock;
    use std::time::Duration;

    // ========================================================================
    // SEND METRICS
    // ========================================================================

    static SENDS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static SENDS_REJECTED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static SEND_DURATION: OnceLock<Histogram<f64>> = OnceLock::new();
    static ATTEMPTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ATTEMPT_ERRORS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static RETRIES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static FALLBACKS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ========================================================================
    // CHANNEL HEALTH METRICS
    // ========================================================================

    static CHANNEL_UP: OnceLock<Gauge<i64>> = OnceLock::new();
    static PROBES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ========================================================================
    // ALERT METRICS
    // ========================================================================

    static ALERTS_OPENED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ALERTS_RESOLVED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ALERTS_ACTIVE: OnceLock<Gauge<i64>> = OnceLock::new();
    static NOTIFICATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static NOTIFICATIONS_DROPPED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ========================================================================
    // STORE / SERVER METRICS
    // ========================================================================

    static STORE_RECORDS: OnceLock<Gauge<i64>> = OnceLock::new();
    static SERVER_INFO: OnceLock<Gauge<i64>> = OnceLock::new();
    static SERVER_START_TIME: OnceLock<Gauge<i64>> = OnceLock::new();

    /// Register all instruments.
    pub fn init(meter: &opentelemetry::metrics::Meter) {
        let _ = SENDS_TOTAL.set(
            meter
                .u64_counter("notifyd_sends_total")
                .with_description("Finished sends by request kind and result")
                .build(),
        );
        let _ = SENDS_REJECTED_TOTAL.set(
            meter
                .u64_counter("notifyd_sends_rejected_total")
                .with_description("Sends rejected at the in-flight ceiling")
                .build(),
        );
        let _ = SEND_DURATION.set(
            meter
                .f64_histogram("notifyd_send_duration_seconds")
                .with_description("End-to-end send duration including retries and fallback")
                .build(),
        );
        let _ = ATTEMPTS_TOTAL.set(
            meter
                .u64_counter("notifyd_attempts_total")
                .with_description("Delivery attempts by channel and result")
                .build(),
        );
        let _ = ATTEMPT_ERRORS_TOTAL.set(
            meter
                .u64_counter("notifyd_attempt_errors_total")
                .with_description("Failed attempts by channel and error kind")
                .build(),
        );
        let _ = RETRIES_TOTAL.set(
            meter
                .u64_counter("notifyd_retries_total")
                .with_description("Attempts past the first, by channel")
                .build(),
        );
        let _ = FALLBACKS_TOTAL.set(
            meter
                .u64_counter("notifyd_fallbacks_total")
                .with_description("Fallback rounds by trigger reason")
                .build(),
        );

        let _ = CHANNEL_UP.set(
            meter
                .i64_gauge("notifyd_channel_up")
                .with_description("Channel availability (1=available, 0=unavailable)")
                .build(),
        );
        let _ = PROBES_TOTAL.set(
            meter
                .u64_counter("notifyd_probes_total")
                .with_description("Health probe results by channel")
                .build(),
        );

        let _ = ALERTS_OPENED_TOTAL.set(
            meter
                .u64_counter("notifyd_alerts_opened_total")
                .with_description("Alerts opened by error kind and severity")
                .build(),
        );
        let _ = ALERTS_RESOLVED_TOTAL.set(
            meter
                .u64_counter("notifyd_alerts_resolved_total")
                .with_description("Alerts resolved by error kind and mode")
                .build(),
        );
        let _ = ALERTS_ACTIVE.set(
            meter
                .i64_gauge("notifyd_alerts_active")
                .with_description("Currently open alerts")
                .build(),
        );
        let _ = NOTIFICATIONS_TOTAL.set(
            meter
                .u64_counter("notifyd_notifications_total")
                .with_description("Alert notification deliveries by notifier and result")
                .build(),
        );
        let _ = NOTIFICATIONS_DROPPED_TOTAL.set(
            meter
                .u64_counter("notifyd_notifications_dropped_total")
                .with_description("Alert events dropped because the queue was full")
                .build(),
        );

        let _ = STORE_RECORDS.set(
            meter
                .i64_gauge("notifyd_store_records")
                .with_description("Delivery records currently held")
                .build(),
        );
        let _ = SERVER_INFO.set(
            meter
                .i64_gauge("notifyd_server_info")
                .with_description("Server build information")
                .build(),
        );
        let _ = SERVER_START_TIME.set(
            meter
                .i64_gauge("notifyd_server_start_time_seconds")
                .with_description("Unix time the server started")
                .build(),
        );

        if let Some(g) = SERVER_INFO.get() {
            g.record(1, &[KeyValue::new("version", env!("CARGO_PKG_VERSION"))]);
        }
        if let Some(g) = SERVER_START_TIME.get() {
            g.record(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|t| t.as_secs() as i64)
                    .unwrap_or(0),
                &[],
            );
        }
    }

    // ========================================================================
    // SEND RECORDING FUNCTIONS
    // ========================================================================

    pub fn send_completed(kind: &str, success: bool, elapsed: Duration) {
        let result = if success { "delivered" } else { "failed" };
        if let Some(c) = SENDS_TOTAL.get() {
            c.add(1, &[kv("kind", kind), kv("result", result)]);
        }
        if let Some(h) = SEND_DURATION.get() {
            h.record(elapsed.as_secs_f64(), &[kv("kind", kind)]);
        }
    }

    pub fn send_rejected() {
        if let Some(c) = SENDS_REJECTED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    pub fn attempt_recorded(channel: &str, success: bool) {
        if let Some(c) = ATTEMPTS_TOTAL.get() {
            c.add(
                1,
                &[
                    kv("channel", channel),
                    kv("result", if success { "success" } else { "failure" }),
                ],
            );
        }
    }

    pub fn attempt_error(channel: &str, error_kind: &str) {
        if let Some(c) = ATTEMPT_ERRORS_TOTAL.get() {
            c.add(1, &[kv("channel", channel), kv("error_kind", error_kind)]);
        }
    }

    pub fn retry_recorded(channel: &str) {
        if let Some(c) = RETRIES_TOTAL.get() {
            c.add(1, &[kv("channel", channel)]);
        }
    }

    pub fn fallback_triggered(reason: &str) {
        if let Some(c) = FALLBACKS_TOTAL.get() {
            c.add(1, &[kv("reason", reason)]);
        }
    }

    // ========================================================================
    // CHANNEL HEALTH RECORDING FUNCTIONS
    // ========================================================================

    pub fn channel_availability(channel: &str, available: bool) {
        if let Some(g) = CHANNEL_UP.get() {
            g.record(if available { 1 } else { 0 }, &[kv("channel", channel)]);
        }
    }

    pub fn probe_recorded(channel: &str, success: bool) {
        if let Some(c) = PROBES_TOTAL.get() {
            c.add(
                1,
                &[
                    kv("channel", channel),
                    kv("result", if success { "success" } else { "failure" }),
                ],
            );
        }
    }

    // ========================================================================
    // ALERT RECORDING FUNCTIONS
    // ========================================================================

    pub fn alert_opened(error_kind: &str, severity: &str) {
        if let Some(c) = ALERTS_OPENED_TOTAL.get() {
            c.add(1, &[kv("error_kind", error_kind), kv("severity", severity)]);
        }
    }

    pub fn alert_resolved(error_kind: &str, mode: &str) {
        if let Some(c) = ALERTS_RESOLVED_TOTAL.get() {
            c.add(1, &[kv("error_kind", error_kind), kv("mode", mode)]);
        }
    }

    pub fn alerts_active_set(count: i64) {
        if let Some(g) = ALERTS_ACTIVE.get() {
            g.record(count, &[]);
        }
    }

    pub fn notification_sent(notifier: &str) {
        if let Some(c) = NOTIFICATIONS_TOTAL.get() {
            c.add(1, &[kv("notifier", notifier), kv("result", "success")]);
        }
    }

    pub fn notification_failed(notifier: &str) {
        if let Some(c) = NOTIFICATIONS_TOTAL.get() {
            c.add(1, &[kv("notifier", notifier), kv("result", "failure")]);
        }
    }

    pub fn notification_dropped() {
        if let Some(c) = NOTIFICATIONS_DROPPED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    // ========================================================================
    // STORE RECORDING FUNCTIONS
    // ========================================================================

    pub fn store_records_set(count: i64) {
        if let Some(g) = STORE_RECORDS.get() {
            g.record(count, &[]);
        }
    }

    fn kv(key: &'static str, value: &str) -> KeyValue {
        KeyValue::new(key, value.to_string())
    }
}
