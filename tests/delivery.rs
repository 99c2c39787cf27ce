//! End-to-end delivery pipeline tests
//!
//! Drives the orchestrator, health monitor, alert engine and delivery log
//! wired together the way the daemon wires them, using mock channels
//!
//! Run with: cargo test --test delivery

use std::sync::Arc;
use std::time::Duration;

use notifyd::alert::{AlertEngine, LogNotifier, Severity};
use notifyd::bootstrap::{AppState, Shutdown};
use notifyd::channel::{ChannelKind, Channels, ErrorKind, HealthMonitor, MockClient, SharedClient};
use notifyd::config::Config;
use notifyd::delivery::{MediaKind, Orchestrator, SendPolicy, SendRequest};
use notifyd::store::{InMemoryStore, SharedStore};

fn failing_primary_yaml() -> &'static str {
    r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response:
        error:
          kind: api_failure
  - name: sms
    kind: sms
    mock:
      response: success

delivery:
  primary: whatsapp
  fallback: sms
  base_delay: 2ms
  max_delay: 10ms
  reply_template: order_reply
"#
}

fn both_failing_yaml() -> &'static str {
    r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response:
        error:
          kind: api_failure
  - name: sms
    kind: sms
    mock:
      response:
        error:
          kind: api_failure

delivery:
  primary: whatsapp
  fallback: sms
  base_delay: 2ms
  max_delay: 10ms
"#
}

fn capped_store_yaml() -> &'static str {
    r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response: success
  - name: sms
    kind: sms
    mock:
      response: success

delivery:
  primary: whatsapp
  fallback: sms
  base_delay: 2ms
  max_delay: 10ms

settings:
  store_capacity: 2
"#
}

fn app(yaml: &str) -> AppState {
    let config = Arc::new(Config::from_yaml(yaml).unwrap());
    AppState::new(config, Shutdown::new(Duration::from_secs(5))).unwrap()
}

fn text(template: &str) -> SendRequest {
    SendRequest::text(vec!["9876543210".to_string()], template, vec![], "91").unwrap()
}

/// Orchestrator wired from config sections but with scriptable mock
/// clients, for scenarios that flip behavior mid-test.
struct Pipeline {
    orchestrator: Orchestrator,
    primary: Arc<MockClient>,
    health: Arc<HealthMonitor>,
    alerts: Arc<AlertEngine>,
}

fn pipeline(yaml: &str) -> Pipeline {
    let config = Config::from_yaml(yaml).unwrap();

    let primary = Arc::new(MockClient::success(ChannelKind::Whatsapp));
    let fallback = Arc::new(MockClient::success(ChannelKind::Sms));
    let clients: Vec<SharedClient> = vec![primary.clone(), fallback.clone()];
    let channels = Arc::new(Channels::new(
        clients.clone(),
        primary.clone(),
        Some(fallback),
    ));

    let health = Arc::new(HealthMonitor::new(&clients, &config.health_check));
    let alerts = Arc::new(AlertEngine::new(
        config.alerts.clone(),
        vec![Box::new(LogNotifier)],
    ));
    let store: SharedStore = Arc::new(InMemoryStore::new(config.settings.store_capacity));

    let orchestrator = Orchestrator::new(channels, health.clone(), alerts.clone(), store, &config);
    Pipeline {
        orchestrator,
        primary,
        health,
        alerts,
    }
}

/// A high live-failure threshold keeps the primary in rotation while
/// scripted failures accumulate toward an alert.
fn pipeline_yaml(quiet_period: &str) -> String {
    format!(
        r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response: success
  - name: sms
    kind: sms
    mock:
      response: success

delivery:
  primary: whatsapp
  fallback: sms
  base_delay: 2ms
  max_delay: 10ms

health_check:
  interval: 1h
  timeout: 200ms
  failure_threshold: 10

alerts:
  quiet_period: {quiet_period}
"#
    )
}

#[tokio::test]
async fn test_otp_on_healthy_primary_delivers_first_try() {
    let p = pipeline(&pipeline_yaml("10m"));
    let request = SendRequest::otp("9876543210", "login_otp", "482913", "91").unwrap();

    let outcome = p.orchestrator.send(request, SendPolicy::default()).await;

    assert!(outcome.success);
    assert_eq!(outcome.final_channel, Some(ChannelKind::Whatsapp));
    assert!(!outcome.fallback_used);
    assert_eq!(outcome.total_retries, 0);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(p.primary.sends(), 1);
}

#[tokio::test]
async fn test_media_send_degrades_to_sms() {
    let app = app(failing_primary_yaml());
    let request = SendRequest::media(
        vec!["+91 98765 43210".to_string()],
        "promo",
        vec!["Asha".to_string()],
        MediaKind::Image,
        "https://cdn.example.com/offer.png",
        "91",
    )
    .unwrap();

    let outcome = app.orchestrator.send(request, SendPolicy::default()).await;

    assert!(outcome.success);
    assert!(outcome.fallback_used);
    assert_eq!(outcome.final_channel, Some(ChannelKind::Sms));
    assert_eq!(outcome.total_retries, 3);
    assert_eq!(outcome.attempts.len(), 4);

    // One record per attempt, most recent first; the fallback record
    // carries the converted plain-text form of the media send.
    let records = app.store.recent(10);
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].channel, ChannelKind::Sms);
    assert!(records[0].success);
    assert!(records[0].fallback);
    assert_eq!(records[0].request_kind, "text");
    assert_eq!(records[0].template.as_deref(), Some("promo"));
    assert_eq!(records[1].channel, ChannelKind::Whatsapp);
    assert_eq!(records[1].request_kind, "media");
    assert_eq!(records[1].error_kind, Some(ErrorKind::ApiFailure));
}

#[tokio::test]
async fn test_reply_fallback_uses_configured_template() {
    let app = app(failing_primary_yaml());
    let request = SendRequest::reply("9876543210", "your order shipped", "91").unwrap();

    let outcome = app.orchestrator.send(request, SendPolicy::default()).await;

    assert!(outcome.success);
    assert!(outcome.fallback_used);

    // Primary attempts keep the reply shape; the fallback goes out as a
    // plain template send using the configured reply template.
    let records = app.store.recent(10);
    assert_eq!(records[0].request_kind, "text");
    assert_eq!(records[0].template.as_deref(), Some("order_reply"));
    assert_eq!(records[1].request_kind, "reply");
    assert!(records[1].template.is_none());
}

#[tokio::test]
async fn test_otp_degrades_with_reduced_budget() {
    let app = app(failing_primary_yaml());
    let request = SendRequest::otp("9876543210", "login_otp", "482913", "91").unwrap();

    let outcome = app.orchestrator.send(request, SendPolicy::default()).await;

    assert!(outcome.success);
    assert!(outcome.fallback_used);
    assert_eq!(outcome.final_channel, Some(ChannelKind::Sms));
    assert_eq!(outcome.total_retries, 2);
    assert_eq!(outcome.attempts.len(), 3);

    let records = app.store.recent(10);
    assert_eq!(records[0].request_kind, "text");
    assert_eq!(records[0].template.as_deref(), Some("login_otp"));
}

#[tokio::test]
async fn test_exhausted_channels_report_every_error() {
    let app = app(both_failing_yaml());

    let outcome = app.orchestrator.send(text("welcome"), SendPolicy::default()).await;

    assert!(!outcome.success);
    assert!(outcome.fallback_used);
    assert_eq!(outcome.final_channel, Some(ChannelKind::Sms));
    assert_eq!(outcome.attempts.len(), 5);
    assert_eq!(outcome.errors.len(), 5);
    assert!(outcome.errors[0].starts_with("whatsapp attempt 1:"));
    assert!(outcome.errors[4].starts_with("sms attempt 2:"));

    // Three consecutive failures flag the primary; the fallback's two
    // stay under the threshold
    assert!(!app.health.is_available(ChannelKind::Whatsapp));
    assert!(app.health.is_available(ChannelKind::Sms));

    let stats = app.store.stats();
    assert_eq!(stats.failed, 5);
    assert_eq!(stats.delivered, 0);
    // Both fallback attempts counted, and failures land on the right channel
    assert_eq!(stats.fallbacks, 2);
    assert_eq!(stats.by_channel["whatsapp"].failed, 3);
    assert_eq!(stats.by_channel["sms"].failed, 2);

    // Both windows are open but neither reached the api failure threshold
    assert!(app.alerts.active_alerts().is_empty());
    assert_eq!(app.alerts.stats().open_windows, 2);
}

#[tokio::test]
async fn test_store_capacity_from_settings() {
    let app = app(capped_store_yaml());

    for _ in 0..3 {
        let outcome = app.orchestrator.send(text("welcome"), SendPolicy::default()).await;
        assert!(outcome.success);
    }

    assert_eq!(app.store.len(), 2);
    let stats = app.store.stats();
    assert_eq!(stats.records, 2);
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.evicted, 1);

    let records = app.store.recent(10);
    assert!(records[0].id.as_u64() > records[1].id.as_u64());
}

#[tokio::test]
async fn test_probe_outage_diverts_sends_until_recovery() {
    let p = pipeline(&pipeline_yaml("10m"));

    p.primary.set_probe_ok(false);
    p.health.force_check().await;
    assert!(!p.health.is_available(ChannelKind::Whatsapp));

    // Sends go straight to the fallback without touching the primary
    let outcome = p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert!(outcome.success);
    assert!(outcome.fallback_used);
    assert_eq!(outcome.final_channel, Some(ChannelKind::Sms));
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(p.primary.sends(), 0);

    // A clean probe restores the primary for the next send
    p.primary.set_probe_ok(true);
    p.health.force_check().await;
    assert!(p.health.is_available(ChannelKind::Whatsapp));

    let outcome = p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert_eq!(outcome.final_channel, Some(ChannelKind::Whatsapp));
    assert!(!outcome.fallback_used);
    assert_eq!(p.primary.sends(), 1);
}

#[tokio::test]
async fn test_rate_limit_burst_opens_high_alert() {
    let p = pipeline(&pipeline_yaml("10m"));
    p.primary.fail_next(5, ErrorKind::RateLimited);

    // The first send burns three scripted failures, lands on the
    // fallback, and leaves the window below the threshold
    let first = p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert!(first.success);
    assert!(first.fallback_used);
    assert!(p.alerts.active_alerts().is_empty());

    // The next send crosses five rate-limit errors inside the window,
    // then recovers on its third attempt
    let second = p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert!(second.success);
    assert!(!second.fallback_used);
    assert_eq!(second.total_retries, 2);

    let alerts = p.alerts.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].error_kind, ErrorKind::RateLimited);
    assert_eq!(alerts[0].channel, ChannelKind::Whatsapp);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].occurrence_count, 5);

    // The delivery that followed cleared the rate-limit window, but the
    // alert stands until the condition goes quiet
    let stats = p.alerts.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.open_windows, 0);
}

#[tokio::test]
async fn test_manual_resolve_reopens_while_errors_continue() {
    let p = pipeline(&pipeline_yaml("10m"));

    p.primary.fail_next(1, ErrorKind::AuthFailure);
    let outcome = p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert!(outcome.success);
    assert!(outcome.fallback_used);
    // Terminal error: one primary attempt, straight to fallback
    assert_eq!(outcome.attempts.len(), 2);

    let open = p.alerts.active_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].occurrence_count, 1);

    let resolved = p.alerts.resolve(open[0].id, "oncall").unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("oncall"));
    assert!(p.alerts.active_alerts().is_empty());

    // The condition is still live, so the next failure opens a fresh
    // alert carrying the full window count
    p.primary.fail_next(1, ErrorKind::AuthFailure);
    p.orchestrator.send(text("welcome"), SendPolicy::default()).await;

    let reopened = p.alerts.active_alerts();
    assert_eq!(reopened.len(), 1);
    assert_ne!(reopened[0].id, open[0].id);
    assert_eq!(reopened[0].occurrence_count, 2);
    assert_eq!(p.alerts.all_alerts().len(), 2);
}

#[tokio::test]
async fn test_quiet_alert_auto_resolves_on_sweep() {
    let p = pipeline(&pipeline_yaml("200ms"));

    p.primary.fail_next(1, ErrorKind::AuthFailure);
    p.orchestrator.send(text("welcome"), SendPolicy::default()).await;
    assert_eq!(p.alerts.active_alerts().len(), 1);

    // Not quiet yet
    p.alerts.sweep();
    assert_eq!(p.alerts.active_alerts().len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    p.alerts.sweep();

    assert!(p.alerts.active_alerts().is_empty());
    let all = p.alerts.all_alerts();
    assert_eq!(all.len(), 1);
    assert!(all[0].resolved);
    assert_eq!(all[0].resolved_by.as_deref(), Some("auto"));

    let stats = p.alerts.stats();
    assert_eq!(stats.opened_total, 1);
    assert_eq!(stats.resolved_total, 1);
}
