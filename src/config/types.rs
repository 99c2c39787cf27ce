use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::channel::{ChannelKind, ErrorKind};

/// Root configuration for notifyd
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Delivery channels (providers)
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// Delivery policy defaults (primary/fallback, retry budgets, backoff)
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Channel health probing
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Error thresholding and alert lifecycle
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Channel (provider) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channel name (for logging/metrics and delivery.primary/fallback)
    pub name: String,

    /// Channel kind
    pub kind: ChannelKind,

    /// Provider API base URL
    #[serde(default)]
    pub api_url: String,

    /// Provider API key (bearer token)
    #[serde(default)]
    pub api_key: String,

    /// Registered sender id, where the provider requires one
    pub sender_id: Option<String>,

    /// Per-attempt request timeout
    #[serde(default = "default_channel_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum rendered text length. Defaults by kind when unset.
    pub max_text_length: Option<usize>,

    /// Mock mode - serve configured responses without network calls
    #[serde(default)]
    pub mock: Option<MockConfig>,
}

impl ChannelConfig {
    /// Effective text length cap for this channel.
    pub fn max_text_length(&self) -> usize {
        self.max_text_length
            .unwrap_or_else(|| self.kind.default_max_text_length())
    }
}

fn default_channel_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Mock response configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Response type
    #[serde(default)]
    pub response: MockResponse,

    /// Simulated latency
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
}

/// Mock response type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockResponse {
    #[default]
    Success,
    Error { kind: ErrorKind },
    Random { error_rate: f32 },
}

/// Delivery policy defaults
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Primary channel name
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Fallback channel name (None disables fallback entirely)
    pub fallback: Option<String>,

    /// Retry budget for normal sends
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Reduced retry budget for OTP sends (latency-sensitive)
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: u32,

    /// Retry budget for urgent-priority sends
    #[serde(default = "default_urgent_max_attempts")]
    pub urgent_max_attempts: u32,

    /// Retry budget for the fallback round
    #[serde(default = "default_fallback_max_attempts")]
    pub fallback_max_attempts: u32,

    /// Concurrent in-flight send ceiling; excess is rejected immediately
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Base backoff delay (doubles per retry)
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Backoff ceiling
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Country code stripped during phone canonicalization
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Template used when converting a reply to the fallback channel
    #[serde(default = "default_reply_template")]
    pub reply_template: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: None,
            max_attempts: default_max_attempts(),
            otp_max_attempts: default_otp_max_attempts(),
            urgent_max_attempts: default_urgent_max_attempts(),
            fallback_max_attempts: default_fallback_max_attempts(),
            max_in_flight: default_max_in_flight(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            country_code: default_country_code(),
            reply_template: default_reply_template(),
        }
    }
}

fn default_primary() -> String {
    "whatsapp".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_otp_max_attempts() -> u32 {
    2
}

fn default_urgent_max_attempts() -> u32 {
    1
}

fn default_fallback_max_attempts() -> u32 {
    2
}

fn default_max_in_flight() -> usize {
    256
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_country_code() -> String {
    "91".to_string()
}

fn default_reply_template() -> String {
    "generic_reply".to_string()
}

/// Health check configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Probe interval
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Probe timeout
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive live-send failures before a channel is flagged unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_health_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_threshold() -> u32 {
    3
}

/// Alert engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Quiet period after which an open alert auto-resolves
    #[serde(default = "default_quiet_period", with = "humantime_serde")]
    pub quiet_period: Duration,

    /// Sweep interval (auto-resolution and window eviction)
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Error windows are evicted once idle this long
    #[serde(default = "default_window_retention", with = "humantime_serde")]
    pub window_retention: Duration,

    /// Webhook notified on alert transitions (None = log only)
    pub webhook_url: Option<String>,

    /// Webhook request timeout
    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub webhook_timeout: Duration,

    /// Buffered notification queue size for non-critical severities
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            quiet_period: default_quiet_period(),
            sweep_interval: default_sweep_interval(),
            window_retention: default_window_retention(),
            webhook_url: None,
            webhook_timeout: default_webhook_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_quiet_period() -> Duration {
    Duration::from_secs(600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_window_retention() -> Duration {
    Duration::from_secs(1800)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_buffer_size() -> usize {
    256
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// HTTP API address
    #[serde(default = "default_admin_address")]
    pub address: SocketAddr,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: default_admin_address(),
        }
    }
}

fn default_admin_address() -> SocketAddr {
    "0.0.0.0:9090".parse().unwrap()
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Enable structured JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for distributed tracing
    pub otlp_endpoint: Option<String>,

    /// Trace sample rate (0.0 - 1.0)
    #[serde(default = "default_sample_rate")]
    pub trace_sample_rate: f64,

    /// Shutdown configuration
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Delivery log capacity (oldest records evicted beyond this)
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,

    /// Delivery records older than this are pruned during maintenance
    #[serde(default = "default_record_retention", with = "humantime_serde")]
    pub record_retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: default_log_level(),
            otlp_endpoint: None,
            trace_sample_rate: default_sample_rate(),
            shutdown: ShutdownConfig::default(),
            store_capacity: default_store_capacity(),
            record_retention: default_record_retention(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_store_capacity() -> usize {
    10_000
}

fn default_record_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Shutdown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight sends to drain
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Max time for the entire shutdown sequence
    #[serde(default = "default_parent_shutdown_timeout", with = "humantime_serde")]
    pub parent_shutdown_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            parent_shutdown_timeout: default_parent_shutdown_timeout(),
        }
    }
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_parent_shutdown_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
