//! Mock channel client.
//!
//! Serves configured responses without any network traffic. Used for
//! local development, integration tests and dry runs. Requests still go
//! through the shared validation path, so terminal errors behave exactly
//! like the real clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ChannelConfig, MockConfig, MockResponse};
use crate::delivery::SendRequest;

use super::{validate_request, ChannelClient, ChannelKind, ErrorKind, ProviderResponse, SendError};

/// In-process stand-in for a provider API.
pub struct MockClient {
    name: String,
    kind: ChannelKind,
    response: MockResponse,
    latency: Duration,
    max_text_length: usize,
    probe_ok: AtomicBool,
    scripted: Mutex<VecDeque<ErrorKind>>,
    sends: AtomicU64,
    failures: AtomicU64,
    probes: AtomicU64,
}

impl MockClient {
    pub fn from_config(channel: &ChannelConfig, mock: &MockConfig) -> Self {
        Self {
            name: channel.name.clone(),
            kind: channel.kind,
            response: mock.response.clone(),
            latency: mock.latency,
            max_text_length: channel.max_text_length(),
            probe_ok: AtomicBool::new(true),
            scripted: Mutex::new(VecDeque::new()),
            sends: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        }
    }

    /// Mock that accepts everything.
    pub fn success(kind: ChannelKind) -> Self {
        Self::with_response(kind, MockResponse::Success)
    }

    /// Mock that fails every send with the given kind.
    pub fn failing(kind: ChannelKind, error: ErrorKind) -> Self {
        Self::with_response(kind, MockResponse::Error { kind: error })
    }

    /// Mock that fails a deterministic fraction of sends.
    pub fn random(kind: ChannelKind, error_rate: f32) -> Self {
        Self::with_response(kind, MockResponse::Random { error_rate })
    }

    fn with_response(kind: ChannelKind, response: MockResponse) -> Self {
        Self {
            name: kind.name().to_string(),
            kind,
            response,
            latency: Duration::ZERO,
            max_text_length: kind.default_max_text_length(),
            probe_ok: AtomicBool::new(true),
            scripted: Mutex::new(VecDeque::new()),
            sends: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        }
    }

    /// Add simulated latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script the next `n` sends to fail with `error`, then revert to the
    /// configured response.
    pub fn fail_next(&self, n: usize, error: ErrorKind) {
        let mut scripted = self.scripted.lock().unwrap();
        for _ in 0..n {
            scripted.push_back(error);
        }
    }

    /// Script the probe outcome.
    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::Relaxed);
    }

    /// Total send attempts observed.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    /// Failed send attempts observed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Probe calls observed.
    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    fn synthesize(&self, kind: ErrorKind) -> SendError {
        match kind {
            ErrorKind::InvalidPhone => SendError::InvalidPhone("mock rejection".into()),
            ErrorKind::InvalidTemplate => SendError::InvalidTemplate("mock rejection".into()),
            ErrorKind::InvalidMediaUrl => SendError::InvalidMediaUrl("mock rejection".into()),
            ErrorKind::MessageTooLong => SendError::MessageTooLong("mock rejection".into()),
            ErrorKind::InvalidOtp => SendError::InvalidOtp,
            ErrorKind::AuthFailure => SendError::Auth("mock rejection".into()),
            ErrorKind::Timeout => SendError::Timeout(self.latency.max(Duration::from_millis(1))),
            ErrorKind::ApiFailure => SendError::Api {
                status: 503,
                message: "mock provider failure".into(),
            },
            ErrorKind::NetworkError => SendError::Network("mock connection failure".into()),
            ErrorKind::RateLimited => SendError::RateLimited,
            ErrorKind::QueueOverflow => SendError::QueueOverflow,
        }
    }
}

#[async_trait]
impl ChannelClient for MockClient {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderResponse, SendError> {
        validate_request(request, self.max_text_length)?;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let seq = self.sends.fetch_add(1, Ordering::Relaxed) + 1;

        let scripted = self.scripted.lock().unwrap().pop_front();
        if let Some(kind) = scripted {
            self.failures.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %self.name, error = %kind, "mock scripted failure");
            return Err(self.synthesize(kind));
        }

        match &self.response {
            MockResponse::Success => Ok(ProviderResponse {
                message_id: format!("mock-{}-{:06}", self.name, seq),
            }),
            MockResponse::Error { kind } => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(self.synthesize(*kind))
            }
            MockResponse::Random { error_rate } => {
                // Deterministic pseudo-random: spread failures across the
                // call sequence proportionally to the rate.
                let fail = (seq % 100) < (*error_rate * 100.0) as u64;
                if fail {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    Err(self.synthesize(ErrorKind::ApiFailure))
                } else {
                    Ok(ProviderResponse {
                        message_id: format!("mock-{}-{:06}", self.name, seq),
                    })
                }
            }
        }
    }

    async fn probe(&self) -> Result<(), SendError> {
        self.probes.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        // A mock configured to fail every send is treated as a down
        // provider; random flakiness keeps the account status healthy.
        let down = !self.probe_ok.load(Ordering::Relaxed)
            || matches!(&self.response, MockResponse::Error { kind } if kind.is_retryable());
        if down {
            Err(SendError::Api {
                status: 503,
                message: "mock probe failure".into(),
            })
        } else {
            Ok(())
        }
    }
}
