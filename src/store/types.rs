//! Delivery record types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::{ChannelKind, ErrorKind};
use crate::delivery::{AttemptResult, SendRequest};

/// Unique identifier for a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordId(u64);

static RECORD_COUNTER: AtomicU64 = AtomicU64::new(0);

impl RecordId {
    /// Allocate the next record ID.
    pub fn next() -> Self {
        Self(RECORD_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec_{}", self.0)
    }
}

/// One delivery attempt as written to the log.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    /// Record ID
    pub id: RecordId,

    /// Kind of send ("text", "media", "otp", "reply")
    pub request_kind: String,

    /// Channel the attempt ran on
    pub channel: ChannelKind,

    /// Attempt number within its round, 1-based
    pub attempt: u32,

    /// Number of recipients addressed
    pub recipients: usize,

    /// Template the message used, when it had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Whether the provider accepted the message
    pub success: bool,

    /// Provider message ID on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,

    /// Error taxonomy entry on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Error detail on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Attempt latency in milliseconds
    pub latency_ms: u64,

    /// Whether this attempt ran on the fallback channel
    pub fallback: bool,

    /// When the attempt finished
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Build a record from a finished attempt.
    pub fn from_attempt(request: &SendRequest, attempt: &AttemptResult, fallback: bool) -> Self {
        Self {
            id: RecordId::next(),
            request_kind: request.kind_name().to_string(),
            channel: attempt.channel,
            attempt: attempt.attempt,
            recipients: request.recipients().len(),
            template: request.template().map(str::to_string),
            success: attempt.success,
            provider_message_id: attempt.provider_message_id.clone(),
            error_kind: attempt.error_kind,
            error_message: attempt.error_message.clone(),
            latency_ms: attempt.latency_ms,
            fallback,
            recorded_at: Utc::now(),
        }
    }
}

/// Query filter for delivery records.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Filter by channel
    pub channel: Option<ChannelKind>,

    /// Filter by outcome
    pub success: Option<bool>,

    /// Filter by error kind
    pub error_kind: Option<ErrorKind>,

    /// Maximum number of results
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every set filter.
    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        if let Some(channel) = self.channel {
            if record.channel != channel {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if let Some(kind) = self.error_kind {
            if record.error_kind != Some(kind) {
                return false;
            }
        }
        true
    }
}

/// Delivery log statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Records currently held
    pub records: u64,

    /// Configured capacity
    pub capacity: u64,

    /// Successful attempts recorded over the store's lifetime
    pub delivered: u64,

    /// Failed attempts recorded over the store's lifetime
    pub failed: u64,

    /// Attempts recorded on the fallback channel over the store's lifetime
    pub fallbacks: u64,

    /// Records evicted to stay within capacity
    pub evicted: u64,

    /// Lifetime delivered/failed tallies broken down by channel
    pub by_channel: BTreeMap<String, ChannelTally>,
}

/// Delivered/failed counts for one channel.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelTally {
    pub delivered: u64,
    pub failed: u64,
}
