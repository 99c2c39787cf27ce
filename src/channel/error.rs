//! Send failure classification.
//!
//! Every failed attempt carries exactly one [`ErrorKind`], assigned at the
//! single point where the channel client classifies the failure. Retry
//! decisions, health accounting and threshold rules all match on this tag
//! instead of inspecting error text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed taxonomy of delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Recipient failed canonical-form validation
    InvalidPhone,
    /// Template unknown or rejected by the provider
    InvalidTemplate,
    /// Media URL malformed or unfetchable
    InvalidMediaUrl,
    /// Rendered text exceeds the channel length cap
    MessageTooLong,
    /// OTP code outside the accepted shape
    InvalidOtp,
    /// Credentials rejected by the provider
    AuthFailure,
    /// Attempt exceeded the per-call timeout
    Timeout,
    /// Provider-side failure
    ApiFailure,
    /// Connection-level failure before a response arrived
    NetworkError,
    /// Provider throttled the request
    RateLimited,
    /// Internal send capacity exceeded
    QueueOverflow,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::InvalidPhone,
        ErrorKind::InvalidTemplate,
        ErrorKind::InvalidMediaUrl,
        ErrorKind::MessageTooLong,
        ErrorKind::InvalidOtp,
        ErrorKind::AuthFailure,
        ErrorKind::Timeout,
        ErrorKind::ApiFailure,
        ErrorKind::NetworkError,
        ErrorKind::RateLimited,
        ErrorKind::QueueOverflow,
    ];

    /// Whether a failure of this kind may be retried on the same channel.
    ///
    /// Validation and auth failures are terminal: the same request will
    /// fail the same way, so the retry executor stops immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ApiFailure
                | ErrorKind::NetworkError
                | ErrorKind::RateLimited
        )
    }

    /// Whether this kind reflects a passing condition rather than a fault
    /// in the request itself. Transient windows are cleared when the
    /// channel delivers again; validation windows age out on their own.
    pub fn is_transient(self) -> bool {
        self.is_retryable() || self == ErrorKind::QueueOverflow
    }

    /// Stable label for logs and metric attributes.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::InvalidPhone => "invalid_phone",
            ErrorKind::InvalidTemplate => "invalid_template",
            ErrorKind::InvalidMediaUrl => "invalid_media_url",
            ErrorKind::MessageTooLong => "message_too_long",
            ErrorKind::InvalidOtp => "invalid_otp",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ApiFailure => "api_failure",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::QueueOverflow => "queue_overflow",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned by a single channel attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid media url: {0}")]
    InvalidMediaUrl(String),

    #[error("message too long: {0}")]
    MessageTooLong(String),

    #[error("invalid otp code: must be 4 to 8 digits")]
    InvalidOtp,

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("send capacity exceeded")]
    QueueOverflow,
}

impl SendError {
    /// The taxonomy tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::InvalidPhone(_) => ErrorKind::InvalidPhone,
            SendError::InvalidTemplate(_) => ErrorKind::InvalidTemplate,
            SendError::InvalidMediaUrl(_) => ErrorKind::InvalidMediaUrl,
            SendError::MessageTooLong(_) => ErrorKind::MessageTooLong,
            SendError::InvalidOtp => ErrorKind::InvalidOtp,
            SendError::Auth(_) => ErrorKind::AuthFailure,
            SendError::Timeout(_) => ErrorKind::Timeout,
            SendError::Api { .. } => ErrorKind::ApiFailure,
            SendError::Network(_) => ErrorKind::NetworkError,
            SendError::RateLimited => ErrorKind::RateLimited,
            SendError::QueueOverflow => ErrorKind::QueueOverflow,
        }
    }

    /// Whether the retry executor may try again after this error.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify a transport-level failure from the HTTP client.
    pub fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SendError::Timeout(timeout)
        } else if err.is_connect() {
            SendError::Network(format!("connection failed: {err}"))
        } else {
            SendError::Network(err.to_string())
        }
    }

    /// Classify a provider rejection from its HTTP status and the error
    /// code field of the response body, when present.
    ///
    /// Known provider codes map by exact match; unknown rejections fall
    /// back to status-based classification, with unmatched 4xx treated as
    /// a retryable provider failure rather than invented new kinds.
    pub fn from_provider(status: u16, code: Option<&str>, message: String) -> Self {
        match code {
            Some("invalid_recipient") | Some("invalid_phone") => SendError::InvalidPhone(message),
            Some("invalid_template") | Some("template_not_found") => {
                SendError::InvalidTemplate(message)
            }
            Some("invalid_media") | Some("media_download_failed") => {
                SendError::InvalidMediaUrl(message)
            }
            Some("message_too_long") => SendError::MessageTooLong(message),
            _ => match status {
                401 | 403 => SendError::Auth(message),
                429 => SendError::RateLimited,
                _ => SendError::Api { status, message },
            },
        }
    }
}
