//! Send requests, policies and outcomes.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ErrorKind, SendError};
use crate::config::DeliveryConfig;

/// Media kinds the rich channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }
}

/// Strip separators and dialing prefixes down to the canonical local form.
///
/// Keeps digits only, then removes one leading zero or the configured
/// country code when the remainder is a ten digit local number. Anything
/// else passes through unchanged for the channel client to reject.
pub fn canonicalize_phone(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if !country_code.is_empty()
        && digits.len() == 10 + country_code.len()
        && digits.starts_with(country_code)
    {
        return digits[country_code.len()..].to_string();
    }
    if digits.len() == 11 && digits.starts_with('0') {
        return digits[1..].to_string();
    }
    digits
}

/// Whether a phone number is in canonical local form: exactly ten digits.
pub fn is_canonical_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.chars().all(|c| c.is_ascii_digit())
}

/// A logical notification to deliver.
///
/// Recipients are canonicalized at construction; whether the canonical
/// form is acceptable is decided by the channel client, so a malformed
/// number surfaces as a terminal attempt error rather than a panic or a
/// silent drop.
#[derive(Debug, Clone, PartialEq)]
pub enum SendRequest {
    /// Template message with substitution parameters
    Text {
        recipients: Vec<String>,
        template: String,
        parameters: Vec<String>,
    },
    /// Template message with a media attachment
    Media {
        recipients: Vec<String>,
        template: String,
        parameters: Vec<String>,
        media_kind: MediaKind,
        media_url: String,
    },
    /// One-time password to a single recipient
    Otp {
        recipient: String,
        template: String,
        code: String,
    },
    /// Free-form reply within an open conversation
    Reply { recipient: String, text: String },
}

impl SendRequest {
    pub fn text(
        recipients: Vec<String>,
        template: impl Into<String>,
        parameters: Vec<String>,
        country_code: &str,
    ) -> Result<Self, SendError> {
        Ok(SendRequest::Text {
            recipients: canonicalize_all(recipients, country_code)?,
            template: template.into(),
            parameters,
        })
    }

    pub fn media(
        recipients: Vec<String>,
        template: impl Into<String>,
        parameters: Vec<String>,
        media_kind: MediaKind,
        media_url: impl Into<String>,
        country_code: &str,
    ) -> Result<Self, SendError> {
        Ok(SendRequest::Media {
            recipients: canonicalize_all(recipients, country_code)?,
            template: template.into(),
            parameters,
            media_kind,
            media_url: media_url.into(),
        })
    }

    pub fn otp(
        recipient: &str,
        template: impl Into<String>,
        code: impl Into<String>,
        country_code: &str,
    ) -> Result<Self, SendError> {
        Ok(SendRequest::Otp {
            recipient: canonicalize_phone(recipient, country_code),
            template: template.into(),
            code: code.into(),
        })
    }

    pub fn reply(
        recipient: &str,
        text: impl Into<String>,
        country_code: &str,
    ) -> Result<Self, SendError> {
        Ok(SendRequest::Reply {
            recipient: canonicalize_phone(recipient, country_code),
            text: text.into(),
        })
    }

    /// All recipients of this request.
    pub fn recipients(&self) -> &[String] {
        match self {
            SendRequest::Text { recipients, .. } | SendRequest::Media { recipients, .. } => {
                recipients
            }
            SendRequest::Otp { recipient, .. } | SendRequest::Reply { recipient, .. } => {
                std::slice::from_ref(recipient)
            }
        }
    }

    /// Template name, when the request carries one.
    pub fn template(&self) -> Option<&str> {
        match self {
            SendRequest::Text { template, .. }
            | SendRequest::Media { template, .. }
            | SendRequest::Otp { template, .. } => Some(template),
            SendRequest::Reply { .. } => None,
        }
    }

    /// Stable label for logs and metric attributes.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SendRequest::Text { .. } => "text",
            SendRequest::Media { .. } => "media",
            SendRequest::Otp { .. } => "otp",
            SendRequest::Reply { .. } => "reply",
        }
    }
}

fn canonicalize_all(
    recipients: Vec<String>,
    country_code: &str,
) -> Result<Vec<String>, SendError> {
    if recipients.is_empty() {
        return Err(SendError::InvalidPhone("recipient list is empty".into()));
    }
    Ok(recipients
        .iter()
        .map(|r| canonicalize_phone(r, country_code))
        .collect())
}

/// Send priority, ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Caller-supplied delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SendPolicy {
    pub priority: Priority,
    pub fallback_enabled: bool,
    pub retry_on_failure: bool,
    pub track_delivery: bool,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            fallback_enabled: true,
            retry_on_failure: true,
            track_delivery: true,
        }
    }
}

impl SendPolicy {
    /// Policy with urgent priority.
    pub fn urgent() -> Self {
        Self {
            priority: Priority::Urgent,
            ..Self::default()
        }
    }

    /// Attempt budget for the primary round.
    ///
    /// Urgent priority bounds latency above everything else and overrides
    /// the caller's retry flag; OTP sends carry a reduced budget because a
    /// code that arrives late is a code the user already regenerated.
    pub fn attempt_budget(&self, request: &SendRequest, config: &DeliveryConfig) -> u32 {
        if self.priority == Priority::Urgent {
            return config.urgent_max_attempts;
        }
        if !self.retry_on_failure {
            return 1;
        }
        if matches!(request, SendRequest::Otp { .. }) {
            return config.otp_max_attempts;
        }
        config.max_attempts
    }

    /// Attempt budget for the fallback round.
    pub fn fallback_budget(&self, config: &DeliveryConfig) -> u32 {
        if self.priority == Priority::Urgent {
            return config.urgent_max_attempts;
        }
        if !self.retry_on_failure {
            return 1;
        }
        config.fallback_max_attempts
    }

    /// Whether the fallback channel may be used. Urgent sends always may.
    pub fn fallback_allowed(&self) -> bool {
        self.fallback_enabled || self.priority == Priority::Urgent
    }
}

/// One attempt against one channel.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub channel: ChannelKind,
    pub attempt: u32,
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub latency_ms: u64,
}

impl AttemptResult {
    pub fn delivered(
        channel: ChannelKind,
        attempt: u32,
        message_id: String,
        latency_ms: u64,
    ) -> Self {
        Self {
            channel,
            attempt,
            success: true,
            provider_message_id: Some(message_id),
            error_kind: None,
            error_message: None,
            latency_ms,
        }
    }

    pub fn failed(channel: ChannelKind, attempt: u32, error: &SendError, latency_ms: u64) -> Self {
        Self {
            channel,
            attempt,
            success: false,
            provider_message_id: None,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            latency_ms,
        }
    }
}

/// What came of a send, across every attempt and both channels.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub final_channel: Option<ChannelKind>,
    pub fallback_used: bool,
    pub total_retries: u32,
    pub total_latency_ms: u64,
    pub errors: Vec<String>,
    pub attempts: Vec<AttemptResult>,
}

impl DeliveryOutcome {
    /// Aggregate a finished attempt sequence.
    pub fn from_attempts(attempts: Vec<AttemptResult>, fallback_used: bool) -> Self {
        let success = attempts.last().is_some_and(|a| a.success);
        let final_channel = attempts.last().map(|a| a.channel);
        let total_retries = attempts.iter().filter(|a| !a.success).count() as u32;
        let total_latency_ms = attempts.iter().map(|a| a.latency_ms).sum();
        let errors = attempts
            .iter()
            .filter(|a| !a.success)
            .map(|a| {
                format!(
                    "{} attempt {}: {}",
                    a.channel,
                    a.attempt,
                    a.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        Self {
            success,
            final_channel,
            fallback_used,
            total_retries,
            total_latency_ms,
            errors,
            attempts,
        }
    }

    /// Outcome for a send rejected before any attempt was made.
    pub fn rejected(error: &SendError) -> Self {
        Self {
            success: false,
            final_channel: None,
            fallback_used: false,
            total_retries: 0,
            total_latency_ms: 0,
            errors: vec![error.to_string()],
            attempts: Vec::new(),
        }
    }
}
