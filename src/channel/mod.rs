//! Delivery channels.
//!
//! A channel wraps one provider API behind the [`ChannelClient`] trait:
//! - WhatsApp template sends (rich primary channel)
//! - SMS template sends (plain fallback channel)
//! - an in-process mock for tests and dry runs
//!
//! Clients perform exactly one attempt per call, validate requests before
//! any network traffic, and classify every failure into [`ErrorKind`].
//! Retry policy, health accounting and fallback selection live above the
//! trait, never inside a client.

pub mod error;
mod health;
mod mock;
mod sms;
mod whatsapp;

pub use error::{ErrorKind, SendError};
pub use health::{ChannelHealth, HealthMonitor, HealthSnapshot};
pub use mock::MockClient;
pub use sms::SmsClient;
pub use whatsapp::WhatsAppClient;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::delivery::SendRequest;

/// The two channel kinds the daemon speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
    Sms,
}

impl ChannelKind {
    /// Stable label for logs and metric attributes.
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Whatsapp => "whatsapp",
            ChannelKind::Sms => "sms",
        }
    }

    /// Text length cap applied when the channel config does not override it.
    pub fn default_max_text_length(self) -> usize {
        match self {
            ChannelKind::Whatsapp => 4096,
            ChannelKind::Sms => 160,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized provider acknowledgement for a delivered attempt.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Provider-assigned message id
    pub message_id: String,
}

/// One provider, one attempt per call.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Which channel this client serves.
    fn kind(&self) -> ChannelKind;

    /// Configured channel name.
    fn name(&self) -> &str;

    /// Text length cap for this channel.
    fn max_text_length(&self) -> usize;

    /// Perform exactly one send attempt.
    ///
    /// Validates the request and returns a terminal error before any
    /// network call when it cannot succeed (malformed recipient, OTP code
    /// out of shape, over-length text, bad media URL). Never retries and
    /// never touches shared health state.
    async fn send(&self, request: &SendRequest) -> Result<ProviderResponse, SendError>;

    /// Lightweight provider reachability check.
    async fn probe(&self) -> Result<(), SendError>;
}

/// Shared handle to a channel client.
pub type SharedClient = Arc<dyn ChannelClient>;

/// Request validation common to every client.
///
/// `max_text` bounds the variable text the request carries: the reply body
/// and the total of substituted parameters. Template bodies live on the
/// provider side and are not rendered here.
pub(crate) fn validate_request(request: &SendRequest, max_text: usize) -> Result<(), SendError> {
    for recipient in request.recipients() {
        if !crate::delivery::is_canonical_phone(recipient) {
            return Err(SendError::InvalidPhone(recipient.to_string()));
        }
    }

    match request {
        SendRequest::Text { parameters, .. } | SendRequest::Media { parameters, .. } => {
            let total: usize = parameters.iter().map(|p| p.len()).sum();
            if total > max_text {
                return Err(SendError::MessageTooLong(format!(
                    "{total} parameter bytes exceed the {max_text} byte cap"
                )));
            }
        }
        SendRequest::Otp { code, .. } => {
            let digits = code.len() >= 4 && code.len() <= 8 && code.chars().all(|c| c.is_ascii_digit());
            if !digits {
                return Err(SendError::InvalidOtp);
            }
        }
        SendRequest::Reply { text, .. } => {
            if text.len() > max_text {
                return Err(SendError::MessageTooLong(format!(
                    "{} bytes exceed the {max_text} byte cap",
                    text.len()
                )));
            }
        }
    }

    if let SendRequest::Media { media_url, .. } = request {
        match reqwest::Url::parse(media_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => return Err(SendError::InvalidMediaUrl(media_url.clone())),
        }
    }

    Ok(())
}

/// Configured channels, resolved into primary and fallback roles.
pub struct Channels {
    clients: Vec<SharedClient>,
    primary: SharedClient,
    fallback: Option<SharedClient>,
}

impl Channels {
    /// Assemble a channel set directly from already-built clients.
    pub fn new(
        clients: Vec<SharedClient>,
        primary: SharedClient,
        fallback: Option<SharedClient>,
    ) -> Self {
        Self {
            clients,
            primary,
            fallback,
        }
    }

    /// Build clients from config and resolve delivery roles.
    ///
    /// Config validation has already guaranteed that the referenced names
    /// exist and that the role kinds line up.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut clients: Vec<SharedClient> = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let client: SharedClient = if let Some(mock) = &channel.mock {
                Arc::new(MockClient::from_config(channel, mock))
            } else {
                match channel.kind {
                    ChannelKind::Whatsapp => Arc::new(WhatsAppClient::new(channel)?),
                    ChannelKind::Sms => Arc::new(SmsClient::new(channel)?),
                }
            };
            info!(
                channel = %channel.name,
                kind = %channel.kind,
                mock = channel.mock.is_some(),
                "channel configured"
            );
            clients.push(client);
        }

        let find = |name: &str| {
            clients
                .iter()
                .find(|c| c.name() == name)
                .cloned()
                .with_context(|| format!("channel {name} not configured"))
        };
        let primary = find(&config.delivery.primary)?;
        let fallback = match &config.delivery.fallback {
            Some(name) => Some(find(name)?),
            None => None,
        };

        Ok(Self {
            clients,
            primary,
            fallback,
        })
    }

    /// The primary delivery channel.
    pub fn primary(&self) -> &SharedClient {
        &self.primary
    }

    /// The fallback channel, when one is configured.
    pub fn fallback(&self) -> Option<&SharedClient> {
        self.fallback.as_ref()
    }

    /// All configured clients.
    pub fn all(&self) -> &[SharedClient] {
        &self.clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_labels() {
        assert_eq!(ChannelKind::Whatsapp.name(), "whatsapp");
        assert_eq!(ChannelKind::Sms.name(), "sms");
        assert_eq!(ChannelKind::Whatsapp.default_max_text_length(), 4096);
        assert_eq!(ChannelKind::Sms.default_max_text_length(), 160);
    }

    #[test]
    fn test_kind_deserializes_lowercase() {
        let kind: ChannelKind = serde_yaml::from_str("whatsapp").unwrap();
        assert_eq!(kind, ChannelKind::Whatsapp);
        let kind: ChannelKind = serde_yaml::from_str("sms").unwrap();
        assert_eq!(kind, ChannelKind::Sms);
    }

    #[test]
    fn test_channels_resolve_roles() {
        let yaml = r#"
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
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let channels = Channels::from_config(&config).unwrap();
        assert_eq!(channels.primary().kind(), ChannelKind::Whatsapp);
        assert_eq!(channels.fallback().unwrap().kind(), ChannelKind::Sms);
        assert_eq!(channels.all().len(), 2);
    }

    #[test]
    fn test_channels_without_fallback() {
        let yaml = r#"
channels:
  - name: whatsapp
    kind: whatsapp
    mock:
      response: success

delivery:
  primary: whatsapp
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let channels = Channels::from_config(&config).unwrap();
        assert!(channels.fallback().is_none());
    }
}
