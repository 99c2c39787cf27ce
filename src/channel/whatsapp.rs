//! WhatsApp provider client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::delivery::SendRequest;

use super::{validate_request, ChannelClient, ChannelKind, ProviderResponse, SendError};

/// Client for the WhatsApp template-message API.
pub struct WhatsAppClient {
    name: String,
    api_url: String,
    api_key: String,
    client: Client,
    timeout: Duration,
    max_text_length: usize,
}

impl WhatsAppClient {
    pub fn new(config: &ChannelConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            name: config.name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
            timeout: config.timeout,
            max_text_length: config.max_text_length(),
        })
    }

    async fn post_message(&self, payload: &MessagePayload<'_>) -> Result<ProviderResponse, SendError> {
        let url = format!("{}/messages", self.api_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| SendError::from_transport(&e, self.timeout))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            let body: SubmitResponse = response.json().await.map_err(|e| SendError::Api {
                status,
                message: format!("unparseable response: {e}"),
            })?;
            debug!(channel = %self.name, message_id = %body.message_id, "message accepted");
            return Ok(ProviderResponse {
                message_id: body.message_id,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let (code, message) = match parsed {
            Some(e) => (e.code, e.message.unwrap_or(body)),
            None => (None, body),
        };
        Err(SendError::from_provider(status, code.as_deref(), message))
    }

    fn build_payload<'a>(&self, request: &'a SendRequest) -> MessagePayload<'a> {
        match request {
            SendRequest::Text {
                recipients,
                template,
                parameters,
            } => MessagePayload {
                to: recipients,
                kind: "template",
                template: Some(template),
                parameters,
                media: None,
                text: None,
            },
            SendRequest::Media {
                recipients,
                template,
                parameters,
                media_kind,
                media_url,
            } => MessagePayload {
                to: recipients,
                kind: "template",
                template: Some(template),
                parameters,
                media: Some(MediaPayload {
                    kind: media_kind.name(),
                    url: media_url,
                }),
                text: None,
            },
            SendRequest::Otp {
                recipient,
                template,
                code,
            } => MessagePayload {
                to: std::slice::from_ref(recipient),
                kind: "template",
                template: Some(template),
                parameters: std::slice::from_ref(code),
                media: None,
                text: None,
            },
            SendRequest::Reply { recipient, text } => MessagePayload {
                to: std::slice::from_ref(recipient),
                kind: "text",
                template: None,
                parameters: &[],
                media: None,
                text: Some(text),
            },
        }
    }
}

#[async_trait]
impl ChannelClient for WhatsAppClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderResponse, SendError> {
        validate_request(request, self.max_text_length)?;
        self.post_message(&self.build_payload(request)).await
    }

    async fn probe(&self) -> Result<(), SendError> {
        let url = format!("{}/status", self.api_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| SendError::from_transport(&e, self.timeout))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(SendError::from_provider(status, None, message))
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    to: &'a [String],
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    parameters: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MediaPayload<'a> {
    kind: &'static str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MediaKind;

    fn test_client() -> WhatsAppClient {
        let config = ChannelConfig {
            name: "whatsapp".into(),
            kind: ChannelKind::Whatsapp,
            api_url: "http://localhost:1/api".into(),
            api_key: "key".into(),
            sender_id: None,
            timeout: Duration::from_millis(200),
            max_text_length: None,
            mock: None,
        };
        WhatsAppClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_malformed_phone_before_network() {
        let client = test_client();
        let request = SendRequest::Text {
            recipients: vec!["12345".into()],
            template: "welcome".into(),
            parameters: vec![],
        };
        // The api_url points nowhere; a validation error proves no call
        // was attempted.
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidPhone(_)));
    }

    #[tokio::test]
    async fn test_rejects_bad_media_url() {
        let client = test_client();
        let request = SendRequest::Media {
            recipients: vec!["9876543210".into()],
            template: "promo".into(),
            parameters: vec![],
            media_kind: MediaKind::Image,
            media_url: "ftp://example.com/file.png".into(),
        };
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidMediaUrl(_)));
    }

    #[tokio::test]
    async fn test_rejects_otp_code_out_of_shape() {
        let client = test_client();
        let request = SendRequest::Otp {
            recipient: "9876543210".into(),
            template: "login_otp".into(),
            code: "12ab".into(),
        };
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidOtp));
    }

    #[test]
    fn test_template_payload_shape() {
        let client = test_client();
        let request = SendRequest::Text {
            recipients: vec!["9876543210".into()],
            template: "welcome".into(),
            parameters: vec!["Asha".into()],
        };
        let json = serde_json::to_value(client.build_payload(&request)).unwrap();
        assert_eq!(json["type"], "template");
        assert_eq!(json["template"], "welcome");
        assert!(json.get("media").is_none());
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_reply_payload_is_plain_text() {
        let client = test_client();
        let request = SendRequest::Reply {
            recipient: "9876543210".into(),
            text: "got it, thanks".into(),
        };
        let json = serde_json::to_value(client.build_payload(&request)).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "got it, thanks");
        assert!(json.get("template").is_none());
    }

    #[test]
    fn test_media_payload_carries_url_verbatim() {
        let client = test_client();
        let request = SendRequest::Media {
            recipients: vec!["9876543210".into()],
            template: "promo".into(),
            parameters: vec![],
            media_kind: MediaKind::Video,
            media_url: "https://cdn.example.com/clip.mp4?sig=abc%20def".into(),
        };
        let json = serde_json::to_value(client.build_payload(&request)).unwrap();
        assert_eq!(json["media"]["kind"], "video");
        assert_eq!(json["media"]["url"], "https://cdn.example.com/clip.mp4?sig=abc%20def");
    }
}
