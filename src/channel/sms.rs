//! SMS provider client.
//!
//! Speaks a DLT-style template API: the provider holds the registered
//! template bodies, the daemon submits a template id plus substitution
//! variables. Free-form text is only used for reply messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::delivery::SendRequest;

use super::{validate_request, ChannelClient, ChannelKind, ProviderResponse, SendError};

/// Client for the SMS gateway API.
pub struct SmsClient {
    name: String,
    api_url: String,
    api_key: String,
    sender_id: Option<String>,
    client: Client,
    timeout: Duration,
    max_text_length: usize,
}

impl SmsClient {
    pub fn new(config: &ChannelConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            name: config.name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            sender_id: config.sender_id.clone(),
            client,
            timeout: config.timeout,
            max_text_length: config.max_text_length(),
        })
    }

    async fn post_sms(&self, payload: &SmsPayload<'_>) -> Result<ProviderResponse, SendError> {
        let url = format!("{}/sms/send", self.api_url);

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
            debug!(channel = %self.name, message_id = %body.message_id, "sms accepted");
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

    fn build_payload<'a>(&'a self, request: &'a SendRequest) -> SmsPayload<'a> {
        let sender_id = self.sender_id.as_deref();
        match request {
            SendRequest::Text {
                recipients,
                template,
                parameters,
            } => SmsPayload {
                to: recipients.clone(),
                template_id: Some(template),
                variables: parameters.clone(),
                text: None,
                sender_id,
            },
            // A media message carries no attachment over SMS; the link
            // travels as the last substitution variable.
            SendRequest::Media {
                recipients,
                template,
                parameters,
                media_url,
                ..
            } => {
                let mut variables = parameters.clone();
                variables.push(media_url.clone());
                SmsPayload {
                    to: recipients.clone(),
                    template_id: Some(template),
                    variables,
                    text: None,
                    sender_id,
                }
            }
            SendRequest::Otp {
                recipient,
                template,
                code,
            } => SmsPayload {
                to: vec![recipient.clone()],
                template_id: Some(template),
                variables: vec![code.clone()],
                text: None,
                sender_id,
            },
            SendRequest::Reply { recipient, text } => SmsPayload {
                to: vec![recipient.clone()],
                template_id: None,
                variables: Vec::new(),
                text: Some(text),
                sender_id,
            },
        }
    }
}

#[async_trait]
impl ChannelClient for SmsClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderResponse, SendError> {
        validate_request(request, self.max_text_length)?;
        self.post_sms(&self.build_payload(request)).await
    }

    async fn probe(&self) -> Result<(), SendError> {
        let url = format!("{}/account/status", self.api_url);
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
struct SmsPayload<'a> {
    to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    variables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_id: Option<&'a str>,
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

    fn test_client() -> SmsClient {
        let config = ChannelConfig {
            name: "sms".into(),
            kind: ChannelKind::Sms,
            api_url: "http://localhost:1/api".into(),
            api_key: "key".into(),
            sender_id: Some("NOTIFY".into()),
            timeout: Duration::from_millis(200),
            max_text_length: None,
            mock: None,
        };
        SmsClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_over_length_reply_rejected_locally() {
        let client = test_client();
        let request = SendRequest::Reply {
            recipient: "9876543210".into(),
            text: "x".repeat(200),
        };
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::MessageTooLong(_)));
    }

    #[test]
    fn test_media_link_becomes_last_variable() {
        let client = test_client();
        let request = SendRequest::Media {
            recipients: vec!["9876543210".into()],
            template: "promo".into(),
            parameters: vec!["Asha".into()],
            media_kind: MediaKind::Image,
            media_url: "https://cdn.example.com/offer.png".into(),
        };
        let payload = client.build_payload(&request);
        assert_eq!(payload.template_id, Some("promo"));
        assert_eq!(
            payload.variables,
            vec!["Asha", "https://cdn.example.com/offer.png"]
        );
    }

    #[test]
    fn test_otp_code_is_sole_variable() {
        let client = test_client();
        let request = SendRequest::Otp {
            recipient: "9876543210".into(),
            template: "login_otp".into(),
            code: "482913".into(),
        };
        let payload = client.build_payload(&request);
        assert_eq!(payload.to, vec!["9876543210"]);
        assert_eq!(payload.variables, vec!["482913"]);
        assert_eq!(payload.sender_id, Some("NOTIFY"));
    }

    #[test]
    fn test_reply_payload_has_no_template() {
        let payload = SmsPayload {
            to: vec!["9876543210".into()],
            template_id: None,
            variables: Vec::new(),
            text: Some("thanks, we got your message"),
            sender_id: Some("NOTIFY"),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("template_id").is_none());
        assert!(json.get("variables").is_none());
        assert_eq!(json["text"], "thanks, we got your message");
    }
}
