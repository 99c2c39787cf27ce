//! Payload conversion for the fallback round.
//!
//! The fallback channel only understands plain template messages, so every
//! request shape collapses to [`SendRequest::Text`]:
//! - text passes through unchanged
//! - media keeps its template and parameters, the attachment travels as a
//!   trailing link parameter
//! - OTP keeps its template with the code as the sole parameter
//! - replies move to the configured generic reply template with the
//!   original text as the sole parameter
//!
//! Conversion is pure: no I/O, no shared state, same output for the same
//! input every time.

use super::SendRequest;

/// Convert a request for delivery on the plain-text fallback channel.
pub fn to_fallback(request: &SendRequest, reply_template: &str) -> SendRequest {
    match request {
        SendRequest::Text { .. } => request.clone(),
        SendRequest::Media {
            recipients,
            template,
            parameters,
            media_url,
            ..
        } => {
            let mut parameters = parameters.clone();
            parameters.push(media_url.clone());
            SendRequest::Text {
                recipients: recipients.clone(),
                template: template.clone(),
                parameters,
            }
        }
        SendRequest::Otp {
            recipient,
            template,
            code,
        } => SendRequest::Text {
            recipients: vec![recipient.clone()],
            template: template.clone(),
            parameters: vec![code.clone()],
        },
        SendRequest::Reply { recipient, text } => SendRequest::Text {
            recipients: vec![recipient.clone()],
            template: reply_template.to_string(),
            parameters: vec![text.clone()],
        },
    }
}
