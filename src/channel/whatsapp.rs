//! WhatsApp Cloud API bridge: webhook payloads, signatures and outbound text

use super::{ChannelError, ChannelSender, InboundMessage};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";
const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    from: String,
    text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    body: String,
}

impl WebhookPayload {
    pub fn is_business_account(&self) -> bool {
        self.object == BUSINESS_ACCOUNT_OBJECT
    }
}

/// First text message in a webhook payload. Status updates and media
/// messages carry no text and yield `None`.
pub fn parse_inbound(payload: &WebhookPayload) -> Option<InboundMessage> {
    let message = payload
        .entry
        .first()?
        .changes
        .first()?
        .value
        .messages
        .first()?;
    let text = message.text.as_ref()?.body.trim();
    if text.is_empty() {
        return None;
    }
    Some(InboundMessage {
        sender_address: message.from.clone(),
        text: text.to_string(),
    })
}

/// Answer to the subscription handshake, if the token matches
pub fn verify_subscription<'a>(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
    expected_token: Option<&str>,
) -> Option<&'a str> {
    let expected = expected_token?;
    let token = token?;
    if mode != Some("subscribe") || token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return None;
    }
    challenge
}

/// Check an `X-Hub-Signature-256: sha256=<hex>` header against the raw body
pub fn verify_signature(secret: &str, header: &str, body: &[u8]) -> bool {
    let sig_hex = header.strip_prefix("sha256=").unwrap_or(header);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() == 1
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Serialize)]
struct OutboundText<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: OutboundBody<'a>,
}

#[derive(Debug, Serialize)]
struct OutboundBody<'a> {
    body: &'a str,
}

/// Sends text messages through the Cloud API `messages` endpoint
pub struct WhatsAppSender {
    client: Client,
    access_token: Option<String>,
    endpoint: Option<String>,
}

impl WhatsAppSender {
    pub fn new(access_token: Option<String>, phone_number_id: Option<&str>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            access_token,
            endpoint: phone_number_id.map(|id| format!("{GRAPH_API_BASE}/{id}/messages")),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.endpoint.is_some()
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    async fn send_message(&self, address: &str, text: &str) -> Result<(), ChannelError> {
        let (Some(token), Some(endpoint)) = (&self.access_token, &self.endpoint) else {
            return Err(ChannelError::NotConfigured(
                "set WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID".to_string(),
            ));
        };

        let payload = OutboundText {
            messaging_product: "whatsapp",
            to: address,
            kind: "text",
            text: OutboundBody { body: text },
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(to = %address, status = status.as_u16(), "WhatsApp send failed");
            return Err(ChannelError::Delivery(format!("HTTP {status}: {body}")));
        }

        tracing::debug!(to = %address, chars = text.len(), "WhatsApp message sent");
        Ok(())
    }
}
