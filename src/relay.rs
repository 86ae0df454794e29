//! # Feature: Chat Relay
//!
//! Forwards messages composed in the storefront (chat lines and priced orders)
//! to the vendor's WhatsApp through an external messaging tool. One attempt
//! per message, no retries; the result is reported as a success flag with an
//! optional reason.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Automation webhook transport (`{phoneNumber, text, senderName}`) with message ids
//! - 1.0.0: Initial Evolution API `sendText` relay

use crate::config::{EvolutionSettings, TransportKind};
use crate::event_log::EventLog;
use crate::mailbox::MessageStatus;
use crate::order::OrderPayload;
use crate::status::MessageTracker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const SOURCE: &str = "ChatRelay";

/// Request timeout towards the messaging tool
pub const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Message text is empty.")]
    EmptyMessage,

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("No outbound messaging transport is configured.")]
    NotConfigured,

    #[error("Network error or API is down: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Messaging API returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl RelayError {
    /// Errors caused by the caller's input rather than the messaging tool
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::EmptyMessage | RelayError::InvalidOrder(_))
    }
}

/// One message headed for WhatsApp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub phone_number: String,
    pub text: String,
    pub sender_name: String,
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver a message; returns the remote message id when the tool reports one
    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>, RelayError>;
}

/// Client for calls to the messaging tool; every request is bounded by `timeout`
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// Reads an id that may come back as a string or a number
fn id_from(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Automation webhook transport
// ============================================================================

/// Posts `{phoneNumber, text, senderName}` to a workflow automation webhook
pub struct AutomationWebhook {
    client: reqwest::Client,
    url: String,
}

impl AutomationWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        AutomationWebhook {
            client: http_client(SEND_TIMEOUT),
            url: url.into(),
        }
    }
}

#[async_trait]
impl OutboundTransport for AutomationWebhook {
    fn name(&self) -> &'static str {
        "automation"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>, RelayError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let response = check_status(response).await?;

        // the body is optional; an empty or non-JSON 2xx still counts as sent
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        Ok(id_from(parsed.as_ref().and_then(|v| v.get("messageId"))))
    }
}

// ============================================================================
// Evolution API transport
// ============================================================================

/// Calls Evolution API `POST /message/sendText/{instance}`
pub struct EvolutionApi {
    client: reqwest::Client,
    settings: EvolutionSettings,
}

impl EvolutionApi {
    pub fn new(settings: EvolutionSettings) -> Self {
        EvolutionApi {
            client: http_client(SEND_TIMEOUT),
            settings,
        }
    }

    fn send_text_url(&self) -> String {
        format!(
            "{}/message/sendText/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.instance
        )
    }
}

#[async_trait]
impl OutboundTransport for EvolutionApi {
    fn name(&self) -> &'static str {
        "evolution"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>, RelayError> {
        let response = self
            .client
            .post(self.send_text_url())
            .header("apikey", &self.settings.api_key)
            .json(&json!({
                "number": message.phone_number,
                "text": message.text,
            }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: Option<Value> = response.json().await.ok();
        Ok(id_from(body.as_ref().and_then(|v| v.pointer("/key/id"))))
    }
}

pub fn transport_for(kind: TransportKind) -> Arc<dyn OutboundTransport> {
    match kind {
        TransportKind::Automation { url } => Arc::new(AutomationWebhook::new(url)),
        TransportKind::Evolution(settings) => Arc::new(EvolutionApi::new(settings)),
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Result of one relay attempt as reported to the widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A message the transport accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub local_id: String,
    pub message_id: Option<String>,
}

/// Failed attempt, with the tracking id when one was assigned
#[derive(Debug)]
pub struct SendFailure {
    pub local_id: Option<String>,
    pub error: RelayError,
}

impl SendOutcome {
    pub fn from_result(result: &Result<SendReceipt, SendFailure>) -> Self {
        match result {
            Ok(receipt) => SendOutcome {
                success: true,
                local_id: Some(receipt.local_id.clone()),
                message_id: receipt.message_id.clone(),
                status: MessageStatus::Sent,
                error: None,
            },
            Err(failure) => SendOutcome {
                success: false,
                local_id: failure.local_id.clone(),
                message_id: None,
                status: MessageStatus::Error,
                error: Some(failure.error.to_string()),
            },
        }
    }
}

#[derive(Clone)]
pub struct ChatRelay {
    transport: Option<Arc<dyn OutboundTransport>>,
    vendor_number: String,
    tracker: MessageTracker,
    events: Arc<EventLog>,
}

impl ChatRelay {
    pub fn new(
        transport: Option<Arc<dyn OutboundTransport>>,
        vendor_number: impl Into<String>,
        tracker: MessageTracker,
        events: Arc<EventLog>,
    ) -> Self {
        ChatRelay {
            transport,
            vendor_number: vendor_number.into(),
            tracker,
            events,
        }
    }

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    pub fn transport_name(&self) -> Option<&'static str> {
        self.transport.as_ref().map(|t| t.name())
    }

    /// Relay a chat widget line to WhatsApp
    pub async fn send_chat(&self, text: &str, sender_name: &str) -> Result<SendReceipt, SendFailure> {
        let text = text.trim();
        if text.is_empty() {
            self.events.error(SOURCE, "Message text is empty.", None);
            return Err(SendFailure {
                local_id: None,
                error: RelayError::EmptyMessage,
            });
        }

        let full_message = format!("Consulta desde el Chat Widget: \"{text}\"");
        self.events.info(
            SOURCE,
            "Sending chat message to WhatsApp.",
            Some(json!({ "text": full_message })),
        );

        self.deliver(full_message, sender_name).await
    }

    /// Relay a priced order to the vendor
    pub async fn send_order(&self, payload: &OrderPayload, sender_name: &str) -> Result<SendReceipt, SendFailure> {
        self.events.info(
            SOURCE,
            "Attempting to send order to WhatsApp.",
            serde_json::to_value(payload).ok(),
        );

        if let Err(e) = payload.validate() {
            self.events.error(SOURCE, "Invalid order payload.", Some(json!({ "error": e.to_string() })));
            return Err(SendFailure {
                local_id: None,
                error: RelayError::InvalidOrder(e.to_string()),
            });
        }

        self.deliver(payload.to_whatsapp_text(), sender_name).await
    }

    async fn deliver(&self, text: String, sender_name: &str) -> Result<SendReceipt, SendFailure> {
        let local_id = format!("sent-{}", Uuid::new_v4());
        self.tracker.begin_send(&local_id);

        let Some(ref transport) = self.transport else {
            let error = RelayError::NotConfigured;
            self.tracker.mark_failed(&local_id, &error.to_string());
            self.events.error(SOURCE, &error.to_string(), None);
            return Err(SendFailure {
                local_id: Some(local_id),
                error,
            });
        };

        let message = OutboundMessage {
            phone_number: self.vendor_number.clone(),
            text,
            sender_name: sender_name.to_string(),
        };

        match transport.send(&message).await {
            Ok(message_id) => {
                self.tracker.mark_sent(&local_id, message_id.clone());
                self.events.success(
                    SOURCE,
                    "Message sent successfully.",
                    Some(json!({ "transport": transport.name(), "localId": local_id, "messageId": message_id })),
                );
                Ok(SendReceipt { local_id, message_id })
            }
            Err(error) => {
                self.tracker.mark_failed(&local_id, &error.to_string());
                self.events.error(
                    SOURCE,
                    "Error sending message.",
                    Some(json!({ "transport": transport.name(), "localId": local_id, "error": error.to_string() })),
                );
                Err(SendFailure {
                    local_id: Some(local_id),
                    error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderSelection, ShippingMethod};
    use std::sync::Mutex;

    /// Records what it was asked to send and answers with a canned result
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl OutboundTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: &OutboundMessage) -> Result<Option<String>, RelayError> {
            self.sent.lock().unwrap().push(message.clone());
            match self.fail_with {
                Some(status) => Err(RelayError::Upstream {
                    status,
                    body: "boom".to_string(),
                }),
                None => Ok(Some("remote-1".to_string())),
            }
        }
    }

    fn relay_with(fail_with: Option<u16>) -> (ChatRelay, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            fail_with,
        });
        let relay = ChatRelay::new(
            Some(transport.clone()),
            "5491100000000",
            MessageTracker::new(),
            Arc::new(EventLog::new()),
        );
        (relay, transport)
    }

    #[tokio::test]
    async fn test_send_chat_wraps_text_and_tracks_status() {
        let (relay, transport) = relay_with(None);

        let receipt = relay.send_chat("  ¿Tienen envíos?  ", "Ana").await.unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Consulta desde el Chat Widget: \"¿Tienen envíos?\"");
        assert_eq!(sent[0].phone_number, "5491100000000");
        assert_eq!(sent[0].sender_name, "Ana");

        assert_eq!(receipt.message_id.as_deref(), Some("remote-1"));
        let tracked = relay.tracker().get(&receipt.local_id).unwrap();
        assert_eq!(tracked.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_chat_rejects_empty_text_without_network() {
        let (relay, transport) = relay_with(None);

        let failure = relay.send_chat("   ", "Ana").await.unwrap_err();
        assert!(matches!(failure.error, RelayError::EmptyMessage));
        assert!(failure.local_id.is_none());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_marks_error() {
        let (relay, _) = relay_with(Some(500));

        let result = relay.send_chat("hola", "Ana").await;
        let outcome = SendOutcome::from_result(&result);
        assert!(!outcome.success);
        assert_eq!(outcome.status, MessageStatus::Error);

        let local_id = outcome.local_id.unwrap();
        assert_eq!(relay.tracker().get(&local_id).unwrap().status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn test_no_transport_reports_failure() {
        let relay = ChatRelay::new(None, "549", MessageTracker::new(), Arc::new(EventLog::new()));

        let failure = relay.send_chat("hola", "Ana").await.unwrap_err();
        assert!(matches!(failure.error, RelayError::NotConfigured));
        assert!(!failure.error.is_client_error());
    }

    #[tokio::test]
    async fn test_send_order_sends_formatted_text() {
        let (relay, transport) = relay_with(None);
        let payload = OrderSelection {
            product_id: 2,
            quantity: 2,
            shipping: Some(ShippingMethod::Retiro),
            ..Default::default()
        }
        .price(250)
        .unwrap();

        relay.send_order(&payload, "Storefront").await.unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0].text, payload.to_whatsapp_text());
    }

    #[tokio::test]
    async fn test_send_order_rejects_invalid_payload() {
        let (relay, transport) = relay_with(None);
        let mut payload = OrderSelection {
            product_id: 2,
            quantity: 2,
            shipping: Some(ShippingMethod::Envio),
            ..Default::default()
        }
        .price(250)
        .unwrap();
        payload.total = 1;

        let failure = relay.send_order(&payload, "Storefront").await.unwrap_err();
        assert!(failure.error.is_client_error());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_id_from_accepts_strings_and_numbers() {
        assert_eq!(id_from(Some(&json!("abc"))), Some("abc".to_string()));
        assert_eq!(id_from(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(id_from(Some(&json!(""))), None);
        assert_eq!(id_from(None), None);
    }

    #[test]
    fn test_evolution_url_trims_slash() {
        let api = EvolutionApi::new(EvolutionSettings {
            api_url: "https://evo.example.com/".to_string(),
            instance: "trama".to_string(),
            api_key: "k".to_string(),
        });
        assert_eq!(api.send_text_url(), "https://evo.example.com/message/sendText/trama");
    }
}
