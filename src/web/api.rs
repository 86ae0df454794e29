//! This module defines the HTTP API endpoints used by the storefront page and
//! by the messaging automation tool.
use super::{ApiError, AppState};
use crate::assist::{HistoryEntry, WELCOME_MESSAGE};
use crate::catalog::{extras, find_product, products, Extra};
use crate::mailbox::ChatMessage;
use crate::order::{OrderPayload, OrderSelection};
use crate::relay::{SendFailure, SendOutcome, SendReceipt};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const WEBHOOK_SOURCE: &str = "WebhookAPI";

/// Header carrying the shared webhook secret
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

const INVALID_WEBHOOK_PAYLOAD: &str =
    "Invalid payload. \"text\", \"senderName\", and \"timestamp\" are required.";

// ============================================================================
// Inbound webhook
// ============================================================================

fn non_empty_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)?.as_str().filter(|s| !s.is_empty())
}

/// Accepts epoch milliseconds as a number or a string, or an RFC 3339 date
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|ms| *ms != 0),
        Value::String(s) if !s.is_empty() => s
            .parse::<i64>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp_millis())),
        _ => None,
    }
}

/// Build the mailbox entry for a webhook body, or explain why it is rejected
pub fn inbound_from_payload(body: &Value) -> Result<ChatMessage, ApiError> {
    let (Some(text), Some(sender_name), Some(raw_timestamp)) = (
        non_empty_str(body, "text"),
        non_empty_str(body, "senderName"),
        body.get("timestamp").filter(|v| !v.is_null()),
    ) else {
        return Err(ApiError::BadRequest(INVALID_WEBHOOK_PAYLOAD.to_string()));
    };

    let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
        ApiError::BadRequest(
            "Invalid payload. \"timestamp\" must be epoch milliseconds or an RFC 3339 date.".to_string(),
        )
    })?;

    Ok(ChatMessage::inbound(text, sender_name, timestamp))
}

/// Receives messages pushed by the automation tool when they arrive from WhatsApp
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if let Some(ref secret) = state.config.webhook_secret {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            state.events.error(WEBHOOK_SOURCE, "Rejected webhook with a bad secret.", None);
            return Err(ApiError::Unauthorized);
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.events.error(
                WEBHOOK_SOURCE,
                "Error processing webhook.",
                Some(json!({ "error": e.to_string() })),
            );
            return Err(ApiError::Internal(format!("Unreadable webhook body: {e}")));
        }
    };

    state.events.info(WEBHOOK_SOURCE, "Webhook received.", Some(payload.clone()));

    let message = match inbound_from_payload(&payload) {
        Ok(message) => message,
        Err(e) => {
            state.events.error(WEBHOOK_SOURCE, "Invalid webhook payload.", Some(payload));
            return Err(e);
        }
    };

    let id = message.id.clone();
    if let Err(e) = state.mailbox.push(message).await {
        state.events.error(
            WEBHOOK_SOURCE,
            "Error processing webhook.",
            Some(json!({ "error": e.to_string() })),
        );
        return Err(e.into());
    }
    state.tracker.record_delivered(&id);

    Ok(Json(json!({ "success": true, "message": "Message processed." })))
}

// ============================================================================
// Mailbox poll
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    pub messages: Vec<ChatMessage>,
}

/// Atomically hands out and clears everything in the mailbox
pub async fn poll_messages(State(state): State<Arc<AppState>>) -> Result<Json<PollResponse>, ApiError> {
    let messages = state.mailbox.drain().await?;

    if !messages.is_empty() {
        state.events.info(
            "MailboxPoll",
            "Delivered queued messages.",
            Some(json!({ "count": messages.len() })),
        );
    }

    Ok(Json(PollResponse {
        success: true,
        messages,
    }))
}

// ============================================================================
// Chat relay
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_name: Option<String>,
}

fn outcome_status(result: &Result<SendReceipt, SendFailure>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(failure) if failure.error.is_client_error() => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn send_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendChatRequest>,
) -> impl IntoResponse {
    let sender_name = request
        .sender_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| state.config.widget_sender_name.clone());

    let result = state.relay.send_chat(&request.text, &sender_name).await;
    (outcome_status(&result), Json(SendOutcome::from_result(&result)))
}

pub async fn message_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .tracker
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Message '{id}'")))
}

// ============================================================================
// AI assist
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AssistRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistResponse {
    pub response: String,
}

pub async fn assist(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssistRequest>,
) -> Result<Json<AssistResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("Query is empty.".to_string()));
    }

    let response = state.assist.chat_reply(&request.query, &request.history).await;
    Ok(Json(AssistResponse { response }))
}

pub async fn suggestions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<Json<Vec<Extra>>, ApiError> {
    let product = find_product(id).ok_or_else(|| ApiError::NotFound(format!("Product {id}")))?;
    Ok(Json(state.assist.suggest_extras(&product).await))
}

// ============================================================================
// Catalog & orders
// ============================================================================

pub async fn catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "products": products(),
        "extras": extras(),
        "shippingCost": state.config.shipping_cost,
        "welcomeMessage": WELCOME_MESSAGE,
    }))
}

pub async fn quote_order(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<OrderSelection>,
) -> Result<Json<OrderPayload>, ApiError> {
    selection
        .price(state.config.shipping_cost)
        .map(Json)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(flatten)]
    pub outcome: SendOutcome,
    pub order: OrderPayload,
    /// Message to post in the chat once the order went out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
}

pub async fn send_order(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<OrderSelection>,
) -> Result<impl IntoResponse, ApiError> {
    let order = selection
        .price(state.config.shipping_cost)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let result = state
        .relay
        .send_order(&order, &state.config.widget_sender_name)
        .await;

    let response = OrderResponse {
        outcome: SendOutcome::from_result(&result),
        chat_message: result.is_ok().then(|| order.chat_summary()),
        order,
    };
    Ok((outcome_status(&result), Json(response)))
}

// ============================================================================
// Health
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mailbox_depth = state.mailbox.len().await?;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_HASH"),
        "rustc": rustc_version_runtime::version().to_string(),
        "transport": state.relay.transport_name(),
        "mailboxDepth": mailbox_depth,
        "trackedMessages": state.tracker.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_from_payload_accepts_complete_payload() {
        let msg = inbound_from_payload(&json!({
            "text": "Hola, ¿sigue disponible?",
            "senderName": "Vendedora",
            "timestamp": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(msg.text, "Hola, ¿sigue disponible?");
        assert_eq!(msg.sender_name, "Vendedora");
        assert_eq!(msg.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_inbound_from_payload_requires_all_fields() {
        for body in [
            json!({ "senderName": "a", "timestamp": 1 }),
            json!({ "text": "a", "timestamp": 1 }),
            json!({ "text": "a", "senderName": "a" }),
            json!({ "text": "", "senderName": "a", "timestamp": 1 }),
            json!({ "text": "a", "senderName": "a", "timestamp": null }),
            json!([]),
        ] {
            assert!(
                matches!(inbound_from_payload(&body), Err(ApiError::BadRequest(_))),
                "accepted {body}"
            );
        }
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp(&json!(1234)), Some(1234));
        assert_eq!(parse_timestamp(&json!("1234")), Some(1234));
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T12:00:00Z")),
            Some(1_714_564_800_000)
        );
        assert_eq!(parse_timestamp(&json!(0)), None);
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
