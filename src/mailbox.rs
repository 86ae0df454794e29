//! # Feature: Chat Mailbox
//!
//! Shared list of inbound chat messages awaiting a client poll. Producers
//! append; the poll drains everything atomically, so each message is handed
//! out once per successful drain.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Lifecycle of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
    Delivered,
}

impl MessageStatus {
    /// Only an outbound message in flight can change state
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Sending, MessageStatus::Sent) | (MessageStatus::Sending, MessageStatus::Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Sending)
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Typed into the storefront chat widget
    Widget,
    /// Arrived from the WhatsApp side
    WhatsApp,
    /// Generated by the AI assistant
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub sender_name: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub status: MessageStatus,
}

impl ChatMessage {
    /// A message pushed to us from WhatsApp
    pub fn inbound(text: impl Into<String>, sender_name: impl Into<String>, timestamp: i64) -> Self {
        ChatMessage {
            id: new_inbound_id(),
            text: text.into(),
            sender: Sender::WhatsApp,
            sender_name: sender_name.into(),
            timestamp,
            status: MessageStatus::Delivered,
        }
    }
}

/// `msg_{epoch_ms}_{random}`
pub fn new_inbound_id() -> String {
    format!("msg_{}_{}", Utc::now().timestamp_millis(), rand::random::<u32>())
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Append a message after everything already queued
    async fn push(&self, message: ChatMessage) -> Result<()>;

    /// Take every queued message in append order, leaving the mailbox empty
    async fn drain(&self) -> Result<Vec<ChatMessage>>;

    async fn len(&self) -> Result<usize>;
}

/// Single-process mailbox; contents are lost on restart
#[derive(Default)]
pub struct InMemoryMailbox {
    messages: Mutex<Vec<ChatMessage>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn push(&self, message: ChatMessage) -> Result<()> {
        let mut messages = self.messages.lock().await;
        messages.push(message);
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<ChatMessage>> {
        let mut messages = self.messages.lock().await;
        Ok(std::mem::take(&mut *messages))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.lock().await.len())
    }
}
