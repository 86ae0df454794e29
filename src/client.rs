//! # Feature: Storefront Client
//!
//! HTTP client for the storefront API, the chat session behind the widget and
//! the mailbox poller it runs: an immediate first poll, then one every
//! interval, with messages deduplicated by id before they are shown.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Chat session (relay + Maya reply per line), bounded seen-id set
//! - 1.0.0: Initial client and poller

use crate::assist::{HistoryEntry, HistoryRole, CHAT_FALLBACK, WELCOME_MESSAGE};
use crate::mailbox::{ChatMessage, MessageStatus};
use crate::relay::SendOutcome;
use crate::status::TrackedMessage;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default interval between mailbox polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// How long the poller remembers a message id
pub const SEEN_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[derive(Deserialize)]
struct PollReply {
    success: bool,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct AssistReply {
    response: String,
}

#[derive(Clone)]
pub struct StorefrontClient {
    client: reqwest::Client,
    base_url: String,
}

impl StorefrontClient {
    pub fn new(base_url: &str) -> Self {
        StorefrontClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Take everything waiting in the server mailbox
    pub async fn drain_messages(&self) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(self.url("/api/messages"))
            .send()
            .await
            .context("Failed to reach storefront")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mailbox poll failed ({}): {}", status, body);
        }

        let reply: PollReply = response.json().await.context("Failed to parse mailbox reply")?;
        if !reply.success {
            anyhow::bail!("Mailbox poll reported failure");
        }
        Ok(reply.messages)
    }

    /// Relay a chat line; failed sends come back as an outcome, not an error
    pub async fn send_chat(&self, text: &str, sender_name: Option<&str>) -> Result<SendOutcome> {
        let response = self
            .client
            .post(self.url("/api/chat/send"))
            .json(&json!({ "text": text, "senderName": sender_name }))
            .send()
            .await
            .context("Failed to reach storefront")?;

        response.json().await.context("Failed to parse send reply")
    }

    pub async fn message_status(&self, id: &str) -> Result<Option<TrackedMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/api/chat/status/{id}")))
            .send()
            .await
            .context("Failed to reach storefront")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json().await.context("Failed to parse status reply")?))
    }

    /// Ask Maya; the server already falls back on model failures
    pub async fn assist(&self, query: &str, history: &[HistoryEntry]) -> Result<String> {
        let response = self
            .client
            .post(self.url("/api/chat/assist"))
            .json(&json!({ "query": query, "history": history }))
            .send()
            .await
            .context("Failed to reach storefront")?
            .error_for_status()?;

        let reply: AssistReply = response.json().await.context("Failed to parse assist reply")?;
        Ok(reply.response)
    }
}

// ============================================================================
// Chat session
// ============================================================================

/// One line typed into the widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatInput<'a> {
    /// Relayed to the vendor and answered by Maya
    Message(&'a str),
    /// Only asked to Maya
    AskMaya(&'a str),
}

impl<'a> ChatInput<'a> {
    pub const ASSIST_COMMAND: &'static str = "/maya";

    /// `None` for blank lines and a bare command
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.strip_prefix(Self::ASSIST_COMMAND) {
            Some("") => None,
            Some(rest) if rest.starts_with(char::is_whitespace) => Some(ChatInput::AskMaya(rest.trim())),
            _ => Some(ChatInput::Message(line)),
        }
    }
}

/// What happened to one submitted line
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Relay result; `None` when the line was only for Maya
    pub delivery: Option<SendOutcome>,
    pub reply: String,
}

/// Conversation state of the chat widget
pub struct ChatSession {
    client: StorefrontClient,
    sender_name: Option<String>,
    history: Vec<HistoryEntry>,
}

impl ChatSession {
    pub fn new(client: StorefrontClient, sender_name: Option<String>) -> Self {
        ChatSession {
            client,
            sender_name,
            history: vec![HistoryEntry {
                role: HistoryRole::Received,
                text: WELCOME_MESSAGE.to_string(),
            }],
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Record a message that arrived from WhatsApp
    pub fn receive(&mut self, message: &ChatMessage) {
        self.history.push(HistoryEntry {
            role: HistoryRole::Received,
            text: message.text.clone(),
        });
    }

    /// The user line joins the history before Maya is asked, so her reply
    /// sees it; a failed relay still gets a reply.
    pub async fn submit(&mut self, input: ChatInput<'_>) -> Exchange {
        let (text, relay) = match input {
            ChatInput::Message(text) => (text, true),
            ChatInput::AskMaya(text) => (text, false),
        };

        self.history.push(HistoryEntry {
            role: HistoryRole::Sent,
            text: text.to_string(),
        });

        let delivery = if relay {
            Some(match self.client.send_chat(text, self.sender_name.as_deref()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to send message to WhatsApp: {e:#}");
                    SendOutcome {
                        success: false,
                        local_id: None,
                        message_id: None,
                        status: MessageStatus::Error,
                        error: Some(e.to_string()),
                    }
                }
            })
        } else {
            None
        };

        let reply = match self.client.assist(text, &self.history).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Assist request failed: {e:#}");
                CHAT_FALLBACK.to_string()
            }
        };
        self.history.push(HistoryEntry {
            role: HistoryRole::Received,
            text: reply.clone(),
        });

        Exchange { delivery, reply }
    }
}

// ============================================================================
// Mailbox poller
// ============================================================================

pub struct MailboxPoller {
    client: StorefrontClient,
    interval: Duration,
    retention: Duration,
    /// id -> when it was first shown
    seen: HashMap<String, Instant>,
}

impl MailboxPoller {
    pub fn new(client: StorefrontClient, interval: Duration) -> Self {
        MailboxPoller {
            client,
            interval,
            retention: SEEN_RETENTION,
            seen: HashMap::new(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn forget_old_ids(&mut self) {
        let retention = self.retention;
        self.seen.retain(|_, first_seen| first_seen.elapsed() < retention);
    }

    /// One poll; returns only messages not shown before
    pub async fn poll_once(&mut self) -> Result<Vec<ChatMessage>> {
        let drained = self.client.drain_messages().await?;
        self.forget_old_ids();

        let now = Instant::now();
        Ok(drained
            .into_iter()
            .filter(|m| self.seen.insert(m.id.clone(), now).is_none())
            .collect())
    }

    /// Poll until the receiving side goes away; poll errors are logged and skipped
    pub async fn run(mut self, tx: mpsc::Sender<ChatMessage>) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;

            let fresh = match self.poll_once().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Error polling for messages: {e:#}");
                    continue;
                }
            };

            for message in fresh {
                debug!("New message {} from {}", message.id, message.sender_name);
                if tx.send(message).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_input_parse() {
        assert_eq!(ChatInput::parse("  hola "), Some(ChatInput::Message("hola")));
        assert_eq!(ChatInput::parse("/maya ¿medidas?"), Some(ChatInput::AskMaya("¿medidas?")));
        assert_eq!(ChatInput::parse("/maya   "), None);
        assert_eq!(ChatInput::parse("   "), None);
        assert_eq!(ChatInput::parse("/mayas"), Some(ChatInput::Message("/mayas")));
    }

    #[test]
    fn test_poller_forgets_ids_past_retention() {
        let mut poller = MailboxPoller::new(StorefrontClient::new("http://127.0.0.1:1"), DEFAULT_POLL_INTERVAL)
            .with_retention(Duration::from_secs(60));
        poller.seen.insert("recent".to_string(), Instant::now());
        if let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) {
            poller.seen.insert("old".to_string(), old);
        }

        poller.forget_old_ids();

        assert!(poller.seen.contains_key("recent"));
        assert!(!poller.seen.contains_key("old"));
    }
}
