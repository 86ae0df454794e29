//! # Feature: Evolution Inbox
//!
//! Pulls recent WhatsApp messages from the Evolution API and appends the ones
//! the customer should see to the mailbox. Messages we sent ourselves, empty
//! messages and ids already seen are skipped.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//! - **Toggleable**: true (runs only with the Evolution API configured)

use crate::config::EvolutionSettings;
use crate::event_log::EventLog;
use crate::mailbox::{ChatMessage, Mailbox, MessageStatus, Sender};
use crate::relay::{http_client, SEND_TIMEOUT};
use crate::status::MessageTracker;
use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const SOURCE: &str = "EvolutionInbox";

/// Seen ids older than this are forgotten
const SEEN_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub id: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub remote_jid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
}

impl MessageContent {
    fn text(&self) -> Option<&str> {
        self.conversation
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.extended_text_message.as_ref()?.text.as_deref())
            .filter(|t| !t.is_empty())
    }
}

/// A message record as returned by Evolution's `findMessages`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub message_timestamp: i64,
    #[serde(default)]
    pub push_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindMessagesReply {
    List(Vec<EvolutionMessage>),
    Paged { messages: Records },
}

#[derive(Deserialize)]
struct Records {
    records: Vec<EvolutionMessage>,
}

pub struct EvolutionInbox {
    client: reqwest::Client,
    settings: EvolutionSettings,
    vendor_number: String,
    mailbox: Arc<dyn Mailbox>,
    tracker: MessageTracker,
    events: Arc<EventLog>,
    /// id -> epoch seconds when first seen
    seen: DashMap<String, i64>,
}

impl EvolutionInbox {
    pub fn new(
        settings: EvolutionSettings,
        vendor_number: &str,
        mailbox: Arc<dyn Mailbox>,
        tracker: MessageTracker,
        events: Arc<EventLog>,
    ) -> Self {
        EvolutionInbox {
            client: http_client(SEND_TIMEOUT),
            settings,
            vendor_number: vendor_number.to_string(),
            mailbox,
            tracker,
            events,
            seen: DashMap::new(),
        }
    }

    /// Bound each Evolution request by `timeout` instead of the default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Turn fetched records (newest first) into new chat messages, oldest first
    pub fn select_new(&self, fetched: &[EvolutionMessage]) -> Vec<ChatMessage> {
        let mut batch = HashSet::new();
        let mut fresh = Vec::new();

        for msg in fetched.iter().rev() {
            if msg.key.from_me || self.seen.contains_key(&msg.key.id) || !batch.insert(&msg.key.id) {
                continue;
            }
            let Some(text) = msg.message.as_ref().and_then(|m| m.text()) else {
                continue;
            };

            fresh.push(ChatMessage {
                id: msg.key.id.clone(),
                text: text.to_string(),
                sender: Sender::WhatsApp,
                sender_name: msg.push_name.clone().unwrap_or_else(|| "WhatsApp".to_string()),
                timestamp: msg.message_timestamp * 1000,
                status: MessageStatus::Delivered,
            });
        }

        fresh
    }

    /// Append in order; an id counts as seen only once its push succeeded, so
    /// whatever is left after a failure comes back on the next poll
    async fn deliver(&self, fresh: Vec<ChatMessage>) -> Result<usize> {
        let mut queued = 0;
        for message in fresh {
            let id = message.id.clone();
            self.mailbox.push(message).await?;
            self.seen.insert(id.clone(), Utc::now().timestamp());
            self.tracker.record_delivered(&id);
            queued += 1;
        }
        Ok(queued)
    }

    async fn fetch(&self) -> Result<Vec<EvolutionMessage>> {
        let url = format!(
            "{}/chat/findMessages/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.instance
        );
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.settings.api_key)
            .json(&json!({
                "where": { "key": { "remoteJid": format!("{}@s.whatsapp.net", self.vendor_number) } }
            }))
            .send()
            .await
            .context("Failed to connect to Evolution API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Evolution API error ({}): {}", status, body);
        }

        let reply: FindMessagesReply = response
            .json()
            .await
            .context("Failed to parse Evolution API response")?;

        Ok(match reply {
            FindMessagesReply::List(list) => list,
            FindMessagesReply::Paged { messages } => messages.records,
        })
    }

    /// One fetch-and-append round; returns how many messages were queued
    pub async fn poll_once(&self) -> Result<usize> {
        let fetched = self.fetch().await?;
        let count = self.deliver(self.select_new(&fetched)).await?;

        if count > 0 {
            self.events.info(SOURCE, "Queued new WhatsApp messages.", Some(json!({ "count": count })));
        }
        Ok(count)
    }

    fn forget_old_ids(&self) {
        let cutoff = Utc::now().timestamp() - SEEN_RETENTION_HOURS * 3600;
        self.seen.retain(|_, first_seen| *first_seen >= cutoff);
    }

    /// Poll forever at `interval`; failures are logged and the loop keeps going
    pub async fn run(self: Arc<Self>, interval: Duration) {
        debug!("Evolution inbox poller started ({:?} interval)", interval);

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            if let Err(e) = self.poll_once().await {
                warn!("Evolution inbox poll failed: {e:#}");
                self.events.error(SOURCE, "Error fetching WhatsApp messages.", Some(json!({ "error": e.to_string() })));
            }
            self.forget_old_ids();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::InMemoryMailbox;

    fn inbox_with(mailbox: Arc<dyn Mailbox>) -> EvolutionInbox {
        EvolutionInbox::new(
            EvolutionSettings {
                api_url: "http://127.0.0.1:1".to_string(),
                instance: "trama".to_string(),
                api_key: "k".to_string(),
            },
            "5491100000000",
            mailbox,
            MessageTracker::new(),
            Arc::new(EventLog::new()),
        )
    }

    fn inbox() -> EvolutionInbox {
        inbox_with(Arc::new(InMemoryMailbox::new()))
    }

    /// Accepts `capacity` messages, then refuses every push
    struct FullMailbox {
        inner: InMemoryMailbox,
        capacity: usize,
    }

    #[async_trait::async_trait]
    impl Mailbox for FullMailbox {
        async fn push(&self, message: ChatMessage) -> Result<()> {
            if self.inner.len().await? >= self.capacity {
                anyhow::bail!("mailbox full");
            }
            self.inner.push(message).await
        }

        async fn drain(&self) -> Result<Vec<ChatMessage>> {
            self.inner.drain().await
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }
    }

    fn records() -> Vec<EvolutionMessage> {
        serde_json::from_value(json!([
            { "key": { "id": "C", "fromMe": false }, "message": { "extendedTextMessage": { "text": "tercero" } }, "messageTimestamp": 30, "pushName": "Vendedora" },
            { "key": { "id": "B", "fromMe": true }, "message": { "conversation": "nuestro" }, "messageTimestamp": 20 },
            { "key": { "id": "E", "fromMe": false }, "messageTimestamp": 15 },
            { "key": { "id": "A", "fromMe": false }, "message": { "conversation": "primero" }, "messageTimestamp": 10 }
        ]))
        .unwrap()
    }

    #[test]
    fn test_select_new_filters_and_orders_oldest_first() {
        let inbox = inbox();
        let fresh = inbox.select_new(&records());

        let texts: Vec<_> = fresh.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["primero", "tercero"]);
        assert_eq!(fresh[0].timestamp, 10_000);
        assert_eq!(fresh[0].sender_name, "WhatsApp");
        assert_eq!(fresh[1].sender_name, "Vendedora");
        assert!(fresh.iter().all(|m| m.status == MessageStatus::Delivered));
    }

    #[tokio::test]
    async fn test_delivered_ids_are_skipped_next_time() {
        let inbox = inbox();
        let fresh = inbox.select_new(&records());
        assert_eq!(fresh.len(), 2);
        assert_eq!(inbox.deliver(fresh).await.unwrap(), 2);

        assert!(inbox.select_new(&records()).is_empty());
        let queued = inbox.mailbox.drain().await.unwrap();
        assert_eq!(queued.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["A", "C"]);
        assert_eq!(inbox.tracker.get("A").unwrap().status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failed_push_leaves_rest_for_next_poll() {
        let inbox = inbox_with(Arc::new(FullMailbox {
            inner: InMemoryMailbox::new(),
            capacity: 1,
        }));

        assert!(inbox.deliver(inbox.select_new(&records())).await.is_err());

        // "A" went in; "C" was never queued and is offered again
        let retry = inbox.select_new(&records());
        assert_eq!(retry.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_select_new_drops_duplicate_ids_in_one_batch() {
        let inbox = inbox();
        let mut fetched = records();
        fetched.push(fetched[3].clone());

        assert_eq!(inbox.select_new(&fetched).len(), 2);
    }

    #[test]
    fn test_paged_reply_shape() {
        let reply: FindMessagesReply = serde_json::from_value(json!({
            "messages": { "total": 1, "pages": 1, "currentPage": 1, "records": [
                { "key": { "id": "A" }, "message": { "conversation": "hola" }, "messageTimestamp": 1 }
            ]}
        }))
        .unwrap();

        assert!(matches!(reply, FindMessagesReply::Paged { ref messages } if messages.records.len() == 1));
    }
}
