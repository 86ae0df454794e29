//! # Feature: Message Status Tracking
//!
//! Tracks the delivery status of chat messages (`sending → sent | error`,
//! `delivered` for inbound) so the widget can look up how a send went.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false

use crate::mailbox::MessageStatus;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedMessage {
    pub id: String,
    pub status: MessageStatus,
    /// Id assigned by the messaging tool, once sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedMessage {
    fn new(id: &str, status: MessageStatus) -> Self {
        TrackedMessage {
            id: id.to_string(),
            status,
            remote_id: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl_minutes: i64) -> bool {
        Utc::now() - self.updated_at > Duration::minutes(ttl_minutes)
    }
}

/// Shared status table, cheap to clone
#[derive(Clone, Default)]
pub struct MessageTracker {
    messages: Arc<DashMap<String, TrackedMessage>>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an outbound message
    pub fn begin_send(&self, id: &str) {
        self.messages
            .insert(id.to_string(), TrackedMessage::new(id, MessageStatus::Sending));
    }

    pub fn mark_sent(&self, id: &str, remote_id: Option<String>) -> bool {
        self.transition(id, MessageStatus::Sent, |msg| msg.remote_id = remote_id)
    }

    pub fn mark_failed(&self, id: &str, reason: &str) -> bool {
        self.transition(id, MessageStatus::Error, |msg| msg.error = Some(reason.to_string()))
    }

    /// Inbound messages enter the table already delivered
    pub fn record_delivered(&self, id: &str) {
        self.messages
            .insert(id.to_string(), TrackedMessage::new(id, MessageStatus::Delivered));
    }

    pub fn get(&self, id: &str) -> Option<TrackedMessage> {
        self.messages.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn transition(&self, id: &str, next: MessageStatus, apply: impl FnOnce(&mut TrackedMessage)) -> bool {
        let Some(mut entry) = self.messages.get_mut(id) else {
            warn!("Status update for untracked message {id}");
            return false;
        };

        if !entry.status.can_transition_to(next) {
            warn!("Refusing status change {:?} -> {:?} for message {id}", entry.status, next);
            return false;
        }

        entry.status = next;
        entry.updated_at = Utc::now();
        apply(entry.value_mut());
        true
    }

    /// Drop entries untouched for longer than `ttl_minutes`; returns how many went
    pub fn evict_expired(&self, ttl_minutes: i64) -> usize {
        let mut evicted = 0;
        self.messages.retain(|_, msg| {
            let keep = !msg.is_expired(ttl_minutes);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Background cleanup loop
    pub async fn cleanup_task(self, ttl_minutes: i64) {
        debug!("MessageTracker cleanup task started");

        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await; // Run every 5 minutes

            let evicted = self.evict_expired(ttl_minutes);
            if evicted > 0 {
                debug!("Evicted {evicted} stale message status entries");
            }
        }
    }
}
