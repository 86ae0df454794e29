//! # Feature: Event Logger
//!
//! Process-wide publish/subscribe sink for debugging events. Every record is
//! mirrored to the `log` facade, kept in a small ring for the dev panel and
//! broadcast to live subscribers.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true (dev panel routes only)
//!
//! ## Changelog
//! - 1.1.0: Live subscription over a broadcast channel
//! - 1.0.0: Initial ring buffer of recent events

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Number of records the dev panel keeps
pub const RECENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub source: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub struct EventLog {
    sender: broadcast::Sender<LogRecord>,
    recent: Mutex<VecDeque<LogRecord>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(RECENT_CAPACITY);
        EventLog {
            sender,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
        }
    }

    /// Publish an event
    pub fn record(&self, source: &str, level: EventLevel, message: &str, data: Option<Value>) {
        match level {
            EventLevel::Error => log::error!("[{source}] {message}"),
            EventLevel::Info | EventLevel::Success => log::info!("[{source}] {message}"),
        }
        if let Some(ref data) = data {
            log::debug!("[{source}] data: {data}");
        }

        let record = LogRecord {
            timestamp: Utc::now().to_rfc3339(),
            source: source.to_string(),
            level,
            message: message.to_string(),
            data,
        };

        if let Ok(mut recent) = self.recent.lock() {
            recent.push_front(record.clone());
            recent.truncate(RECENT_CAPACITY);
        }

        // no subscribers is fine
        let _ = self.sender.send(record);
    }

    pub fn info(&self, source: &str, message: &str, data: Option<Value>) {
        self.record(source, EventLevel::Info, message, data);
    }

    pub fn success(&self, source: &str, message: &str, data: Option<Value>) {
        self.record(source, EventLevel::Success, message, data);
    }

    pub fn error(&self, source: &str, message: &str, data: Option<Value>) {
        self.record(source, EventLevel::Error, message, data);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Recent records, newest first
    pub fn recent(&self) -> Vec<LogRecord> {
        self.recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut recent) = self.recent.lock() {
            recent.clear();
        }
    }
}

static GLOBAL: Lazy<Arc<EventLog>> = Lazy::new(|| Arc::new(EventLog::new()));

/// The process-wide event log
pub fn global() -> Arc<EventLog> {
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let log = EventLog::new();
        for i in 0..(RECENT_CAPACITY + 5) {
            log.info("test", &format!("event {i}"), None);
        }

        let recent = log.recent();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent[0].message, format!("event {}", RECENT_CAPACITY + 4));
        assert_eq!(recent.last().unwrap().message, "event 5");
    }

    #[tokio::test]
    async fn test_subscribers_receive_records() {
        let log = EventLog::new();
        let mut rx = log.subscribe();

        log.error("Relay", "send failed", Some(json!({"status": 500})));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.source, "Relay");
        assert_eq!(record.level, EventLevel::Error);
        assert_eq!(record.data, Some(json!({"status": 500})));
    }

    #[test]
    fn test_clear() {
        let log = EventLog::new();
        log.success("test", "done", None);
        log.clear();
        assert!(log.recent().is_empty());
    }

    #[test]
    fn test_level_wire_names() {
        let json = serde_json::to_value(EventLevel::Success).unwrap();
        assert_eq!(json, json!("success"));
    }
}
