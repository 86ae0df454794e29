// Domain
pub mod catalog;
pub mod order;

// Messaging
pub mod inbox;
pub mod mailbox;
pub mod relay;
pub mod status;

// AI
pub mod assist;

// Infrastructure
pub mod config;
pub mod event_log;

// Surfaces
pub mod client;
pub mod web;

pub use config::Config;
pub use event_log::EventLog;
pub use mailbox::{ChatMessage, InMemoryMailbox, Mailbox, MessageStatus};
pub use relay::{ChatRelay, SendOutcome};
pub use status::MessageTracker;
pub use web::AppState;
