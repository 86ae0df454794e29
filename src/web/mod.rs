//! HTTP surface of the storefront: inbound webhook, mailbox poll, chat relay,
//! AI assist, catalog/orders and the dev log panel.

mod api;
mod dev;
mod error;

pub use error::ApiError;

use crate::assist::{AiAssist, OpenAiChat, PromptModel};
use crate::config::Config;
use crate::event_log::EventLog;
use crate::mailbox::{InMemoryMailbox, Mailbox};
use crate::relay::{transport_for, ChatRelay};
use crate::status::MessageTracker;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Everything the handlers share
pub struct AppState {
    pub config: Config,
    pub mailbox: Arc<dyn Mailbox>,
    pub relay: ChatRelay,
    pub assist: AiAssist,
    pub tracker: MessageTracker,
    pub events: Arc<EventLog>,
}

impl AppState {
    /// Wire the production components from configuration
    pub fn from_config(config: Config, events: Arc<EventLog>) -> Self {
        let tracker = MessageTracker::new();
        let relay = ChatRelay::new(
            config.transport().map(transport_for),
            config.vendor_whatsapp_number.clone(),
            tracker.clone(),
            events.clone(),
        );

        let model: Option<Arc<dyn PromptModel>> = config.openai_api_key.as_deref().map(|key| {
            Arc::new(OpenAiChat::new(
                &config.openai_base_url,
                key,
                &config.openai_model,
                Duration::from_secs(config.ai_timeout_secs),
            )) as Arc<dyn PromptModel>
        });
        let assist = AiAssist::new(model, events.clone());

        AppState {
            config,
            mailbox: Arc::new(InMemoryMailbox::new()),
            relay,
            assist,
            tracker,
            events,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(api::health))
        .route("/api/webhook", post(api::webhook))
        .route("/api/messages", get(api::poll_messages))
        .route("/api/chat/send", post(api::send_chat))
        .route("/api/chat/status/:id", get(api::message_status))
        .route("/api/chat/assist", post(api::assist))
        .route("/api/catalog", get(api::catalog))
        .route("/api/products/:id/suggestions", get(api::suggestions))
        .route("/api/orders/quote", post(api::quote_order))
        .route("/api/orders", post(api::send_order));

    if state.config.dev_logger_enabled {
        app = app
            .route("/api/dev/logs", get(dev::recent_logs).delete(dev::clear_logs))
            .route("/api/dev/logs/stream", get(dev::stream_logs));
    }

    app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

/// Serve until `shutdown` resolves
pub async fn serve(
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Storefront listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
