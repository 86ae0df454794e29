//! Storefront server entry point
//!
//! Serves the catalog, order relay, chat relay, inbound webhook and mailbox
//! poll. Configuration comes from config.yaml or environment variables.

use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use trama::config::TransportKind;
use trama::event_log;
use trama::inbox::EvolutionInbox;
use trama::web::{self, AppState};
use trama::Config;

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Auto-load configuration (YAML file or env vars)
    let config = Config::auto_load()?;

    // Set up logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!(
        "Starting Trama storefront v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH")
    );

    match config.transport() {
        Some(TransportKind::Automation { url }) => info!("Outbound transport: automation webhook {url}"),
        Some(TransportKind::Evolution(settings)) => {
            info!("Outbound transport: Evolution API instance {}", settings.instance)
        }
        None => warn!("No outbound transport configured; chat and orders will fail to send"),
    }
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; AI assist will answer with fallbacks only");
    }

    let state = Arc::new(AppState::from_config(config, event_log::global()));

    // Evict stale status entries in the background
    let tracker = state.tracker.clone();
    tokio::spawn(tracker.cleanup_task(state.config.message_status_ttl_minutes));

    // Pull WhatsApp replies straight from Evolution when it is configured
    if let Some(settings) = state.config.evolution() {
        let inbox = Arc::new(EvolutionInbox::new(
            settings,
            &state.config.vendor_whatsapp_number,
            state.mailbox.clone(),
            state.tracker.clone(),
            state.events.clone(),
        ));
        let interval = Duration::from_millis(state.config.inbox_poll_interval_ms);
        info!("Polling Evolution API for replies every {:?}", interval);
        tokio::spawn(inbox.run(interval));
    }

    web::serve(state, shutdown_signal()).await?;

    info!("Storefront shut down");
    Ok(())
}
