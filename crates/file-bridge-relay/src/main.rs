//! File bridge relay.
//!
//! Agents connect to `/ws` and send their session token as the first
//! message; HTTP clients call `/list`, `/upload`, `/download/{filename}` and
//! `/execute` with the same token in the `x-auth-token` header.
//!
//! Run with: cargo run -p file-bridge-relay

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use file_bridge_core::SessionRegistry;
use file_bridge_transport::{AppState, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{RelayArgs, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::from(RelayArgs::parse());
    if config.bridge.required_token.is_none() {
        tracing::warn!("BRIDGE_TOKEN is not set; any session token is accepted");
    }

    let registry = Arc::new(SessionRegistry::new());
    let state = AppState::new(
        Arc::clone(&registry),
        config.bridge.clone(),
        config.max_upload_bytes,
    );
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        max_upload_bytes = config.max_upload_bytes,
        call_timeout = ?config.bridge.call_timeout,
        "Relay listening on http://{}",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!(
        connected_agents = registry.connected_count(),
        "Relay shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
