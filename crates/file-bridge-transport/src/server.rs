//! Router assembly and shared handler state.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use file_bridge_core::{BridgeConfig, Correlator, SessionRegistry};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{api, websocket};

/// Default upload limit (25 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Room for multipart boundaries and part headers on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Correlator over the process-wide session registry.
    pub correlator: Correlator,
    /// Bridge settings (timeouts, required token).
    pub bridge: Arc<BridgeConfig>,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Create state over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        bridge: BridgeConfig,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            correlator: Correlator::new(registry, &bridge),
            bridge: Arc::new(bridge),
            max_upload_bytes,
        }
    }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.correlator.registry()
    }
}

/// Create the relay router: agent WebSocket at `/ws` plus the HTTP API.
///
/// # Example
/// ```ignore
/// let state = AppState::new(registry, BridgeConfig::default(), DEFAULT_MAX_UPLOAD_BYTES);
/// axum::serve(listener, create_router(state)).await?;
/// ```
#[must_use]
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/ping", get(api::ping))
        .route("/status", get(api::status))
        .route("/list", get(api::list_files))
        .route(
            "/upload",
            post(api::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/download/{filename}", get(api::download_file))
        .route("/execute", post(api::execute))
        .route("/ws", get(websocket::agent_ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
