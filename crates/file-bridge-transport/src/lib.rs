//! Transport layer for the file bridge relay.
//!
//! Provides:
//! - Client request/response types (`protocol`)
//! - WebSocket endpoint for agents (feature: server)
//! - HTTP API forwarding LIST / GET / PUT / EXECUTE to agents (feature: server)

pub mod protocol;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod error;
#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub mod websocket;

pub use protocol::{PingResponse, StatusResponse, TOKEN_HEADER};

#[cfg(feature = "server")]
pub use error::ApiError;
#[cfg(feature = "server")]
pub use server::{AppState, DEFAULT_MAX_UPLOAD_BYTES, create_router};
