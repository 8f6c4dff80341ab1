//! Client-facing request headers and response bodies.

use serde::{Deserialize, Serialize};

/// Header carrying the session token on every client request.
pub const TOKEN_HEADER: &str = "x-auth-token";

/// Commands understood by agents.
pub mod command {
    pub const LIST: &str = "LIST";
    pub const GET: &str = "GET";
    pub const PUT: &str = "PUT";
    pub const EXECUTE: &str = "EXECUTE";
}

/// Longest filename accepted by the download route.
pub const MAX_FILENAME_LEN: usize = 255;

/// Body of `GET /ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    pub version: String,
}

impl PingResponse {
    /// Liveness reply carrying the crate version.
    #[must_use]
    pub fn current() -> Self {
        Self {
            ok: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub agent_connected: bool,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
