//! Write side of an agent connection.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Frame;

/// Close code sent when the handshake is rejected (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Identity of one accepted agent connection.
///
/// Two connections claiming the same session token always have distinct ids,
/// which is what the registry compares when tearing a connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Link error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Link closed")]
    Closed,
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outbound half of an agent connection.
///
/// Implemented by the WebSocket transport; tests use in-memory channels.
#[async_trait]
pub trait AgentLink: Send + Sync {
    /// Send one frame to the agent.
    async fn send(&self, frame: Frame) -> Result<(), LinkError>;

    /// Close the connection with the given close code.
    async fn close(&self, code: u16, reason: &str) -> Result<(), LinkError>;
}
