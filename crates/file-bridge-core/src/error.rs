//! Bridge error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Failure of a bridged call.
///
/// Everything except [`BridgeError::SessionMissing`] and
/// [`BridgeError::PayloadTooLarge`] is an agent-side failure; none of them is
/// retried by the relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("No session token supplied")]
    SessionMissing,
    #[error("No agent connected for this session")]
    AgentUnavailable,
    #[error("Agent did not reply within {0:?}")]
    AgentTimeout(Duration),
    #[error("Agent disconnected before replying")]
    AgentDisconnected,
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
}

impl BridgeError {
    /// Whether the caller should try again later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AgentUnavailable)
    }

    /// Whether the failure happened on the agent side rather than in the
    /// caller's input.
    #[must_use]
    pub const fn is_agent_failure(&self) -> bool {
        matches!(
            self,
            Self::AgentUnavailable | Self::AgentTimeout(_) | Self::AgentDisconnected
        )
    }
}
