//! Bridge configuration.

use std::time::Duration;

/// Default time a call waits for the agent's reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time an accepted connection has to send its session token.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by the correlator and connection handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long a call waits for the agent's reply.
    pub call_timeout: Duration,

    /// How long a new connection has to complete the handshake.
    pub handshake_timeout: Duration,

    /// When set, the only session token accepted from agents and clients.
    pub required_token: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            required_token: None,
        }
    }
}

impl BridgeConfig {
    /// Require every session to present this token.
    #[must_use]
    pub fn with_required_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    /// Override the call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Whether `token` may be used as a session token.
    #[must_use]
    pub fn admits(&self, token: &str) -> bool {
        !token.is_empty()
            && self
                .required_token
                .as_deref()
                .is_none_or(|required| required == token)
    }
}
