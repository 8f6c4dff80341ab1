//! Per-connection state machine: `Handshaking -> Active -> Closed`.
//!
//! The handler is transport-agnostic. It reads frames from any `Stream` and
//! writes through an [`AgentLink`], so each transition can be driven directly
//! in tests.

use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::{
    BridgeConfig, Frame,
    link::{AgentLink, CLOSE_POLICY_VIOLATION, ConnectionId, LinkError},
    registry::{AgentHandle, Delivery, SessionRegistry},
};

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the session token.
    Handshaking,
    /// Registered for `token` and relaying frames.
    Active { token: String },
    /// Terminal.
    Closed,
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("No session token within {0:?}")]
    Timeout(Duration),
    #[error("Connection ended before the handshake")]
    StreamEnded,
    #[error("Handshake frame is not text")]
    NotText,
    #[error("Empty session token")]
    EmptyToken,
    #[error("Session token rejected")]
    Rejected,
    #[error("Read failed during handshake: {0}")]
    Read(LinkError),
    #[error("Handshake already completed")]
    AlreadyDone,
}

/// What the handler did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Keepalive answered.
    Pong,
    /// Handed to the waiting caller.
    Delivered,
    /// No caller was waiting; the frame was discarded.
    Dropped,
    /// The connection is not active.
    Ignored,
}

/// Drives one agent connection.
pub struct ConnectionHandler {
    handle: AgentHandle,
    registry: Arc<SessionRegistry>,
    config: BridgeConfig,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Create a handler for a freshly accepted connection.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        link: Arc<dyn AgentLink>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            handle: AgentHandle::new(ConnectionId::new(), link),
            registry,
            config,
            state: ConnectionState::Handshaking,
        }
    }

    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Session token, once active.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Active { token } => Some(token),
            _ => None,
        }
    }

    /// Run the connection to completion.
    ///
    /// Waits for the handshake, then relays frames until the stream ends or
    /// yields an error. Cleanup happens on every exit path.
    ///
    /// # Errors
    /// Returns the reason the handshake was refused.
    pub async fn run<S>(mut self, mut inbound: S) -> Result<(), HandshakeError>
    where
        S: Stream<Item = Result<Frame, LinkError>> + Unpin + Send,
    {
        let timeout = self.config.handshake_timeout;
        let first = match tokio::time::timeout(timeout, inbound.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Err(self.reject(HandshakeError::Read(e)).await),
            Ok(None) => return Err(self.reject(HandshakeError::StreamEnded).await),
            Err(_) => return Err(self.reject(HandshakeError::Timeout(timeout)).await),
        };
        self.handshake(first).await?;

        while let Some(next) = inbound.next().await {
            match next {
                Ok(frame) => {
                    self.on_frame(frame).await;
                }
                Err(e) => {
                    tracing::error!(connection = %self.id(), "Agent read error: {e}");
                    break;
                }
            }
        }

        self.close();
        Ok(())
    }

    /// Handle the first frame of the connection as the session token.
    ///
    /// On success the connection is registered and becomes active. On failure
    /// the link is closed with a policy-violation code and nothing is
    /// registered.
    ///
    /// # Errors
    /// Returns why the token was refused.
    pub async fn handshake(&mut self, frame: Frame) -> Result<(), HandshakeError> {
        if self.state != ConnectionState::Handshaking {
            return Err(HandshakeError::AlreadyDone);
        }

        let token = match frame {
            Frame::Text(token) if token.is_empty() => {
                return Err(self.reject(HandshakeError::EmptyToken).await);
            }
            Frame::Text(token) => token,
            Frame::Binary(_) => return Err(self.reject(HandshakeError::NotText).await),
        };
        if !self.config.admits(&token) {
            return Err(self.reject(HandshakeError::Rejected).await);
        }

        if let Some(replaced) = self.registry.register(&token, self.handle.clone()) {
            tracing::warn!(
                connection = %self.id(),
                replaced = %replaced.id(),
                "Agent connection replaced an existing one for the same session"
            );
        }
        tracing::info!(connection = %self.id(), "Agent connected");
        self.state = ConnectionState::Active { token };
        Ok(())
    }

    async fn reject(&mut self, err: HandshakeError) -> HandshakeError {
        tracing::warn!(connection = %self.id(), "Agent handshake failed: {err}");
        self.state = ConnectionState::Closed;
        if let Err(e) = self
            .handle
            .close(CLOSE_POLICY_VIOLATION, "handshake failed")
            .await
        {
            tracing::debug!(connection = %self.id(), "Close after failed handshake: {e}");
        }
        err
    }

    /// Handle one inbound frame while active.
    pub async fn on_frame(&mut self, frame: Frame) -> FrameDisposition {
        let ConnectionState::Active { token } = &self.state else {
            return FrameDisposition::Ignored;
        };

        if frame.is_ping() {
            if let Err(e) = self.handle.send(Frame::pong()).await {
                tracing::warn!(connection = %self.id(), "Failed to answer ping: {e}");
            }
            return FrameDisposition::Pong;
        }

        let len = frame.len();
        match self.registry.deliver(token, self.handle.id(), frame.into_bytes()) {
            Delivery::Resolved => FrameDisposition::Delivered,
            Delivery::NoPendingSlot | Delivery::Abandoned => {
                tracing::debug!(connection = %self.id(), bytes = len, "Dropping unsolicited frame");
                FrameDisposition::Dropped
            }
        }
    }

    /// Enter `Closed`: unregister this connection and cancel the request it
    /// was carrying.
    ///
    /// Returns false if the handler was already closed.
    pub fn close(&mut self) -> bool {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Closed);
        match previous {
            ConnectionState::Closed => false,
            ConnectionState::Handshaking => true,
            ConnectionState::Active { token } => {
                let id = self.handle.id();
                let unregistered = self.registry.unregister(&token, id);
                let cancelled = self.registry.cancel_pending(&token, id);
                tracing::info!(
                    connection = %id,
                    unregistered,
                    cancelled,
                    "Agent disconnected"
                );
                true
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.close();
    }
}
