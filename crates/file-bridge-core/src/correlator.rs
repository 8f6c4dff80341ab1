//! Single-flight request/response correlation.
//!
//! The wire protocol has no request identifiers, so each session carries at
//! most one outstanding request: the next data frame from the agent belongs
//! to it.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{
    BridgeConfig, BridgeError,
    frame::{encode_command, encode_payload},
    registry::{SessionRegistry, SlotId},
    slot::{SlotState, pending_slot},
};

/// Clears the pending slot when a call ends, including when the caller's
/// future is dropped mid-await.
struct SlotGuard<'a> {
    registry: &'a SessionRegistry,
    token: &'a str,
    slot: SlotId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.registry.clear_slot(self.token, self.slot);
    }
}

/// Forwards commands to agents and pairs each with the agent's reply.
#[derive(Clone)]
pub struct Correlator {
    registry: Arc<SessionRegistry>,
    call_timeout: Duration,
}

impl Correlator {
    /// Create a correlator over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, config: &BridgeConfig) -> Self {
        Self {
            registry,
            call_timeout: config.call_timeout,
        }
    }

    /// Shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Send `command` (and `payload`, if any) to the agent of `token` and
    /// wait for its reply with the configured timeout.
    ///
    /// # Errors
    /// See [`Correlator::call_with_timeout`].
    pub async fn call(
        &self,
        token: &str,
        command: &str,
        payload: Option<Bytes>,
    ) -> Result<Bytes, BridgeError> {
        self.call_with_timeout(token, command, payload, self.call_timeout)
            .await
    }

    /// Send `command` (and `payload`, if any) to the agent of `token` and
    /// wait up to `timeout` for its reply.
    ///
    /// Calls on the same token run one at a time; calls on different tokens
    /// are independent.
    ///
    /// # Errors
    /// - `SessionMissing` if `token` is empty
    /// - `AgentUnavailable` if no agent is connected
    /// - `AgentTimeout` if the agent does not reply in time
    /// - `AgentDisconnected` if the connection drops before the reply
    pub async fn call_with_timeout(
        &self,
        token: &str,
        command: &str,
        payload: Option<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes, BridgeError> {
        if token.is_empty() {
            return Err(BridgeError::SessionMissing);
        }
        if self.registry.lookup(token).is_none() {
            return Err(BridgeError::AgentUnavailable);
        }

        let _gate = self.registry.acquire_gate(token).await;

        // The agent may have left while we queued on the gate.
        let (resolver, slot) = pending_slot();
        let (agent, slot_id) = self
            .registry
            .bind_slot(token, resolver)
            .ok_or(BridgeError::AgentUnavailable)?;
        // Declared after `_gate`, so it drops (and clears the slot) first.
        let _slot_guard = SlotGuard {
            registry: &self.registry,
            token,
            slot: slot_id,
        };

        tracing::debug!(
            connection = %agent.id(),
            command,
            payload_bytes = payload.as_ref().map_or(0, Bytes::len),
            "Forwarding command to agent"
        );

        agent
            .send(encode_command(command))
            .await
            .map_err(|_| BridgeError::AgentDisconnected)?;
        if let Some(payload) = payload {
            agent
                .send(encode_payload(payload))
                .await
                .map_err(|_| BridgeError::AgentDisconnected)?;
        }

        match slot.wait(timeout).await {
            SlotState::Resolved(data) => Ok(data),
            SlotState::Cancelled | SlotState::Pending => Err(BridgeError::AgentDisconnected),
            SlotState::TimedOut => {
                tracing::warn!(connection = %agent.id(), command, "Agent call timed out");
                Err(BridgeError::AgentTimeout(timeout))
            }
        }
    }
}
