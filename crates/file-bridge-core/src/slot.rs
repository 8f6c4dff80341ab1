//! Single-assignment result cell for an outstanding request.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

/// Observable state of a pending slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// No completion yet.
    Pending,
    /// The agent replied with these bytes.
    Resolved(Bytes),
    /// The connection carrying the request went away.
    Cancelled,
    /// The waiter gave up.
    TimedOut,
}

/// Create a connected resolver/slot pair.
#[must_use]
pub fn pending_slot() -> (SlotResolver, PendingSlot) {
    let (tx, rx) = oneshot::channel();
    (SlotResolver { tx }, PendingSlot { rx })
}

/// Completing half, held by the registry until the reply arrives.
///
/// Consuming `self` makes completion single-assignment.
#[derive(Debug)]
pub struct SlotResolver {
    tx: oneshot::Sender<SlotState>,
}

impl SlotResolver {
    /// Complete the slot with the agent's reply.
    ///
    /// Returns false if the waiter is already gone.
    pub fn resolve(self, data: Bytes) -> bool {
        self.tx.send(SlotState::Resolved(data)).is_ok()
    }

    /// Complete the slot as cancelled.
    pub fn cancel(self) -> bool {
        self.tx.send(SlotState::Cancelled).is_ok()
    }
}

/// Waiting half, held by the caller.
#[derive(Debug)]
pub struct PendingSlot {
    rx: oneshot::Receiver<SlotState>,
}

impl PendingSlot {
    /// Wait for the slot to complete, giving up after `timeout`.
    ///
    /// A resolver dropped without completing counts as a cancellation.
    pub async fn wait(self, timeout: Duration) -> SlotState {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(state)) => state,
            Ok(Err(_)) => SlotState::Cancelled,
            Err(_) => SlotState::TimedOut,
        }
    }
}
