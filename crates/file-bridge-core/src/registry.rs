//! Session registry: token → live agent connection, gate and pending slot.
//!
//! Sessions are created lazily and never removed, so the single-flight gate
//! of a token outlives any connection that claims it. All state for one
//! session sits behind one short-lived `std::sync::Mutex` that is never held
//! across an await.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tokio::sync::OwnedMutexGuard;

use crate::{
    Frame,
    link::{AgentLink, ConnectionId, LinkError},
    slot::SlotResolver,
};

/// Shared handle to a registered agent connection.
#[derive(Clone)]
pub struct AgentHandle {
    id: ConnectionId,
    link: Arc<dyn AgentLink>,
}

impl AgentHandle {
    /// Wrap a link under the given connection id.
    #[must_use]
    pub fn new(id: ConnectionId, link: Arc<dyn AgentLink>) -> Self {
        Self { id, link }
    }

    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send one frame to the agent.
    ///
    /// # Errors
    /// Returns error if the link is closed.
    pub async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        self.link.send(frame).await
    }

    /// Close the underlying connection.
    ///
    /// # Errors
    /// Returns error if the link is already closed.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), LinkError> {
        self.link.close(code, reason).await
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("id", &self.id).finish()
    }
}

/// Identifier of one installed pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Outcome of delivering an agent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiting caller received the data.
    Resolved,
    /// No request is outstanding for this connection.
    NoPendingSlot,
    /// A slot was registered but its caller already gave up.
    Abandoned,
}

struct PendingEntry {
    id: SlotId,
    connection: ConnectionId,
    resolver: SlotResolver,
}

#[derive(Default)]
struct SessionState {
    connection: Option<AgentHandle>,
    pending: Option<PendingEntry>,
}

struct Session {
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<SessionState>,
}

impl Session {
    fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide registry of agent sessions.
///
/// Construct once at startup and share it through an `Arc`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_slot: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, token: &str) -> Arc<Session> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(token) {
            return Arc::clone(session);
        }
        let session = Arc::new(Session::new());
        sessions.insert(token.to_string(), Arc::clone(&session));
        session
    }

    fn existing(&self, token: &str) -> Option<Arc<Session>> {
        self.sessions().get(token).cloned()
    }

    /// Register `handle` as the live connection for `token`.
    ///
    /// Last writer wins: any previous connection is replaced and returned.
    pub fn register(&self, token: &str, handle: AgentHandle) -> Option<AgentHandle> {
        self.session(token).state().connection.replace(handle)
    }

    /// Remove the connection for `token`, but only if it is still `id`.
    ///
    /// A stale disconnect racing a fresh reconnect under the same token
    /// leaves the fresh connection in place.
    pub fn unregister(&self, token: &str, id: ConnectionId) -> bool {
        let Some(session) = self.existing(token) else {
            return false;
        };
        let mut state = session.state();
        if state.connection.as_ref().is_some_and(|c| c.id == id) {
            state.connection = None;
            true
        } else {
            false
        }
    }

    /// Live connection for `token`.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<AgentHandle> {
        self.existing(token)?.state().connection.clone()
    }

    /// Whether an agent is connected for `token`.
    #[must_use]
    pub fn is_connected(&self, token: &str) -> bool {
        self.existing(token)
            .is_some_and(|session| session.state().connection.is_some())
    }

    /// Number of sessions with a live connection.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.sessions()
            .values()
            .filter(|session| session.state().connection.is_some())
            .count()
    }

    /// Acquire the single-flight gate of `token`.
    pub async fn acquire_gate(&self, token: &str) -> OwnedMutexGuard<()> {
        let gate = Arc::clone(&self.session(token).gate);
        gate.lock_owned().await
    }

    /// Install `resolver` as the pending slot of `token`, bound to the
    /// currently registered connection.
    ///
    /// Returns the connection the request must be sent on, or `None` if no
    /// agent is connected. Callers must hold the session's gate. A leftover
    /// slot here means a previous call skipped its cleanup; it is cancelled.
    pub fn bind_slot(&self, token: &str, resolver: SlotResolver) -> Option<(AgentHandle, SlotId)> {
        let session = self.existing(token)?;
        let mut state = session.state();
        let handle = state.connection.clone()?;

        let id = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
        let stale = state.pending.replace(PendingEntry {
            id,
            connection: handle.id,
            resolver,
        });
        drop(state);

        if let Some(stale) = stale {
            tracing::warn!(slot = ?stale.id, "Cancelling stale pending slot");
            stale.resolver.cancel();
        }
        Some((handle, id))
    }

    /// Remove the pending slot of `token` if it is still `slot`.
    pub fn clear_slot(&self, token: &str, slot: SlotId) -> bool {
        let Some(session) = self.existing(token) else {
            return false;
        };
        let mut state = session.state();
        if state.pending.as_ref().is_some_and(|p| p.id == slot) {
            state.pending = None;
            true
        } else {
            false
        }
    }

    /// Hand a data frame from connection `from` to the pending slot of `token`.
    ///
    /// Only a slot whose request went out on `from` is resolved; the first
    /// delivery consumes it, so later frames find no slot and are dropped.
    pub fn deliver(&self, token: &str, from: ConnectionId, data: Bytes) -> Delivery {
        let Some(session) = self.existing(token) else {
            return Delivery::NoPendingSlot;
        };
        let Some(entry) = Self::take_bound(&session, from) else {
            return Delivery::NoPendingSlot;
        };
        if entry.resolver.resolve(data) {
            Delivery::Resolved
        } else {
            Delivery::Abandoned
        }
    }

    /// Cancel the pending slot of `token` if its request went out on `from`.
    pub fn cancel_pending(&self, token: &str, from: ConnectionId) -> bool {
        let Some(session) = self.existing(token) else {
            return false;
        };
        Self::take_bound(&session, from).is_some_and(|entry| entry.resolver.cancel())
    }

    fn take_bound(session: &Session, from: ConnectionId) -> Option<PendingEntry> {
        let mut state = session.state();
        if state.pending.as_ref().is_some_and(|p| p.connection == from) {
            state.pending.take()
        } else {
            None
        }
    }

    /// Whether a request is outstanding for `token`.
    #[must_use]
    pub fn has_pending(&self, token: &str) -> bool {
        self.existing(token)
            .is_some_and(|session| session.state().pending.is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::slot::{SlotState, pending_slot};

    /// Link that records sent frames on a channel.
    pub(crate) struct ChannelLink {
        tx: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl AgentLink for ChannelLink {
        async fn send(&self, frame: Frame) -> Result<(), LinkError> {
            self.tx.send(frame).map_err(|_| LinkError::Closed)
        }

        async fn close(&self, _code: u16, _reason: &str) -> Result<(), LinkError> {
            Ok(())
        }
    }

    pub(crate) fn channel_handle() -> (AgentHandle, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            AgentHandle::new(ConnectionId::new(), Arc::new(ChannelLink { tx })),
            rx,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        let id = handle.id();

        assert!(!registry.is_connected("t"));
        assert!(registry.register("t", handle).is_none());
        assert!(registry.is_connected("t"));
        assert_eq!(registry.lookup("t").map(|h| h.id()), Some(id));
        assert!(registry.lookup("other").is_none());
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_stale_unregister_keeps_new_connection() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = channel_handle();
        let (new, _new_rx) = channel_handle();
        let (old_id, new_id) = (old.id(), new.id());

        registry.register("t", old);
        let replaced = registry.register("t", new);
        assert_eq!(replaced.map(|h| h.id()), Some(old_id));

        assert!(!registry.unregister("t", old_id));
        assert!(registry.is_connected("t"));
        assert_eq!(registry.lookup("t").map(|h| h.id()), Some(new_id));

        assert!(registry.unregister("t", new_id));
        assert!(!registry.is_connected("t"));
    }

    #[test]
    fn test_bind_slot_requires_connection() {
        let registry = SessionRegistry::new();
        let (resolver, _slot) = pending_slot();
        assert!(registry.bind_slot("t", resolver).is_none());
        assert!(!registry.has_pending("t"));
    }

    #[tokio::test]
    async fn test_deliver_only_from_bound_connection() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        let id = handle.id();
        registry.register("t", handle);

        let (resolver, slot) = pending_slot();
        registry.bind_slot("t", resolver).unwrap();

        let stranger = ConnectionId::new();
        assert_eq!(
            registry.deliver("t", stranger, Bytes::from_static(b"nope")),
            Delivery::NoPendingSlot
        );
        assert_eq!(
            registry.deliver("t", id, Bytes::from_static(b"yes")),
            Delivery::Resolved
        );
        assert_eq!(
            registry.deliver("t", id, Bytes::from_static(b"again")),
            Delivery::NoPendingSlot
        );
        assert_eq!(
            slot.wait(Duration::from_secs(1)).await,
            SlotState::Resolved(Bytes::from_static(b"yes"))
        );
    }

    #[tokio::test]
    async fn test_clear_slot_only_clears_own_slot() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        registry.register("t", handle);

        let (first, _first_slot) = pending_slot();
        let (_, first_id) = registry.bind_slot("t", first).unwrap();
        assert!(registry.clear_slot("t", first_id));

        let (second, _second_slot) = pending_slot();
        let (_, second_id) = registry.bind_slot("t", second).unwrap();
        assert!(!registry.clear_slot("t", first_id));
        assert!(registry.has_pending("t"));
        assert!(registry.clear_slot("t", second_id));
        assert!(!registry.has_pending("t"));
    }

    #[tokio::test]
    async fn test_stale_slot_is_cancelled_on_rebind() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        registry.register("t", handle);

        let (stale, stale_slot) = pending_slot();
        registry.bind_slot("t", stale).unwrap();
        let (fresh, _fresh_slot) = pending_slot();
        registry.bind_slot("t", fresh).unwrap();

        assert_eq!(
            stale_slot.wait(Duration::from_secs(1)).await,
            SlotState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        let id = handle.id();
        registry.register("t", handle);

        let (resolver, slot) = pending_slot();
        registry.bind_slot("t", resolver).unwrap();

        assert!(!registry.cancel_pending("t", ConnectionId::new()));
        assert!(registry.cancel_pending("t", id));
        assert!(!registry.has_pending("t"));
        assert_eq!(slot.wait(Duration::from_secs(1)).await, SlotState::Cancelled);
    }

    #[tokio::test]
    async fn test_gate_survives_disconnect() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = channel_handle();
        let id = handle.id();
        registry.register("t", handle);

        let guard = registry.acquire_gate("t").await;
        registry.unregister("t", id);

        let mut waiter = tokio_test::task::spawn(registry.acquire_gate("t"));
        tokio_test::assert_pending!(waiter.poll());
        drop(guard);
        assert!(waiter.is_woken());
        let _guard = tokio_test::assert_ready!(waiter.poll());
    }
}
