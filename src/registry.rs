//! Session registry: the bidirectional session-id/client-id maps plus
//! per-session buffers, shared by the `/proxy` and `/call` endpoints.
//!
//! A single mutex serializes all mutations; critical sections only ever
//! touch the maps themselves, never audio payloads, matching the
//! lock-narrow-methods shape this lineage's own call manager uses for its
//! participant maps.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Mutex};

use crate::handle::Handle;

/// Per-session state beyond the inbound buffer; `/proxy` has none,
/// `/call` layers a downstream merge buffer and audio descriptor on top.
pub trait SessionExtra: Default + Send + Sync + 'static {}
impl<T: Default + Send + Sync + 'static> SessionExtra for T {}

struct SessionState<Extra> {
    client_id: Handle,
    inbound: Vec<u8>,
    extra: Extra,
}

struct Inner<Extra> {
    sessions: HashMap<Handle, SessionState<Extra>>,
    session_to_client: HashMap<Handle, Handle>,
    client_to_session: HashMap<Handle, Handle>,
    clients: HashMap<Handle, mpsc::Sender<Message>>,
    backend: Option<Handle>,
}

impl<Extra> Default for Inner<Extra> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            session_to_client: HashMap::new(),
            client_to_session: HashMap::new(),
            clients: HashMap::new(),
            backend: None,
        }
    }
}

pub struct StatusSummary {
    pub session_count: usize,
    pub client_count: usize,
    pub backend_registered: bool,
    pub buffer_sizes: Vec<(String, usize)>,
}

pub struct CleanupReport {
    pub orphans_removed: usize,
    pub dead_clients_removed: usize,
}

pub struct Registry<Extra> {
    inner: Mutex<Inner<Extra>>,
}

impl<Extra: SessionExtra> Default for Registry<Extra> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl<Extra: SessionExtra> Registry<Extra> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend socket for this endpoint. Fails if one is
    /// already registered (invariant 1).
    pub async fn register_backend(&self, backend_id: Handle) -> Result<(), ()> {
        let mut inner = self.inner.lock().await;
        if inner.backend.is_some() {
            return Err(());
        }
        inner.backend = Some(backend_id);
        Ok(())
    }

    pub async fn unregister_backend(&self, backend_id: Handle) {
        let mut inner = self.inner.lock().await;
        if inner.backend == Some(backend_id) {
            inner.backend = None;
        }
    }

    pub async fn is_backend_registered(&self) -> bool {
        self.inner.lock().await.backend.is_some()
    }

    /// Insert a new session, establishing both directions of the mapping
    /// plus its client sender and initial extra state together.
    pub async fn insert_session(
        &self,
        session_id: Handle,
        client_id: Handle,
        client_tx: mpsc::Sender<Message>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.session_to_client.insert(session_id, client_id);
        inner.client_to_session.insert(client_id, session_id);
        inner.clients.insert(client_id, client_tx);
        inner.sessions.insert(
            session_id,
            SessionState {
                client_id,
                inbound: Vec::new(),
                extra: Extra::default(),
            },
        );
    }

    /// Remove a session and everything derived from it (both mapping
    /// directions, client sender, buffers, extra state) atomically.
    pub async fn remove_session(&self, session_id: Handle) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.sessions.remove(&session_id) {
            inner.client_to_session.remove(&state.client_id);
            inner.clients.remove(&state.client_id);
        }
        inner.session_to_client.remove(&session_id);
    }

    pub async fn client_for_session(&self, session_id: Handle) -> Option<Handle> {
        self.inner.lock().await.session_to_client.get(&session_id).copied()
    }

    pub async fn session_for_client(&self, client_id: Handle) -> Option<Handle> {
        self.inner.lock().await.client_to_session.get(&client_id).copied()
    }

    pub async fn sender_for_client(&self, client_id: Handle) -> Option<mpsc::Sender<Message>> {
        self.inner.lock().await.clients.get(&client_id).cloned()
    }

    pub async fn sender_for_session(&self, session_id: Handle) -> Option<mpsc::Sender<Message>> {
        let inner = self.inner.lock().await;
        let client_id = *inner.session_to_client.get(&session_id)?;
        inner.clients.get(&client_id).cloned()
    }

    /// Append bytes to a session's inbound buffer without draining it.
    pub async fn append_bytes(&self, session_id: Handle, bytes: &[u8]) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.sessions.get_mut(&session_id) {
            state.inbound.extend_from_slice(bytes);
        }
    }

    /// Drain and return a session's inbound buffer if it has reached
    /// `threshold`; otherwise leave it intact and return `None`. Callers
    /// that have no backend to flush to should skip calling this so the
    /// buffer keeps growing until one registers.
    pub async fn maybe_flush(&self, session_id: Handle, threshold: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        let state = inner.sessions.get_mut(&session_id)?;
        if state.inbound.len() >= threshold {
            Some(std::mem::take(&mut state.inbound))
        } else {
            None
        }
    }

    /// Force-flush a session's inbound buffer regardless of threshold.
    /// Returns `None` if the buffer is empty or the session is unknown.
    pub async fn take_inbound(&self, session_id: Handle) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        let state = inner.sessions.get_mut(&session_id)?;
        if state.inbound.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut state.inbound))
        }
    }

    pub async fn with_extra_mut<R>(
        &self,
        session_id: Handle,
        f: impl FnOnce(&mut Extra) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().await;
        inner.sessions.get_mut(&session_id).map(|s| f(&mut s.extra))
    }

    pub async fn session_ids(&self) -> Vec<Handle> {
        self.inner.lock().await.sessions.keys().copied().collect()
    }

    pub async fn status(&self, describe: impl Fn(&Extra) -> String) -> StatusSummary {
        let inner = self.inner.lock().await;
        let buffer_sizes = inner
            .sessions
            .iter()
            .map(|(id, state)| {
                (
                    format!("{} inbound={}B {}", id, state.inbound.len(), describe(&state.extra)),
                    state.inbound.len(),
                )
            })
            .collect();
        StatusSummary {
            session_count: inner.sessions.len(),
            client_count: inner.clients.len(),
            backend_registered: inner.backend.is_some(),
            buffer_sizes,
        }
    }

    /// Remove orphaned map entries (a key on one side without its reverse)
    /// and ping every registered client, removing any whose channel is
    /// already closed.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut inner = self.inner.lock().await;

        let orphan_sessions: Vec<Handle> = inner
            .session_to_client
            .iter()
            .filter(|(sid, cid)| inner.client_to_session.get(cid) != Some(sid))
            .map(|(sid, _)| *sid)
            .collect();
        let orphan_clients: Vec<Handle> = inner
            .client_to_session
            .iter()
            .filter(|(cid, sid)| inner.session_to_client.get(sid) != Some(cid))
            .map(|(cid, _)| *cid)
            .collect();

        let mut orphans_removed = 0;
        for sid in &orphan_sessions {
            inner.session_to_client.remove(sid);
            inner.sessions.remove(sid);
            orphans_removed += 1;
        }
        for cid in &orphan_clients {
            if let Some(sid) = inner.client_to_session.remove(cid) {
                inner.sessions.remove(&sid);
            }
            inner.clients.remove(cid);
            orphans_removed += 1;
        }

        // Ping every still-registered client; a channel already closed or a
        // send that fails outright means the socket is gone.
        let mut dead_clients_removed = 0;
        let mut dead = Vec::new();
        for (cid, tx) in inner.clients.iter() {
            if tx.is_closed() || tx.try_send(Message::Ping(Vec::new())).is_err() {
                dead.push(*cid);
            }
        }
        for cid in dead {
            inner.clients.remove(&cid);
            if let Some(sid) = inner.client_to_session.remove(&cid) {
                inner.session_to_client.remove(&sid);
                inner.sessions.remove(&sid);
            }
            dead_clients_removed += 1;
        }

        CleanupReport {
            orphans_removed,
            dead_clients_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_remove_is_fully_symmetric() {
        let registry: Registry<()> = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        let session = Handle::new();
        let client = Handle::new();
        registry.insert_session(session, client, tx).await;

        assert_eq!(registry.client_for_session(session).await, Some(client));
        assert_eq!(registry.session_for_client(client).await, Some(session));

        registry.remove_session(session).await;
        assert_eq!(registry.client_for_session(session).await, None);
        assert_eq!(registry.session_for_client(client).await, None);
        assert!(registry.sender_for_client(client).await.is_none());
    }

    #[tokio::test]
    async fn backend_registration_is_exclusive() {
        let registry: Registry<()> = Registry::new();
        let first = Handle::new();
        let second = Handle::new();
        registry.register_backend(first).await.unwrap();
        assert!(registry.register_backend(second).await.is_err());
        registry.unregister_backend(first).await;
        assert!(registry.register_backend(second).await.is_ok());
    }

    #[tokio::test]
    async fn inbound_buffer_flushes_at_threshold() {
        let registry: Registry<()> = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        let session = Handle::new();
        registry.insert_session(session, Handle::new(), tx).await;

        registry.append_bytes(session, &[0u8; 4]).await;
        assert!(registry.maybe_flush(session, 8).await.is_none());
        registry.append_bytes(session, &[0u8; 4]).await;
        let flushed = registry.maybe_flush(session, 8).await;
        assert_eq!(flushed.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn cleanup_repairs_asymmetric_mapping() {
        let registry: Registry<()> = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        let session = Handle::new();
        let client = Handle::new();
        registry.insert_session(session, client, tx).await;

        {
            let mut inner = registry.inner.lock().await;
            inner.session_to_client.remove(&session);
        }

        let report = registry.cleanup().await;
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(registry.session_for_client(client).await, None);
        // The session entry (buffer + extra state) must not survive as an
        // orphan once its only client mapping is gone.
        let status = registry.status(|_| String::new()).await;
        assert_eq!(status.session_count, 0);
        assert!(registry.session_ids().await.is_empty());
    }
}
