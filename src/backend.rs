//! The single backend socket shared by every client session on an
//! endpoint. Writes are serialized through one writer task draining an
//! `mpsc` channel, since many client handler tasks may need to push an
//! upstream frame at once and message-framed socket writes are not safe
//! to interleave.

use std::future::Future;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

#[derive(Default)]
pub struct BackendLink {
    tx: RwLock<Option<mpsc::Sender<Message>>>,
}

impl BackendLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, tx: mpsc::Sender<Message>) {
        *self.tx.write().await = Some(tx);
    }

    pub async fn clear(&self) {
        *self.tx.write().await = None;
    }

    /// Build and send a frame, but only ever run `build` once a backend is
    /// confirmed registered. `build` is typically a buffer drain (e.g.
    /// `Registry::maybe_flush`/`take_inbound`); holding the read lock across
    /// `build` and the send means a concurrent `clear()` can't complete
    /// mid-flush, so a source buffer only gets drained when the frame it
    /// produces is actually handed to the backend's writer task. Returns
    /// `Ok(false)` without calling `build` at all if no backend is
    /// registered, so the caller's data is left untouched for the next
    /// registration to pick up.
    pub async fn send_with<F, Fut>(&self, build: F) -> Result<bool, mpsc::error::SendError<Message>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Message>>,
    {
        let guard = self.tx.read().await;
        match guard.as_ref() {
            Some(tx) => {
                let tx = tx.clone();
                if let Some(message) = build().await {
                    tx.send(message).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
