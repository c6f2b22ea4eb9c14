//! Live voice sessions, keyed by session id.

use super::session::SessionEvent;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

/// Maps each live session to its mailbox.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<SessionEvent>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its id.
    pub async fn create(&self, mailbox: mpsc::Sender<SessionEvent>) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(session_id, mailbox);
        session_id
    }

    /// Removes a session. Returns false if it was already gone.
    pub async fn destroy(&self, session_id: Uuid) -> bool {
        self.sessions.write().await.remove(&session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Asks every live session to tear down, as if its client had disconnected.
    pub async fn shutdown_all(&self) {
        let mailboxes: Vec<(Uuid, mpsc::Sender<SessionEvent>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        info!(count = mailboxes.len(), "Closing all voice sessions");
        for (session_id, mailbox) in mailboxes {
            if mailbox.send(SessionEvent::ChannelClosed).await.is_err() {
                warn!(%session_id, "Session already stopped");
            }
        }
    }
}
