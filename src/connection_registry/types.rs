use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::websocket::ServerEvent;

/// Handle for a single live WebSocket connection.
///
/// Owned exclusively by the [`ConnectionRegistry`](super::ConnectionRegistry);
/// every other component refers to connections by id and resolves handles
/// through the registry.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub sender: mpsc::Sender<ServerEvent>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: RwLock<DateTime<Utc>>,
}

impl ConnectionHandle {
    pub fn new(user_id: Uuid, username: String, sender: mpsc::Sender<ServerEvent>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            username,
            sender,
            connected_at: now,
            last_activity: RwLock::new(now),
        }
    }

    pub async fn update_activity(&self) {
        let mut last = self.last_activity.write().await;
        *last = Utc::now();
    }

    /// Deliver an event, waiting for channel capacity. Used for direct
    /// replies to this connection.
    pub async fn send(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event).await
    }

    /// Non-blocking delivery used by fan-out paths. A full or closed channel
    /// counts as a failed best-effort delivery.
    pub fn enqueue(&self, event: ServerEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Presence change produced by a register or deregister call. The caller
/// forwards `Online`/`Offline` to the presence broadcaster; the registry
/// itself never emits events or writes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    Online,
    Offline,
    Unchanged,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
}
