//! Inbound event dispatch: validate, persist, fan out.
//!
//! One router instance is shared by every connection task. Each inbound
//! client event maps onto exactly one handler; validation errors resolve
//! here and never propagate past this boundary. Store errors are logged,
//! surfaced to the originating connection as a generic `error` event, and
//! never retried (at-most-once per inbound event).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::connection_registry::{ConnectionHandle, ConnectionRegistry, PresenceTransition};
use crate::error::AppError;
use crate::membership::MembershipValidator;
use crate::presence::PresenceBroadcaster;
use crate::rooms::RoomManager;
use crate::store::{MessageStore, MessageType, UserStatus};
use crate::websocket::{ClientEvent, ServerEvent};

/// Maximum length of a message-notification preview, in characters.
const PREVIEW_MAX_CHARS: usize = 50;

pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    validator: MembershipValidator,
    presence: PresenceBroadcaster,
    store: Arc<dyn MessageStore>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let validator = MembershipValidator::new(store.clone());
        let presence = PresenceBroadcaster::new(registry.clone());
        Self {
            registry,
            rooms,
            validator,
            presence,
            store,
        }
    }

    /// Register a freshly authenticated connection. On the user's first
    /// connection, persists online status and announces the transition
    /// globally.
    pub async fn handle_connect(&self, conn: &Arc<ConnectionHandle>) -> Result<(), AppError> {
        let transition = self.registry.register(conn.clone())?;

        if transition == PresenceTransition::Online {
            if let Err(e) = self
                .store
                .set_user_status(conn.user_id, UserStatus::Online, None)
                .await
            {
                tracing::warn!(
                    user_id = %conn.user_id,
                    error = %e,
                    "Failed to persist online status"
                );
            }
            self.presence
                .announce(conn.user_id, &conn.username, UserStatus::Online);
        }

        Ok(())
    }

    /// Dispatch one inbound client event.
    #[tracing::instrument(
        name = "router.dispatch",
        skip(self, event, conn),
        fields(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            event_type = event.kind()
        )
    )]
    pub async fn dispatch(&self, event: ClientEvent, conn: &Arc<ConnectionHandle>) {
        match event {
            ClientEvent::JoinConversation { conversation_id } => {
                self.handle_join(conn, conversation_id).await;
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.handle_leave(conn, conversation_id).await;
            }
            ClientEvent::SendMessage {
                conversation_id,
                content,
                message_type,
            } => {
                self.handle_send_message(conn, conversation_id, content, message_type)
                    .await;
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.handle_typing_start(conn, conversation_id);
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.handle_typing_stop(conn, conversation_id);
            }
            ClientEvent::UpdateStatus { status } => {
                self.handle_status_update(conn, status).await;
            }
            ClientEvent::Ping => {
                let _ = conn.send(ServerEvent::Pong).await;
            }
        }
    }

    /// Validate membership, then subscribe; the reply goes to the requester
    /// only.
    async fn handle_join(&self, conn: &Arc<ConnectionHandle>, conversation_id: Uuid) {
        match self
            .validator
            .check_participant(conn.user_id, conversation_id)
            .await
        {
            Ok(_role) => {
                self.rooms.join(conversation_id, conn.id);
                let _ = conn
                    .send(ServerEvent::ConversationJoined { conversation_id })
                    .await;
            }
            Err(e) => self.reject(conn, e).await,
        }
    }

    async fn handle_leave(&self, conn: &Arc<ConnectionHandle>, conversation_id: Uuid) {
        self.rooms.leave(conversation_id, conn.id);
        let _ = conn
            .send(ServerEvent::ConversationLeft { conversation_id })
            .await;
    }

    /// Persist, then fan out. A live participant-of-record check gates the
    /// write; a prior join is not required by the protocol. Any store
    /// failure aborts the operation before the first broadcast, so no
    /// partial side effects reach other users.
    async fn handle_send_message(
        &self,
        conn: &Arc<ConnectionHandle>,
        conversation_id: Uuid,
        content: String,
        message_type: MessageType,
    ) {
        if let Err(e) = self
            .validator
            .check_participant(conn.user_id, conversation_id)
            .await
        {
            self.reject(conn, e).await;
            return;
        }

        let stored = match self
            .store
            .insert_message(conversation_id, conn.user_id, &content, message_type)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to persist message"
                );
                self.reject(conn, AppError::Store(e)).await;
                return;
            }
        };

        if let Err(e) = self.store.touch_conversation(conversation_id).await {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to update conversation activity"
            );
            self.reject(conn, AppError::Store(e)).await;
            return;
        }

        let message = ServerEvent::NewMessage {
            id: stored.id,
            conversation_id,
            sender_id: conn.user_id,
            sender_name: conn.username.clone(),
            content: content.clone(),
            message_type,
            created_at: stored.created_at,
        };
        self.rooms.broadcast(conversation_id, &message, None);

        // Echo suppression is per-connection: the sender's other devices
        // still receive the notification.
        let notification = ServerEvent::MessageNotification {
            conversation_id,
            sender_name: conn.username.clone(),
            preview: preview_of(&content),
        };
        self.rooms
            .broadcast(conversation_id, &notification, Some(conn.id));
    }

    /// Ephemeral; not persisted and not participant-validated. A connection
    /// that never joined the room broadcasts to nobody.
    fn handle_typing_start(&self, conn: &Arc<ConnectionHandle>, conversation_id: Uuid) {
        let event = ServerEvent::UserTyping {
            conversation_id,
            user_id: conn.user_id,
            username: conn.username.clone(),
        };
        self.rooms.broadcast(conversation_id, &event, Some(conn.id));
    }

    fn handle_typing_stop(&self, conn: &Arc<ConnectionHandle>, conversation_id: Uuid) {
        let event = ServerEvent::UserStoppedTyping {
            conversation_id,
            user_id: conn.user_id,
        };
        self.rooms.broadcast(conversation_id, &event, Some(conn.id));
    }

    /// Persist the new status, then announce it to all connected users
    /// globally (not conversation-scoped).
    async fn handle_status_update(&self, conn: &Arc<ConnectionHandle>, status: UserStatus) {
        if let Err(e) = self.store.set_user_status(conn.user_id, status, None).await {
            tracing::error!(
                user_id = %conn.user_id,
                error = %e,
                "Failed to persist status update"
            );
            self.reject(conn, AppError::Store(e)).await;
            return;
        }

        self.presence.announce(conn.user_id, &conn.username, status);
    }

    /// Tear down a connection: deregister, leave every room, and on the
    /// user's last connection persist offline + last-seen and announce the
    /// offline transition exactly once.
    #[tracing::instrument(
        name = "router.disconnect",
        skip(self, conn),
        fields(connection_id = %conn.id, user_id = %conn.user_id)
    )]
    pub async fn handle_disconnect(&self, conn: &Arc<ConnectionHandle>) {
        let transition = self.registry.deregister(conn.id);
        self.rooms.leave_all(conn.id);

        if transition == PresenceTransition::Offline {
            if let Err(e) = self
                .store
                .set_user_status(conn.user_id, UserStatus::Offline, Some(Utc::now()))
                .await
            {
                tracing::warn!(
                    user_id = %conn.user_id,
                    error = %e,
                    "Failed to persist offline status"
                );
            }
            self.presence
                .announce(conn.user_id, &conn.username, UserStatus::Offline);
        }
    }

    async fn reject(&self, conn: &Arc<ConnectionHandle>, err: AppError) {
        let _ = conn.send(ServerEvent::error(err.client_message())).await;
    }
}

fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview_of("hi"), "hi");

        let long = "a".repeat(80);
        assert_eq!(preview_of(&long).chars().count(), 50);

        // Multi-byte characters are kept whole
        let emoji = "😀".repeat(60);
        let preview = preview_of(&emoji);
        assert_eq!(preview.chars().count(), 50);
        assert!(preview.chars().all(|c| c == '😀'));
    }
}
