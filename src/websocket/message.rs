use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{MessageType, UserStatus};

/// Events sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        message_type: MessageType,
    },
    TypingStart {
        conversation_id: Uuid,
    },
    TypingStop {
        conversation_id: Uuid,
    },
    UpdateStatus {
        status: UserStatus,
    },
    Ping,
}

impl ClientEvent {
    /// Label used for inbound-event metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation { .. } => "join_conversation",
            ClientEvent::LeaveConversation { .. } => "leave_conversation",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::UpdateStatus { .. } => "update_status",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConversationJoined {
        conversation_id: Uuid,
    },
    ConversationLeft {
        conversation_id: Uuid,
    },
    NewMessage {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        message_type: MessageType,
        created_at: DateTime<Utc>,
    },
    MessageNotification {
        conversation_id: Uuid,
        sender_name: String,
        preview: String,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },
    UserStoppedTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    UserStatusChanged {
        user_id: Uuid,
        username: String,
        status: UserStatus,
    },
    Pong,
    Heartbeat,
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn status_changed(user_id: Uuid, username: impl Into<String>, status: UserStatus) -> Self {
        Self::UserStatusChanged {
            user_id,
            username: username.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let conversation_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"send_message","payload":{{"conversation_id":"{}","content":"hi","message_type":"text"}}}}"#,
            conversation_id
        );

        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        match event {
            ClientEvent::SendMessage {
                conversation_id: cid,
                content,
                message_type,
            } => {
                assert_eq!(cid, conversation_id);
                assert_eq!(content, "hi");
                assert_eq!(message_type, MessageType::Text);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_ping_has_no_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));
    }

    #[test]
    fn test_server_event_tagging() {
        let event = ServerEvent::error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");

        let event = ServerEvent::status_changed(Uuid::new_v4(), "alice", UserStatus::Away);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_status_changed");
        assert_eq!(json["status"], "away");
        assert_eq!(json["username"], "alice");
    }
}
