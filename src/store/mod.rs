//! Durable-storage interface consumed by the real-time core.
//!
//! The fan-out subsystem never owns message, conversation, or user rows; it
//! sees them only through the [`MessageStore`] trait. Production runs on
//! [`PostgresStore`]; tests and local development use [`MemoryStore`].

mod memory;
mod postgres;
mod types;

pub use memory::{MemoryStore, MessageRecord, StoreCallSnapshot};
pub use postgres::PostgresStore;
pub use types::{MessageType, ParticipantRole, StoredMessage, UserStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the external store. Always recoverable from the
/// connection's point of view: logged, reported as a generic error event,
/// never retried automatically.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// External durable store consumed by the fan-out core.
///
/// Every method may suspend for a backend round-trip; callers must not hold
/// any registry or room entry guard across these calls.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Role of `user_id` within `conversation_id`, or `None` when the user
    /// is not a participant of record.
    async fn participant_role(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<ParticipantRole>, StoreError>;

    /// Append a message, returning the generated identifier and creation
    /// timestamp.
    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
    ) -> Result<StoredMessage, StoreError>;

    /// Bump the conversation's last-activity timestamp.
    async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError>;

    /// Persist a user's availability status, optionally with a last-seen
    /// timestamp.
    async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}
