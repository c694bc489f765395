use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;

use super::{MessageStore, MessageType, ParticipantRole, StoreError, StoredMessage, UserStatus};

/// PostgreSQL-backed [`MessageStore`].
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a connection pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        tracing::info!(
            pool_size = config.pool_size,
            "PostgreSQL connection pool created"
        );

        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn participant_role(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<ParticipantRole>, StoreError> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role.map(|r| ParticipantRole::from_db(&r)))
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO messages (conversation_id, sender_id, content, message_type) \
             VALUES ($1, $2, $3, $4) RETURNING id, created_at",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(message_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredMessage { id, created_at })
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET status = $2, last_seen = COALESCE($3, last_seen) WHERE id = $1",
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
