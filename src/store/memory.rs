use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{MessageStore, MessageType, ParticipantRole, StoreError, StoredMessage, UserStatus};

/// In-memory [`MessageStore`] used by integration tests and local
/// development. Tracks how often each operation was called and can simulate
/// a storage outage via [`MemoryStore::set_fail_writes`].
#[derive(Default)]
pub struct MemoryStore {
    /// conversation_id -> (user_id -> role)
    participants: DashMap<Uuid, HashMap<Uuid, ParticipantRole>>,
    messages: Mutex<Vec<MessageRecord>>,
    statuses: DashMap<Uuid, (UserStatus, Option<DateTime<Utc>>)>,
    touched: DashMap<Uuid, DateTime<Utc>>,
    fail_writes: AtomicBool,
    calls: StoreCallCounters,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreCallCounters {
    participant_checks: AtomicU64,
    message_inserts: AtomicU64,
    conversation_touches: AtomicU64,
    status_writes: AtomicU64,
}

/// Snapshot of operation counts, for asserting what a scenario did (and did
/// not) write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCallSnapshot {
    pub participant_checks: u64,
    pub message_inserts: u64,
    pub conversation_touches: u64,
    pub status_writes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a conversation and its participants.
    pub fn seed_conversation(&self, conversation_id: Uuid, members: &[(Uuid, ParticipantRole)]) {
        let mut entry = self.participants.entry(conversation_id).or_default();
        for (user_id, role) in members {
            entry.insert(*user_id, *role);
        }
    }

    /// Simulate a storage outage: all subsequent writes fail until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn last_message(&self) -> Option<MessageRecord> {
        self.messages.lock().ok().and_then(|m| m.last().cloned())
    }

    pub fn status_of(&self, user_id: Uuid) -> Option<(UserStatus, Option<DateTime<Utc>>)> {
        self.statuses.get(&user_id).map(|s| *s)
    }

    pub fn calls(&self) -> StoreCallSnapshot {
        StoreCallSnapshot {
            participant_checks: self.calls.participant_checks.load(Ordering::Relaxed),
            message_inserts: self.calls.message_inserts.load(Ordering::Relaxed),
            conversation_touches: self.calls.conversation_touches.load(Ordering::Relaxed),
            status_writes: self.calls.status_writes.load(Ordering::Relaxed),
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn participant_role(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<ParticipantRole>, StoreError> {
        self.calls.participant_checks.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .participants
            .get(&conversation_id)
            .and_then(|members| members.get(&user_id).copied()))
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        self.calls.message_inserts.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;

        let record = MessageRecord {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            message_type,
            created_at: Utc::now(),
        };
        let stored = StoredMessage {
            id: record.id,
            created_at: record.created_at,
        };

        if let Ok(mut messages) = self.messages.lock() {
            messages.push(record);
        }

        Ok(stored)
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        self.calls.conversation_touches.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;

        self.touched.insert(conversation_id, Utc::now());
        Ok(())
    }

    async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.calls.status_writes.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;

        self.statuses.insert(user_id, (status, last_seen));
        Ok(())
    }
}
