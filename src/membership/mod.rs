//! Store-backed participant checks, performed at join/send time.
//!
//! Membership is confirmed against the external store at the moment of the
//! operation; it is not re-validated while a connection stays subscribed.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::store::{MessageStore, ParticipantRole};

pub struct MembershipValidator {
    store: Arc<dyn MessageStore>,
}

impl MembershipValidator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Confirm `user_id` is a participant of record, returning their role.
    ///
    /// May suspend for a store round-trip; callers must not hold any room or
    /// registry entry guard while this is in flight.
    pub async fn check_participant(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ParticipantRole, AppError> {
        match self.store.participant_role(user_id, conversation_id).await? {
            Some(role) => Ok(role),
            None => Err(AppError::NotAParticipant),
        }
    }

    /// Same check, but requires the `admin` role. Used by collaborators that
    /// mutate conversation membership.
    pub async fn check_admin(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        let role = self.check_participant(user_id, conversation_id).await?;
        if role.is_admin() {
            Ok(())
        } else {
            Err(AppError::NotAdmin)
        }
    }
}
