use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::ConnectionMetrics;

use super::{ConnectionHandle, PresenceTransition, RegistryStats};

/// Maps logical user identities to their live connections and derives
/// presence from the mapping.
///
/// A user is online iff their connection set is non-empty; the set is
/// mutated only here, on register/deregister.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<Uuid, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Record a new live connection.
    ///
    /// Returns [`PresenceTransition::Online`] when this is the user's first
    /// live connection. Fails with `DuplicateConnection` if the id is
    /// already registered.
    pub fn register(
        &self,
        handle: Arc<ConnectionHandle>,
    ) -> Result<PresenceTransition, AppError> {
        match self.connections.entry(handle.id) {
            Entry::Occupied(_) => return Err(AppError::DuplicateConnection(handle.id)),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        let mut user_conns = self.user_index.entry(handle.user_id).or_default();
        let first_connection = user_conns.is_empty();
        user_conns.insert(handle.id);
        drop(user_conns);

        ConnectionMetrics::set_totals(self.connections.len(), self.user_index.len());

        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            "Connection registered"
        );

        Ok(if first_connection {
            PresenceTransition::Online
        } else {
            PresenceTransition::Unchanged
        })
    }

    /// Remove a connection.
    ///
    /// Returns [`PresenceTransition::Offline`] when this was the user's last
    /// live connection. Unknown ids are tolerated (double-disconnect) and
    /// report `Unchanged`.
    pub fn deregister(&self, connection_id: Uuid) -> PresenceTransition {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return PresenceTransition::Unchanged;
        };

        let mut transition = PresenceTransition::Unchanged;
        if let Some(mut user_conns) = self.user_index.get_mut(&handle.user_id) {
            user_conns.remove(&connection_id);
            let emptied = user_conns.is_empty();
            drop(user_conns);

            if emptied
                && self
                    .user_index
                    .remove_if(&handle.user_id, |_, conns| conns.is_empty())
                    .is_some()
            {
                transition = PresenceTransition::Offline;
            }
        }

        ConnectionMetrics::set_totals(self.connections.len(), self.user_index.len());

        tracing::info!(
            connection_id = %connection_id,
            user_id = %handle.user_id,
            "Connection deregistered"
        );

        transition
    }

    /// O(1) presence lookup.
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.user_index
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Get all connections for a user
    pub fn connections_of(&self, user_id: Uuid) -> Vec<Arc<ConnectionHandle>> {
        self.user_index
            .get(&user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get connection by ID
    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Get all connections
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub async fn find_stale(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);
        let mut stale = Vec::new();

        for entry in self.connections.iter() {
            let last_activity = *entry.value().last_activity.read().await;
            if now.signed_duration_since(last_activity) > timeout {
                stale.push(*entry.key());
            }
        }

        stale
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(registry: &ConnectionRegistry, user_id: Uuid) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        let handle = Arc::new(ConnectionHandle::new(user_id, "user".to_string(), tx));
        registry.register(handle.clone()).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_first_connection_goes_online() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(8);
        let handle = Arc::new(ConnectionHandle::new(user, "alice".to_string(), tx));

        assert!(!registry.is_online(user));
        let transition = registry.register(handle).unwrap();
        assert_eq!(transition, PresenceTransition::Online);
        assert!(registry.is_online(user));
    }

    #[tokio::test]
    async fn test_duplicate_connection_rejected() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(8);
        let handle = Arc::new(ConnectionHandle::new(user, "alice".to_string(), tx));

        registry.register(handle.clone()).unwrap();
        let result = registry.register(handle);
        assert!(matches!(result, Err(AppError::DuplicateConnection(_))));
    }

    #[tokio::test]
    async fn test_multi_device_presence() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let first = connect(&registry, user);
        let second = {
            let (tx, _rx) = mpsc::channel(8);
            let handle = Arc::new(ConnectionHandle::new(user, "user".to_string(), tx));
            let transition = registry.register(handle.clone()).unwrap();
            assert_eq!(transition, PresenceTransition::Unchanged);
            handle
        };

        assert_eq!(registry.connections_of(user).len(), 2);

        // Dropping one device keeps the user online
        assert_eq!(
            registry.deregister(first.id),
            PresenceTransition::Unchanged
        );
        assert!(registry.is_online(user));

        // Dropping the last one transitions offline
        assert_eq!(
            registry.deregister(second.id),
            PresenceTransition::Offline
        );
        assert!(!registry.is_online(user));
        assert!(registry.connections_of(user).is_empty());
    }

    #[tokio::test]
    async fn test_double_disconnect_tolerated() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let handle = connect(&registry, user);

        assert_eq!(registry.deregister(handle.id), PresenceTransition::Offline);
        assert_eq!(
            registry.deregister(handle.id),
            PresenceTransition::Unchanged
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = ConnectionRegistry::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        connect(&registry, user_a);
        connect(&registry, user_a);
        connect(&registry, user_b);

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_users, 2);
    }
}
