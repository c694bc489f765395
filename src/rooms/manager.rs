use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::connection_registry::{ConnectionHandle, ConnectionRegistry};
use crate::metrics::FanoutMetrics;
use crate::websocket::ServerEvent;

/// Conversation-scoped subscriber set. Created lazily on first join and
/// removed when the last subscriber leaves; durable conversation state
/// lives entirely in the external store.
#[derive(Default)]
struct Room {
    subscribers: HashSet<Uuid>,
}

/// Result of one fan-out pass. Delivery is best-effort and independent per
/// subscriber: a failed connection never blocks the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct FanoutStats {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FanoutStatsSnapshot {
    pub broadcasts: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Maintains the room arena and routes broadcasts to current subscribers.
///
/// Rooms hold connection ids only; handles are resolved through the
/// registry, which keeps ownership of every connection.
pub struct RoomManager {
    registry: Arc<ConnectionRegistry>,
    /// conversation_id -> Room
    rooms: DashMap<Uuid, Room>,
    /// connection_id -> Set<conversation_id>, backs leave_all
    memberships: DashMap<Uuid, HashSet<Uuid>>,
    stats: FanoutStats,
}

impl RoomManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            stats: FanoutStats::default(),
        }
    }

    /// Subscribe a connection to a conversation room, creating the room if
    /// absent.
    ///
    /// Participant validation is sequenced by the event router before this
    /// call; the room manager itself only refuses connections that are no
    /// longer registered (disconnect race).
    pub fn join(&self, conversation_id: Uuid, connection_id: Uuid) {
        if self.registry.get(connection_id).is_none() {
            tracing::debug!(
                connection_id = %connection_id,
                conversation_id = %conversation_id,
                "Join ignored for unregistered connection"
            );
            return;
        }

        // The membership entry guard is held across the room insert so that
        // leave_all, which takes the whole entry, can never observe a
        // half-joined connection.
        let mut joined = self.memberships.entry(connection_id).or_default();
        joined.insert(conversation_id);
        self.rooms
            .entry(conversation_id)
            .or_default()
            .subscribers
            .insert(connection_id);
        drop(joined);

        FanoutMetrics::set_active_rooms(self.rooms.len());

        tracing::debug!(
            connection_id = %connection_id,
            conversation_id = %conversation_id,
            "Joined conversation room"
        );
    }

    /// Unsubscribe a connection from a room. No-op for non-subscribers.
    pub fn leave(&self, conversation_id: Uuid, connection_id: Uuid) {
        if let Some(mut joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(&conversation_id);
            let emptied = joined.is_empty();
            drop(joined);
            if emptied {
                self.memberships
                    .remove_if(&connection_id, |_, set| set.is_empty());
            }
        }

        self.remove_subscriber(conversation_id, connection_id);

        FanoutMetrics::set_active_rooms(self.rooms.len());

        tracing::debug!(
            connection_id = %connection_id,
            conversation_id = %conversation_id,
            "Left conversation room"
        );
    }

    /// Remove a connection from every room it subscribes to. Called on
    /// disconnect.
    ///
    /// Taking the whole membership entry makes this atomic with respect to
    /// concurrent joins from the same connection: after return the
    /// connection subscribes to zero rooms.
    pub fn leave_all(&self, connection_id: Uuid) {
        let Some((_, joined)) = self.memberships.remove(&connection_id) else {
            return;
        };

        for conversation_id in joined {
            self.remove_subscriber(conversation_id, connection_id);
        }

        FanoutMetrics::set_active_rooms(self.rooms.len());

        tracing::debug!(connection_id = %connection_id, "Left all conversation rooms");
    }

    fn remove_subscriber(&self, conversation_id: Uuid, connection_id: Uuid) {
        if let Some(mut room) = self.rooms.get_mut(&conversation_id) {
            room.subscribers.remove(&connection_id);
            let emptied = room.subscribers.is_empty();
            drop(room);
            if emptied {
                // No dangling empty rooms; remove_if re-checks so a join
                // racing in after the guard dropped is not discarded.
                self.rooms
                    .remove_if(&conversation_id, |_, r| r.subscribers.is_empty());
            }
        }
    }

    /// Deliver `event` to every current subscriber of the room, optionally
    /// excluding one connection (echo suppression for the originating
    /// connection only; the sender's other devices still receive it).
    ///
    /// The exclusive room guard serializes broadcasts for one room, and
    /// `enqueue` never awaits, so every subscriber channel observes a single
    /// room's events in emission order. The socket write itself happens in
    /// each connection's writer task, outside any lock.
    pub fn broadcast(
        &self,
        conversation_id: Uuid,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> Delivery {
        let mut delivery = Delivery::default();

        {
            let Some(room) = self.rooms.get_mut(&conversation_id) else {
                return delivery;
            };

            let targets: SmallVec<[Arc<ConnectionHandle>; 8]> = room
                .subscribers
                .iter()
                .filter(|id| Some(**id) != exclude)
                .filter_map(|id| self.registry.get(*id))
                .collect();

            for conn in &targets {
                if conn.enqueue(event.clone()) {
                    delivery.delivered += 1;
                } else {
                    delivery.failed += 1;
                }
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(delivery.failed as u64, Ordering::Relaxed);

        FanoutMetrics::record_room_sent();
        FanoutMetrics::record_delivered(delivery.delivered as u64);
        FanoutMetrics::record_failed(delivery.failed as u64);

        tracing::debug!(
            conversation_id = %conversation_id,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Broadcast to conversation room"
        );

        delivery
    }

    pub fn is_subscribed(&self, conversation_id: Uuid, connection_id: Uuid) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.subscribers.contains(&connection_id))
            .unwrap_or(false)
    }

    pub fn subscriptions_of(&self, connection_id: Uuid) -> HashSet<Uuid> {
        self.memberships
            .get(&connection_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.subscribers.len())
            .unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn stats(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::ConnectionHandle;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, RoomManager) {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomManager::new(registry.clone());
        (registry, rooms)
    }

    fn connect(
        registry: &ConnectionRegistry,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(ConnectionHandle::new(
            Uuid::new_v4(),
            "user".to_string(),
            tx,
        ));
        registry.register(handle.clone()).unwrap();
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let (registry, rooms) = setup();
        let conversation = Uuid::new_v4();
        let (conn, _rx) = connect(&registry, 8);

        assert_eq!(rooms.room_count(), 0);

        rooms.join(conversation, conn.id);
        assert_eq!(rooms.room_count(), 1);
        assert!(rooms.is_subscribed(conversation, conn.id));

        rooms.leave(conversation, conn.id);
        assert_eq!(rooms.room_count(), 0);
        assert!(!rooms.is_subscribed(conversation, conn.id));

        // Leaving again is a no-op
        rooms.leave(conversation, conn.id);
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_join_requires_registered_connection() {
        let (_registry, rooms) = setup();
        let conversation = Uuid::new_v4();

        rooms.join(conversation, Uuid::new_v4());
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_all_clears_every_subscription() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry, 8);
        let conversations: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        for conversation in &conversations {
            rooms.join(*conversation, conn.id);
        }
        assert_eq!(rooms.subscriptions_of(conn.id).len(), 5);

        rooms.leave_all(conn.id);
        assert!(rooms.subscriptions_of(conn.id).is_empty());
        for conversation in &conversations {
            assert!(!rooms.is_subscribed(*conversation, conn.id));
        }
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_only_named_connection() {
        let (registry, rooms) = setup();
        let conversation = Uuid::new_v4();
        let (sender, mut sender_rx) = connect(&registry, 8);
        let (other, mut other_rx) = connect(&registry, 8);

        rooms.join(conversation, sender.id);
        rooms.join(conversation, other.id);

        let delivery = rooms.broadcast(
            conversation,
            &ServerEvent::error("test"),
            Some(sender.id),
        );
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.failed, 0);

        assert!(drain(&mut sender_rx).is_empty());
        assert_eq!(drain(&mut other_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_order_per_subscriber() {
        let (registry, rooms) = setup();
        let conversation = Uuid::new_v4();
        let (a, mut a_rx) = connect(&registry, 128);
        let (b, mut b_rx) = connect(&registry, 128);

        rooms.join(conversation, a.id);
        rooms.join(conversation, b.id);

        for i in 0..100u32 {
            rooms.broadcast(conversation, &ServerEvent::error(i.to_string()), None);
        }

        for rx in [&mut a_rx, &mut b_rx] {
            let observed: Vec<String> = drain(rx)
                .into_iter()
                .map(|event| match event {
                    ServerEvent::Error { message } => message,
                    other => panic!("unexpected event: {:?}", other),
                })
                .collect();
            let expected: Vec<String> = (0..100u32).map(|i| i.to_string()).collect();
            assert_eq!(observed, expected);
        }
    }

    #[tokio::test]
    async fn test_full_channel_counts_as_failed_delivery() {
        let (registry, rooms) = setup();
        let conversation = Uuid::new_v4();
        let (slow, _slow_rx) = connect(&registry, 1);
        let (healthy, mut healthy_rx) = connect(&registry, 8);

        rooms.join(conversation, slow.id);
        rooms.join(conversation, healthy.id);

        // First broadcast fills the slow connection's buffer
        let first = rooms.broadcast(conversation, &ServerEvent::Heartbeat, None);
        assert_eq!(first.delivered, 2);

        // Second one fails for the slow connection but still reaches the
        // healthy one
        let second = rooms.broadcast(conversation, &ServerEvent::Heartbeat, None);
        assert_eq!(second.delivered, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(drain(&mut healthy_rx).len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_is_empty() {
        let (_registry, rooms) = setup();
        let delivery = rooms.broadcast(Uuid::new_v4(), &ServerEvent::Heartbeat, None);
        assert_eq!(delivery, Delivery::default());
    }
}
