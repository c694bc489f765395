//! Global presence fan-out.

use std::sync::Arc;

use uuid::Uuid;

use crate::connection_registry::ConnectionRegistry;
use crate::metrics::FanoutMetrics;
use crate::rooms::Delivery;
use crate::store::UserStatus;
use crate::websocket::ServerEvent;

/// Propagates status transitions to every live connection, not just
/// shared-conversation participants. Delivery is best-effort per connection,
/// matching the room fan-out guarantee.
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn announce(&self, user_id: Uuid, username: &str, status: UserStatus) -> Delivery {
        let event = ServerEvent::status_changed(user_id, username, status);
        let mut delivery = Delivery::default();

        for conn in self.registry.all_connections() {
            if conn.enqueue(event.clone()) {
                delivery.delivered += 1;
            } else {
                delivery.failed += 1;
            }
        }

        FanoutMetrics::record_global_sent();
        FanoutMetrics::record_delivered(delivery.delivered as u64);
        FanoutMetrics::record_failed(delivery.failed as u64);

        tracing::debug!(
            user_id = %user_id,
            status = %status.as_str(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Announced presence change"
        );

        delivery
    }
}
