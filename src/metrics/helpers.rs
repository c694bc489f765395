//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_TOTAL, EVENTS_DELIVERED_TOTAL, EVENTS_FAILED_TOTAL, EVENTS_SENT_TOTAL,
    HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS, ROOMS_ACTIVE, USERS_CONNECTED,
    WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection gauges
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn set_totals(connections: usize, users: usize) {
        CONNECTIONS_TOTAL.set(connections as i64);
        USERS_CONNECTED.set(users as i64);
    }
}

/// Helper struct for recording fan-out metrics
pub struct FanoutMetrics;

impl FanoutMetrics {
    /// Record a room-scoped broadcast
    pub fn record_room_sent() {
        EVENTS_SENT_TOTAL.with_label_values(&["room"]).inc();
    }

    /// Record a global presence broadcast
    pub fn record_global_sent() {
        EVENTS_SENT_TOTAL.with_label_values(&["global"]).inc();
    }

    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        EVENTS_DELIVERED_TOTAL.inc_by(count);
    }

    /// Record failed deliveries
    pub fn record_failed(count: u64) {
        EVENTS_FAILED_TOTAL.inc_by(count);
    }

    pub fn set_active_rooms(count: usize) {
        ROOMS_ACTIVE.set(count as i64);
    }
}

/// Helper struct for inbound WebSocket event metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record(kind: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(elapsed_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(elapsed_ms as f64);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}
