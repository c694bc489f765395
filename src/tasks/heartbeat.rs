use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::connection_registry::ConnectionRegistry;
use crate::metrics::HeartbeatMetrics;
use crate::router::EventRouter;
use crate::websocket::ServerEvent;

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task for heartbeat and connection cleanup.
///
/// Stale connections are torn down through the router's disconnect path so
/// presence and room state stay consistent; the later socket-task exit hits
/// the idempotent deregister no-op.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup tasks
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout).await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Send heartbeat to all connections in parallel with batching
    async fn send_heartbeats(&self) {
        let connections = self.registry.all_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let sent = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let timed_out = Arc::new(AtomicUsize::new(0));

        // Process in batches to avoid overwhelming the system
        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures: Vec<_> = batch
                .iter()
                .map(|handle| {
                    let sent = sent.clone();
                    let failed = failed.clone();
                    let timed_out = timed_out.clone();
                    let handle = handle.clone();

                    async move {
                        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                        match timeout(send_timeout, handle.send(ServerEvent::Heartbeat)).await {
                            Ok(Ok(_)) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Err(_)) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %handle.id,
                                    "Failed to send heartbeat, connection may be dead"
                                );
                            }
                            Err(_) => {
                                timed_out.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %handle.id,
                                    timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                                    "Heartbeat send timed out"
                                );
                            }
                        }
                    }
                })
                .collect();

            // Execute batch in parallel
            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let sent_count = sent.load(Ordering::Relaxed);
        let failed_count = failed.load(Ordering::Relaxed);
        let timed_out_count = timed_out.load(Ordering::Relaxed);

        // Record metrics
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if timed_out_count > 0 {
            HeartbeatMetrics::record_timeouts(timed_out_count as u64);
        }

        tracing::debug!(
            total = total_count,
            sent = sent_count,
            failed = failed_count,
            timed_out = timed_out_count,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        // Warn if heartbeat round is taking too long
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    /// Tear down connections with no activity past the timeout
    async fn cleanup_stale_connections(&self, timeout_secs: u64) {
        let stale = self.registry.find_stale(timeout_secs).await;
        let count = stale.len();

        for connection_id in stale {
            if let Some(handle) = self.registry.get(connection_id) {
                tracing::info!(
                    connection_id = %connection_id,
                    "Removing stale connection due to timeout"
                );
                self.router.handle_disconnect(&handle).await;
            }
        }

        if count > 0 {
            tracing::info!(
                removed = count,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }
    }
}
