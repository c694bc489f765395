use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Claims;
use crate::connection_registry::ConnectionHandle;
use crate::metrics::{WsMessageMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION};
use crate::server::AppState;

use super::message::{ClientEvent, ServerEvent};

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// The bearer credential is verified before the upgrade; a missing or
/// invalid token closes the exchange with 401 and no connection is
/// established, so no event can be observed unauthenticated.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    // Extract token from query parameter or Authorization header
    let token = extract_token(&query, &headers);

    let token = match token {
        Some(t) => t,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                "Missing authentication token",
            )
                .into_response();
        }
    };

    // Validate JWT token
    let claims = match state.jwt_validator.validate(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "JWT validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    tracing::info!(user_id = %claims.sub, "WebSocket upgrade requested");

    // Upgrade to WebSocket
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, claims),
    fields(user_id = %claims.sub)
)]
async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(CHANNEL_BUFFER_SIZE);

    let handle = Arc::new(ConnectionHandle::new(claims.sub, claims.name.clone(), tx));

    // Register with the fan-out core; announces online on the user's first
    // connection
    if let Err(e) = state.router.handle_connect(&handle).await {
        tracing::warn!(user_id = %claims.sub, error = %e, "Connection rejected");
        let (mut ws_sender, _) = socket.split();
        let error_msg = ServerEvent::error(e.client_message());
        if let Ok(json) = serde_json::to_string(&error_msg) {
            let _ = ws_sender.send(Message::Text(json.into())).await;
        }
        let _ = ws_sender.close().await;
        return;
    }
    let connection_id = handle.id;

    WS_CONNECTIONS_OPENED.inc();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %handle.user_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending events from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize event");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving events from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Deregister, leave all rooms, announce offline on the user's last
    // connection
    state.router.handle_disconnect(&handle).await;

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %handle.user_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity().await;

            // Parse client event
            let event: ClientEvent = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client event");
                    let _ = handle
                        .send(ServerEvent::error("Unrecognized event"))
                        .await;
                    return true;
                }
            };

            WsMessageMetrics::record(event.kind());
            state.router.dispatch(event, handle).await;
            true
        }
        Message::Binary(_) => {
            // Binary messages not supported
            let _ = handle
                .send(ServerEvent::error("Binary messages are not supported"))
                .await;
            true
        }
        Message::Ping(_) => {
            handle.update_activity().await;
            // Axum answers the pong automatically
            true
        }
        Message::Pong(_) => {
            handle.update_activity().await;
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_prefers_query() {
        let query = WsQuery {
            token: Some("query-token".to_string()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());

        assert_eq!(
            extract_token(&query, &headers),
            Some("query-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_from_header() {
        let query = WsQuery { token: None };
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());

        assert_eq!(
            extract_token(&query, &headers),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_missing() {
        let query = WsQuery { token: None };
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&query, &headers), None);
    }
}
