use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not a participant of this conversation")]
    NotAParticipant,

    #[error("Not an admin of this conversation")]
    NotAdmin,

    #[error("Connection {0} is already registered")]
    DuplicateConnection(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Human-readable message for the `error` event sent to the originating
    /// connection. Store and internal detail never leaks to clients.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Auth(_) => "Authentication required".to_string(),
            AppError::NotAParticipant => {
                "You are not a participant of this conversation".to_string()
            }
            AppError::NotAdmin => "You are not an admin of this conversation".to_string(),
            AppError::Config(_)
            | AppError::DuplicateConnection(_)
            | AppError::Store(_)
            | AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                msg.clone(),
            ),
            AppError::NotAParticipant => (
                StatusCode::FORBIDDEN,
                "NOT_A_PARTICIPANT",
                self.client_message(),
                self.to_string(),
            ),
            AppError::NotAdmin => (
                StatusCode::FORBIDDEN,
                "NOT_AN_ADMIN",
                self.client_message(),
                self.to_string(),
            ),
            AppError::DuplicateConnection(id) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DUPLICATE_CONNECTION",
                self.client_message(),
                format!("duplicate connection {}", id),
            ),
            AppError::Store(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Service temporarily unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", client_msg, log_msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_detail() {
        let err = AppError::Store(StoreError::Unavailable("pool exhausted".to_string()));
        assert_eq!(err.client_message(), "Internal server error");

        let err = AppError::NotAParticipant;
        assert_eq!(
            err.client_message(),
            "You are not a participant of this conversation"
        );
    }
}
