//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use liquidata_engine::{Error as EngineError, RecordId};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record cache is not loaded")]
    NotReady,
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ids: Vec<RecordId>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details, ids) = match &self {
            AppError::Engine(EngineError::Mutation { ids, cause }) => {
                tracing::warn!(ids = ?ids, "Mutation rejected by store: {}", cause);
                (
                    StatusCode::BAD_GATEWAY,
                    "Mutation rejected".to_string(),
                    Some(cause.clone()),
                    ids.clone(),
                )
            }
            AppError::Engine(EngineError::RecordNotFound(id)) => (
                StatusCode::NOT_FOUND,
                format!("Record {} not found", id),
                None,
                vec![*id],
            ),
            AppError::Engine(e) if e.is_retryable() => {
                tracing::error!("Store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Store unavailable".to_string(),
                    Some(e.to_string()),
                    Vec::new(),
                )
            }
            AppError::Engine(e) => {
                tracing::error!("Engine error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                    Vec::new(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None, Vec::new()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None, Vec::new()),
            AppError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                None,
                Vec::new(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
            ids,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
