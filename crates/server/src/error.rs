use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chess_core::ChessError;
use serde_json::json;

use crate::clients::uci_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// The bot's turn stalled. The client may retry the same request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Chess(#[from] ChessError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Engine(e) => {
                let body = json!({
                    "detail": format!("The bot could not play: {e}"),
                    "retryable": true,
                });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
            AppError::Chess(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Anyhow(e) => {
                tracing::error!("Unexpected error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}
