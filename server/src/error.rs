use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chat backend error: {0}")]
    LlmError(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Chat(e) => ApiError::LlmError(format!("{e:#}")),
            PipelineError::Synthesis(e) => ApiError::TtsError(e),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::LlmError(msg) => {
                tracing::error!("Chat backend error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Chat backend error: {}", msg),
                )
            }
            ApiError::TtsError(e) => {
                tracing::error!("TTS error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("TTS error: {}", e),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
