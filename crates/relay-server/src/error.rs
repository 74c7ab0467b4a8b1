//! Dialect-specific error envelopes
//!
//! Each inbound surface reports failures in its own wire format, so there
//! is one error type per dialect rather than a shared one.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors on the OpenAI-dialect surface (`/v1/chat/completions`).
pub enum CompletionsError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for CompletionsError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            CompletionsError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            CompletionsError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "api_error", msg)
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "type": error_type,
                "param": null,
                "code": null,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for CompletionsError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Upstream failure: {:?}", err);
        CompletionsError::Internal(err.to_string())
    }
}

/// Errors on the Anthropic-dialect surface (`/v1/messages`).
pub enum MessagesError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for MessagesError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            MessagesError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            MessagesError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for MessagesError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Upstream failure: {:?}", err);
        MessagesError::Internal(err.to_string())
    }
}

impl From<relay_core::types::InvalidRequest> for MessagesError {
    fn from(err: relay_core::types::InvalidRequest) -> Self {
        MessagesError::BadRequest(err.to_string())
    }
}
