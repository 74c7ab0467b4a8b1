//! OpenAI-dialect chat endpoint

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;

use crate::error::CompletionsError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat/completions", post(chat_completions))
}

/// `POST /v1/chat/completions`
///
/// The body is already in the upstream's dialect; it is validated,
/// model-mapped, and forwarded. Responses (buffered or SSE) come back
/// unchanged from upstream.
async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, CompletionsError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| CompletionsError::BadRequest(format!("request body is not valid JSON: {e}")))?;

    if payload
        .get("model")
        .and_then(|m| m.as_str())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .is_none()
    {
        return Err(CompletionsError::BadRequest(
            "missing required field: model".to_string(),
        ));
    }
    if payload.get("messages").and_then(|m| m.as_array()).is_none() {
        return Err(CompletionsError::BadRequest(
            "missing required field: messages".to_string(),
        ));
    }

    let stream = payload
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    if stream {
        let rx = state.forwarder.chat_openai_stream(payload).await?;
        Ok(super::relay_stream(rx).into_response())
    } else {
        let response = state.forwarder.chat_openai(payload).await?;
        Ok(Json(response).into_response())
    }
}
