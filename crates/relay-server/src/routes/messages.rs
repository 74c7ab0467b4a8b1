//! Anthropic-dialect chat endpoint

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use relay_core::parse::parse_anthropic_request;

use crate::error::MessagesError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/messages", post(messages))
}

/// `POST /v1/messages`
///
/// Buffered responses are translated back into the Anthropic shape.
/// Streaming responses relay the upstream's OpenAI-shaped chunks inside
/// the SSE frames; the event-typed Anthropic stream protocol is not
/// synthesized.
async fn messages(State(state): State<AppState>, body: Bytes) -> Result<Response, MessagesError> {
    let request = parse_anthropic_request(&body)?;

    if request.stream {
        let rx = state.forwarder.chat_anthropic_stream(&request).await?;
        Ok(super::relay_stream(rx).into_response())
    } else {
        let response = state.forwarder.chat_anthropic(&request).await?;
        Ok(Json(response).into_response())
    }
}
