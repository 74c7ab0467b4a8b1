//! Model listing endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::error::CompletionsError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/models", get(list_models))
}

/// `GET /v1/models` - the upstream listing in OpenAI list shape.
async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, CompletionsError> {
    let models = state.forwarder.list_models().await?;

    let data: Vec<Value> = models
        .iter()
        .map(|m| json!({"id": m.id, "object": "model"}))
        .collect();

    Ok(Json(json!({"object": "list", "data": data})))
}
