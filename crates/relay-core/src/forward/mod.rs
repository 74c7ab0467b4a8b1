//! Forwarding engine
//!
//! Wraps a single upstream call with model selection, one forced-refresh
//! retry on token rejection, and one model-fallback retry on rate limits.
//! A rate-limit fallback is sticky: once set, every later request in this
//! process uses the fallback model regardless of what the caller asked
//! for, until an operator clears it.

pub mod selection;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::constants::chat;
use crate::token::TokenManager;
use crate::translate::{build_anthropic_response, build_openai_request};
use crate::translate::request::clamp_max_tokens;
use crate::types::ChatRequest;
use crate::upstream::{CopilotClient, ModelDescriptor, StreamEvent, UpstreamError, UpstreamResult};

use selection::{initial_selection, is_claude_request};

/// Orchestrates upstream calls for both inbound dialects.
pub struct Forwarder {
    client: Arc<CopilotClient>,
    tokens: Arc<TokenManager>,
    /// Set by the first rate-limit event and visible to every request
    /// after it. Cleared only by [`Forwarder::clear_fallback_model`].
    session_fallback: RwLock<Option<String>>,
}

impl Forwarder {
    pub fn new(client: Arc<CopilotClient>, tokens: Arc<TokenManager>) -> Self {
        Self {
            client,
            tokens,
            session_fallback: RwLock::new(None),
        }
    }

    /// The sticky fallback model, if a rate limit has set one.
    pub async fn fallback_model(&self) -> Option<String> {
        self.session_fallback.read().await.clone()
    }

    /// Operator/test hook. Nothing calls this automatically.
    pub async fn clear_fallback_model(&self) {
        *self.session_fallback.write().await = None;
    }

    /// Buffered completion, OpenAI dialect in and out.
    pub async fn chat_openai(&self, body: Value) -> Result<Value> {
        let requested = requested_model(&body);
        let base = prepare_openai_body(body, false);
        let client = Arc::clone(&self.client);

        self.execute(&requested, move |token, model| {
            let mut body = base.clone();
            body["model"] = json!(model);
            let client = Arc::clone(&client);
            async move { client.chat_completion(&token, &body).await }
        })
        .await
    }

    /// Streaming completion, OpenAI dialect. Chunks are relayed verbatim.
    pub async fn chat_openai_stream(
        &self,
        body: Value,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let requested = requested_model(&body);
        let base = prepare_openai_body(body, true);
        let client = Arc::clone(&self.client);

        self.execute(&requested, move |token, model| {
            let mut body = base.clone();
            body["model"] = json!(model);
            let client = Arc::clone(&client);
            async move { client.chat_completion_stream(&token, &body).await }
        })
        .await
    }

    /// Buffered completion, Anthropic dialect in and out.
    pub async fn chat_anthropic(&self, request: &ChatRequest) -> Result<Value> {
        let mut base = build_openai_request(request);
        base["stream"] = json!(false);
        let client = Arc::clone(&self.client);

        let upstream = self
            .execute(&request.model, move |token, model| {
                let mut body = base.clone();
                body["model"] = json!(model);
                let client = Arc::clone(&client);
                async move { client.chat_completion(&token, &body).await }
            })
            .await?;

        Ok(build_anthropic_response(&upstream, &request.model))
    }

    /// Streaming completion, Anthropic dialect in.
    ///
    /// The stream relays raw OpenAI-shaped chunks; it is not rewritten
    /// into the event-typed Anthropic SSE protocol.
    pub async fn chat_anthropic_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let mut base = build_openai_request(request);
        base["stream"] = json!(true);
        let client = Arc::clone(&self.client);

        self.execute(&request.model, move |token, model| {
            let mut body = base.clone();
            body["model"] = json!(model);
            let client = Arc::clone(&client);
            async move { client.chat_completion_stream(&token, &body).await }
        })
        .await
    }

    /// Model listing with the same one-shot token retry as chat calls.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let token = self.tokens.valid_api_token().await?;
        match self.client.list_models(&token).await {
            Ok(models) => Ok(models),
            Err(UpstreamError::TokenExpired) => {
                let token = self.tokens.force_refresh_api_token().await?;
                Ok(self.client.list_models(&token).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run one upstream operation with retry and fallback.
    ///
    /// Attempt 0 uses the cached token and resolves the best model for the
    /// request; a token rejection buys exactly one forced refresh. A rate
    /// limit buys exactly one retry on the fallback model, which then
    /// sticks for the session. Anything else propagates immediately.
    async fn execute<T, F, Fut>(&self, requested_model: &str, op: F) -> Result<T>
    where
        F: Fn(String, String) -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let sticky = self.session_fallback.read().await.clone();
        let mut model = sticky
            .clone()
            .unwrap_or_else(|| initial_selection(requested_model));

        for attempt in 0..=chat::MAX_TOKEN_RETRIES {
            let token = if attempt == 0 {
                self.tokens.valid_api_token().await?
            } else {
                info!("Retrying with a force-refreshed API token");
                self.tokens.force_refresh_api_token().await?
            };

            if attempt == 0 && sticky.is_none() {
                model = self.resolve_model(requested_model, &token).await;
            }

            match op(token.clone(), model.clone()).await {
                Ok(out) => return Ok(out),
                Err(UpstreamError::TokenExpired) if attempt < chat::MAX_TOKEN_RETRIES => {
                    warn!("Upstream rejected the API token; refreshing and retrying");
                    continue;
                }
                Err(err @ UpstreamError::TokenExpired) => return Err(err.into()),
                Err(UpstreamError::RateLimit { retry_after }) => {
                    let fallback = self
                        .client
                        .fallback_model_for_rate_limit(&token, &model)
                        .await;
                    if fallback == model {
                        return Err(UpstreamError::RateLimit { retry_after }.into());
                    }

                    warn!(
                        "Rate limited on {}; switching this session to {}",
                        model, fallback
                    );
                    *self.session_fallback.write().await = Some(fallback.clone());

                    // One retry only; a second rate limit propagates
                    return op(token, fallback).await.map_err(Into::into);
                }
                Err(err) => return Err(err.into()),
            }
        }

        unreachable!("retry loop always returns")
    }

    /// Best outbound model for attempt 0. Claude requests get the
    /// listing-backed preference; listing failures degrade to the pure
    /// string mapping rather than failing the request.
    async fn resolve_model(&self, requested: &str, token: &str) -> String {
        if !is_claude_request(requested) {
            return initial_selection(requested);
        }
        match self.client.preferred_claude_model(token).await {
            Ok(model) => model,
            Err(e) => {
                warn!("Model listing failed ({}); using static selection", e);
                initial_selection(requested)
            }
        }
    }
}

fn requested_model(body: &Value) -> String {
    body.get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Normalize an inbound OpenAI-dialect body before forwarding: clamp the
/// output budget and pin the stream flag to the chosen transport.
fn prepare_openai_body(mut body: Value, stream: bool) -> Value {
    if let Some(max_tokens) = body.get("max_tokens").and_then(|t| t.as_i64()) {
        body["max_tokens"] = json!(clamp_max_tokens(max_tokens));
    }
    body["stream"] = json!(stream);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CredentialStore;
    use crate::upstream::client::unix_now;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(text: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    async fn mount_token_endpoint(server: &MockServer, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "api-tok",
                "expires_at": unix_now() + 3600,
                "refresh_in": 1500,
                "endpoints": {"api": server.uri()}
            })))
            .expect(expected_hits)
            .mount(server)
            .await;
    }

    async fn mount_models(server: &MockServer, ids: &[&str]) {
        let data: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": data})))
            .mount(server)
            .await;
    }

    fn forwarder_for(server: &MockServer, dir: &tempfile::TempDir) -> Forwarder {
        let store = CredentialStore::with_paths(
            dir.path().join("app.json"),
            dir.path().join("foreign.json"),
        );
        store.save_oauth_token("gho_test", "tester").unwrap();

        let client = Arc::new(CopilotClient::with_bases(server.uri(), server.uri()));
        let tokens = Arc::new(TokenManager::new(Arc::clone(&client), store));
        Forwarder::new(client, tokens)
    }

    #[tokio::test]
    async fn openai_request_maps_model_and_returns_upstream_body() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello")))
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let response = forwarder
            .chat_openai(json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "Hi"}],
                "stream": false
            }))
            .await
            .unwrap();

        assert_eq!(response["choices"][0]["message"]["content"], "Hello");
    }

    #[tokio::test]
    async fn token_rejection_gets_exactly_one_refresh_retry() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        // Exactly two exchanges: initial fetch + forced refresh
        mount_token_endpoint(&server, 2).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let response = forwarder
            .chat_openai(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "Hi"}]
            }))
            .await
            .unwrap();

        assert_eq!(response["choices"][0]["message"]["content"], "recovered");
    }

    #[tokio::test]
    async fn persistent_token_rejection_stops_after_the_retry_bound() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 2).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .expect(2)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let err = forwarder
            .chat_openai(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "Hi"}]
            }))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("token"));
    }

    #[tokio::test]
    async fn rate_limit_falls_back_and_sticks_for_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["claude-sonnet-4", "gpt-4o"]).await;

        // First chat call on the Claude model is throttled
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "claude-sonnet-4"})))
            .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
            .expect(1)
            .mount(&server)
            .await;
        // Retry and every later request must use the fallback
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("fallback")))
            .expect(2)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let request = json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "Hi"}]
        });

        let first = forwarder.chat_openai(request.clone()).await.unwrap();
        assert_eq!(first["choices"][0]["message"]["content"], "fallback");
        assert_eq!(forwarder.fallback_model().await.as_deref(), Some("gpt-4o"));

        // Unrelated follow-up request still lands on the fallback model
        let second = forwarder.chat_openai(request).await.unwrap();
        assert_eq!(second["choices"][0]["message"]["content"], "fallback");

        forwarder.clear_fallback_model().await;
        assert!(forwarder.fallback_model().await.is_none());
    }

    #[tokio::test]
    async fn openai_max_tokens_is_clamped_before_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"max_tokens": 4096})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        forwarder
            .chat_openai(json!({
                "model": "gpt-4o",
                "max_tokens": 128000,
                "messages": [{"role": "user", "content": "Hi"}]
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn streaming_requests_also_fall_back_on_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["gpt-4o"]).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "o3-mini"})))
            .respond_with(ResponseTemplate::new(429).set_body_string("throttled"))
            .expect(1)
            .mount(&server)
            .await;
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let mut rx = forwarder
            .chat_openai_stream(json!({
                "model": "o3-mini",
                "messages": [{"role": "user", "content": "Hi"}],
                "stream": true
            }))
            .await
            .unwrap();

        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, StreamEvent::Done) {
                saw_done = true;
            }
        }
        assert!(saw_done);
        assert_eq!(forwarder.fallback_model().await.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn system_prompt_leads_the_forwarded_messages() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["claude-sonnet-4"]).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "q"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("t")))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let request = crate::parse::parse_anthropic_request(
            br#"{
                "model": "claude-sonnet-4",
                "max_tokens": 50,
                "system": "be terse",
                "messages": [{"role": "user", "content": "q"}]
            }"#,
        )
        .unwrap();
        forwarder.chat_anthropic(&request).await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_with_no_fallback_listed_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["claude-sonnet-4"]).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("throttled"))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let err = forwarder
            .chat_openai(json!({
                "model": "claude-sonnet-4",
                "messages": [{"role": "user", "content": "Hi"}]
            }))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("rate limit"));
        assert!(forwarder.fallback_model().await.is_none());
    }

    #[tokio::test]
    async fn anthropic_request_round_trips_tool_use() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["claude-sonnet-4", "gpt-4o"]).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-9",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "t1",
                            "type": "function",
                            "function": {
                                "name": "get_weather",
                                "arguments": "{\"city\":\"Tokyo\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let request = crate::parse::parse_anthropic_request(
            br#"{
                "model": "claude-3-sonnet-20240229",
                "max_tokens": 1000,
                "messages": [{"role": "user", "content": [{"type": "text", "text": "weather?"}]}],
                "tools": [{"name": "get_weather", "description": "",
                           "input_schema": {"type": "object",
                                            "properties": {"city": {"type": "string"}}}}]
            }"#,
        )
        .unwrap();

        let response = forwarder.chat_anthropic(&request).await.unwrap();
        assert_eq!(response["model"], "claude-3-sonnet-20240229");
        assert_eq!(response["stop_reason"], "tool_use");
        assert_eq!(response["content"][0]["type"], "tool_use");
        assert_eq!(response["content"][0]["id"], "t1");
        assert_eq!(response["content"][0]["input"]["city"], "Tokyo");
    }

    #[tokio::test]
    async fn plain_string_messages_round_trip_roles_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        mount_models(&server, &["claude-sonnet-4"]).await;

        // Echo enough of the request back to check what was forwarded
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "user", "content": "first"},
                    {"role": "assistant", "content": "second"},
                    {"role": "user", "content": "third"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("echo")))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, &dir);
        let request = crate::parse::parse_anthropic_request(
            br#"{
                "model": "claude-sonnet-4",
                "max_tokens": 100,
                "messages": [
                    {"role": "user", "content": "first"},
                    {"role": "assistant", "content": "second"},
                    {"role": "user", "content": "third"}
                ]
            }"#,
        )
        .unwrap();

        let response = forwarder.chat_anthropic(&request).await.unwrap();
        assert_eq!(response["content"][0]["text"], "echo");
    }
}
