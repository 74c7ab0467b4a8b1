//! Copilot backend client
//!
//! Exchanges the long-lived GitHub OAuth token for a short-lived API
//! token, discovers the chat endpoint from the exchange response, lists
//! models, and performs chat completions (buffered and streaming).

use futures::StreamExt;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::constants::upstream as cfg;
use crate::upstream::error::{UpstreamError, UpstreamResult};
use crate::upstream::models::{self, ModelDescriptor};
use crate::upstream::sse::{data_payload, SseLineBuffer, StreamEvent};

/// Short-lived bearer credential for the chat API. Memory only.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiToken {
    pub token: String,
    /// Absolute expiry, seconds since epoch.
    pub expires_at: u64,
    #[serde(default)]
    pub refresh_in: Option<u64>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub api: Option<String>,
}

impl ApiToken {
    /// A token is usable only while it is comfortably short of expiry;
    /// anything inside the margin gets refreshed before use.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        now < self.expires_at.saturating_sub(cfg::TOKEN_EXPIRY_MARGIN_SECS)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(unix_now())
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Client for the Copilot backend.
pub struct CopilotClient {
    http: reqwest::Client,
    identity_base: String,
    /// Chat API base URL. Starts at the known default and is overwritten
    /// by endpoint discovery on the first successful token exchange.
    api_base: RwLock<String>,
}

impl CopilotClient {
    pub fn new() -> Self {
        Self::with_bases(cfg::IDENTITY_BASE, cfg::DEFAULT_API_BASE)
    }

    /// Override both hosts (tests point these at a mock server).
    pub fn with_bases(identity_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg::CONNECT_TIMEOUT)
            .timeout(cfg::REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            identity_base: identity_base.into(),
            api_base: RwLock::new(api_base.into()),
        }
    }

    pub async fn api_base(&self) -> String {
        self.api_base.read().await.clone()
    }

    /// Exchange a GitHub OAuth token for a short-lived API token.
    ///
    /// Caches `endpoints.api` from the response as the base URL for all
    /// subsequent model and completion calls.
    pub async fn get_api_token(&self, oauth_token: &str) -> UpstreamResult<ApiToken> {
        let url = format!("{}/copilot_internal/v2/token", self.identity_base);
        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, format!("token {oauth_token}"))
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, cfg::USER_AGENT)
            .header("Editor-Version", cfg::EDITOR_VERSION)
            .header("Editor-Plugin-Version", cfg::EDITOR_PLUGIN_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message: format!("API token exchange failed: {body}"),
            });
        }

        let token: ApiToken = response.json().await?;

        if let Some(api) = &token.endpoints.api {
            let mut base = self.api_base.write().await;
            if *base != *api {
                info!("Discovered API endpoint: {}", api);
                *base = api.clone();
            }
        }

        Ok(token)
    }

    /// List the models the backend advertises.
    pub async fn list_models(&self, api_token: &str) -> UpstreamResult<Vec<ModelDescriptor>> {
        let url = format!("{}/models", self.api_base().await);
        let response = self.chat_request(self.http.get(&url), api_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::classify(status, retry_after, &body));
        }

        let body: Value = response.json().await?;
        // Listing shape varies by deployment: {"data": [...]} or {"models": [...]}
        let entries = body
            .get("data")
            .and_then(|d| d.as_array())
            .or_else(|| body.get("models").and_then(|m| m.as_array()))
            .cloned()
            .unwrap_or_default();

        let models: Vec<ModelDescriptor> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();

        debug!("Backend lists {} models", models.len());
        Ok(models)
    }

    /// Best available Claude model per the priority table.
    pub async fn preferred_claude_model(&self, api_token: &str) -> UpstreamResult<String> {
        let listed = self.list_models(api_token).await?;
        Ok(models::preferred_claude_model(&listed))
    }

    /// Replacement model after a rate limit. Listing failures are treated
    /// as "no fallback available" and return `current` unchanged.
    pub async fn fallback_model_for_rate_limit(&self, api_token: &str, current: &str) -> String {
        match self.list_models(api_token).await {
            Ok(listed) => models::rate_limit_fallback(&listed, current),
            Err(e) => {
                warn!("Model listing failed while resolving fallback: {}", e);
                current.to_string()
            }
        }
    }

    /// Buffered chat completion. `body` is a complete OpenAI-shaped
    /// request (model, messages, and options already set).
    pub async fn chat_completion(&self, api_token: &str, body: &Value) -> UpstreamResult<Value> {
        let url = format!("{}/chat/completions", self.api_base().await);
        let response = self
            .chat_request(self.http.post(&url), api_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::classify(status, retry_after, &text));
        }

        Ok(response.json().await?)
    }

    /// Streaming chat completion.
    ///
    /// Status and error classification happen before the first chunk, so
    /// the forwarder's retry logic applies to streams too. The returned
    /// channel yields payload strings in arrival order and closes after
    /// `Done` or `Error`.
    pub async fn chat_completion_stream(
        &self,
        api_token: &str,
        body: &Value,
    ) -> UpstreamResult<mpsc::UnboundedReceiver<StreamEvent>> {
        let url = format!("{}/chat/completions", self.api_base().await);
        let response = self
            .chat_request(self.http.post(&url), api_token)
            .header(header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::classify(status, retry_after, &text));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_sse(response, tx));
        Ok(rx)
    }

    /// Headers required on every chat-API call; the backend rejects
    /// requests that don't advertise an editor.
    fn chat_request(
        &self,
        builder: reqwest::RequestBuilder,
        api_token: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header(header::AUTHORIZATION, format!("Bearer {api_token}"))
            .header(header::USER_AGENT, cfg::USER_AGENT)
            .header("Editor-Version", cfg::EDITOR_VERSION)
            .header("Editor-Plugin-Version", cfg::EDITOR_PLUGIN_VERSION)
    }
}

impl Default for CopilotClient {
    fn default() -> Self {
        Self::new()
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Pump one upstream SSE response into a channel of events.
///
/// Chunks are forwarded in arrival order. Dropping the receiver aborts
/// the send and ends this task, which releases the upstream connection.
async fn relay_sse(response: reqwest::Response, tx: mpsc::UnboundedSender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::new();
    let mut chunk_count: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Stream read error at chunk #{}: {}", chunk_count, e);
                let _ = tx.send(StreamEvent::Error(e.to_string()));
                return;
            }
        };
        chunk_count += 1;

        for line in buffer.push(&bytes) {
            let Some(payload) = data_payload(&line) else {
                continue;
            };
            if payload == "[DONE]" {
                debug!("Stream complete after {} chunks", chunk_count);
                let _ = tx.send(StreamEvent::Done);
                return;
            }
            if tx.send(StreamEvent::Data(payload.to_string())).is_err() {
                // Caller went away; abandon the upstream read
                return;
            }
        }
    }

    // Stream ended without the [DONE] marker; flush any partial line and
    // still signal completion so the caller can close out cleanly.
    if let Some(tail) = buffer.take_remainder() {
        if let Some(payload) = data_payload(&tail) {
            if payload != "[DONE]" {
                let _ = tx.send(StreamEvent::Data(payload.to_string()));
            }
        }
    }
    let _ = tx.send(StreamEvent::Done);
}
