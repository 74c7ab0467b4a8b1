//! Request types for dialect translation
//!
//! These are NOT wire types - they're the normalized intermediate both
//! inbound dialects reduce to before the upstream body is built.

use serde_json::Value;

/// Normalized chat request, independent of the inbound dialect.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model name as the caller requested it. Echoed back verbatim in
    /// Anthropic responses even when the upstream call used another model.
    pub model: String,
    /// Requested output budget; clamped during translation.
    pub max_tokens: i64,
    pub messages: Vec<ChatMessage>,
    /// Flattened system prompt, when the caller sent one.
    pub system: Option<String>,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub stop_sequences: Option<Vec<String>>,
    /// Tool descriptors exactly as received; shape is resolved at
    /// translation time (Anthropic `{name, input_schema}` or OpenAI
    /// `{type, function}`).
    pub tools: Vec<Value>,
    /// Opaque pass-through.
    pub tool_choice: Option<Value>,
}

/// One normalized message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    /// Flattened textual view of the content.
    pub text: String,
    /// The original content-block array, kept so translation can emit
    /// structured tool calls instead of the flattened prose.
    pub structured: Option<Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
            structured: None,
        }
    }
}

/// Validation failures for inbound request bodies.
///
/// Each variant carries a caller-facing message; these surface as 400s in
/// the dialect-appropriate envelope.
#[derive(Debug, thiserror::Error)]
pub enum InvalidRequest {
    #[error("request body is not valid JSON: {0}")]
    Json(String),
    #[error("missing required field: model")]
    MissingModel,
    #[error("missing required field: max_tokens")]
    MissingMaxTokens,
    #[error("max_tokens must be a positive integer")]
    NonPositiveMaxTokens,
    #[error("missing required field: messages")]
    MissingMessages,
    #[error("message at index {0} has an empty role")]
    BlankRole(usize),
    #[error("message at index {0} has no usable content")]
    BlankContent(usize),
}
