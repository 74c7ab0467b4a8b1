//! Model descriptors and selection rules
//!
//! The listing endpoint only advertises part of the catalog, so selection
//! works on whatever came back plus hard defaults.

use serde::Deserialize;

use crate::constants::chat;

/// One entry from the backend's `/models` listing. Never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub capabilities: Option<ModelCapabilities>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub supports_streaming: Option<bool>,
    #[serde(default)]
    pub supports_tool_calls: Option<bool>,
}

/// Claude variants in preference order.
const CLAUDE_PRIORITY: &[&str] = &[
    "claude-sonnet-4",
    "claude-3.7-sonnet",
    "claude-3.5-sonnet",
    "claude-3-sonnet-20240229",
    "claude-3-haiku",
];

/// Pick the best Claude model the backend actually lists.
///
/// Falls back through: priority list, any id containing "claude", the
/// first listed model, then the hard default.
pub fn preferred_claude_model(models: &[ModelDescriptor]) -> String {
    for candidate in CLAUDE_PRIORITY {
        if models.iter().any(|m| m.id == *candidate) {
            return (*candidate).to_string();
        }
    }

    if let Some(claude) = models
        .iter()
        .find(|m| m.id.to_lowercase().contains("claude"))
    {
        return claude.id.clone();
    }

    models
        .first()
        .map(|m| m.id.clone())
        .unwrap_or_else(|| chat::DEFAULT_MODEL.to_string())
}

/// Pick a replacement model after a rate limit.
///
/// GPT capacity is provisioned separately from Claude capacity on the
/// backend, so `gpt-4o` (or any GPT model) is the escape hatch. When
/// nothing qualifies the current model is returned unchanged, which tells
/// the caller there is nowhere to fall back to.
pub fn rate_limit_fallback(models: &[ModelDescriptor], current: &str) -> String {
    if models.iter().any(|m| m.id == chat::DEFAULT_MODEL) {
        return chat::DEFAULT_MODEL.to_string();
    }

    if let Some(gpt) = models.iter().find(|m| m.id.to_lowercase().contains("gpt")) {
        return gpt.id.clone();
    }

    current.to_string()
}
