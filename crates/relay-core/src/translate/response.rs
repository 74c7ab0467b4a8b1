//! OpenAI response -> Anthropic response
//!
//! Walks every choice (there can be more than one) into an ordered list of
//! Anthropic content blocks, then derives stop_reason and usage. The
//! response `model` field echoes what the caller originally asked for,
//! not whatever model actually served the request upstream.

use serde_json::{json, Value};
use tracing::debug;

/// Build the Anthropic-shaped response body.
pub fn build_anthropic_response(upstream: &Value, requested_model: &str) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut saw_tool_use = false;

    let choices = upstream
        .get("choices")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    for choice in &choices {
        let Some(message) = choice.get("message") else {
            continue;
        };

        if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
            if !text.trim().is_empty() {
                content.push(json!({"type": "text", "text": text}));
            }
        }

        if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for call in calls {
                let function = call.get("function").cloned().unwrap_or(Value::Null);
                content.push(json!({
                    "type": "tool_use",
                    "id": call.get("id").and_then(|i| i.as_str()).unwrap_or(""),
                    "name": function.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                    "input": parse_tool_arguments(function.get("arguments")),
                }));
                saw_tool_use = true;
            }
        }
    }

    // The caller-facing contract: content always has at least one block
    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }

    let stop_reason = if saw_tool_use {
        "tool_use"
    } else {
        match choices
            .first()
            .and_then(|c| c.get("finish_reason"))
            .and_then(|r| r.as_str())
        {
            Some("length") => "max_tokens",
            _ => "end_turn",
        }
    };

    let usage = upstream.get("usage").cloned().unwrap_or(Value::Null);
    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0);
    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    json!({
        "id": response_id(upstream),
        "type": "message",
        "role": "assistant",
        "model": requested_model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        }
    })
}

/// Tool arguments arrive as an LLM-produced string that is not guaranteed
/// to be valid JSON. On parse failure the raw string is preserved under an
/// `arguments` key instead of failing the whole response.
fn parse_tool_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|e| {
            debug!("Tool arguments are not valid JSON ({}); wrapping raw", e);
            json!({"arguments": raw})
        }),
        Some(other) => other.clone(),
        None => json!({}),
    }
}

fn response_id(upstream: &Value) -> String {
    match upstream.get("id").and_then(|i| i.as_str()) {
        Some(id) => format!("msg_{id}"),
        None => "msg_0".to_string(),
    }
}
