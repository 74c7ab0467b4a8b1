//! Permissive Anthropic request parser
//!
//! Real clients send `content` as a string, as an array of text blocks, or
//! as an array mixing text with tool_use/tool_result blocks; `system`
//! comes as either a string or a block array. The parser accepts all of
//! them, produces a flattened textual view, and keeps the original block
//! array alongside so translation can emit structured tool calls instead
//! of the flattened prose.

use serde_json::Value;

use crate::types::{ChatMessage, ChatRequest, InvalidRequest};

/// Parse a raw request body into a normalized [`ChatRequest`].
pub fn parse_anthropic_request(body: &[u8]) -> Result<ChatRequest, InvalidRequest> {
    let root: Value = serde_json::from_slice(body)
        .map_err(|e| InvalidRequest::Json(e.to_string()))?;

    let model = root
        .get("model")
        .and_then(|m| m.as_str())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(InvalidRequest::MissingModel)?
        .to_string();

    let max_tokens = root
        .get("max_tokens")
        .and_then(|t| t.as_i64())
        .ok_or(InvalidRequest::MissingMaxTokens)?;
    if max_tokens <= 0 {
        return Err(InvalidRequest::NonPositiveMaxTokens);
    }

    let raw_messages = root
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or(InvalidRequest::MissingMessages)?;

    let mut messages = Vec::with_capacity(raw_messages.len());
    for (index, raw) in raw_messages.iter().enumerate() {
        let role = raw
            .get("role")
            .and_then(|r| r.as_str())
            .map(str::trim)
            .unwrap_or("");
        if role.is_empty() {
            return Err(InvalidRequest::BlankRole(index));
        }

        let (text, structured) = match raw.get("content") {
            Some(Value::String(s)) => (s.clone(), None),
            Some(content @ Value::Array(_)) => (flatten_content(content), Some(content.clone())),
            _ => (String::new(), None),
        };

        if text.trim().is_empty() {
            return Err(InvalidRequest::BlankContent(index));
        }

        messages.push(ChatMessage {
            role: role.to_string(),
            text,
            structured,
        });
    }

    let system = root
        .get("system")
        .map(flatten_content)
        .filter(|s| !s.trim().is_empty());

    Ok(ChatRequest {
        model,
        max_tokens,
        messages,
        system,
        stream: root
            .get("stream")
            .and_then(|s| s.as_bool())
            .unwrap_or(false),
        temperature: root.get("temperature").and_then(|t| t.as_f64()),
        top_p: root.get("top_p").and_then(|t| t.as_f64()),
        top_k: root.get("top_k").and_then(|t| t.as_u64()),
        stop_sequences: root.get("stop_sequences").and_then(|s| s.as_array()).map(
            |seqs| {
                seqs.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            },
        ),
        tools: root
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default(),
        tool_choice: root.get("tool_choice").cloned(),
    })
}

/// Flatten a `content` node (string or block array) to plain text.
///
/// Tool blocks are rendered as prose sentences; the wording is what the
/// downstream model observes verbatim, phrased so it does not start
/// imitating a bracketed marker syntax.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let parts: Vec<String> = blocks.iter().map(flatten_block).collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}

fn flatten_block(block: &Value) -> String {
    let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match block_type {
        "text" => block
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string(),
        "tool_use" => {
            let name = block.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let input = block.get("input").cloned().unwrap_or(Value::Null);
            format!("I used the {name} tool with parameters: {input}")
        }
        "tool_result" => {
            let content = block
                .get("content")
                .map(flatten_content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                "The tool execution completed.".to_string()
            } else {
                format!("The tool execution returned: {content}")
            }
        }
        other => format!("[{other}]"),
    }
}
