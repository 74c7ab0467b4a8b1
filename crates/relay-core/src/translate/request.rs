//! Anthropic request -> OpenAI request
//!
//! Works from the normalized [`ChatRequest`]: messages that arrived with a
//! content-block array are walked structurally (emitting `tool_calls` and
//! `tool_call_id`), plain-string messages pass through with a filler for
//! blank content, and the system prompt becomes a leading system message.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::constants::chat;
use crate::parse::anthropic::flatten_content;
use crate::types::ChatRequest;

/// Build the OpenAI-shaped body for the Copilot backend.
///
/// The `model` field carries the caller's requested name; the forwarder
/// overwrites it with the resolved upstream model before sending.
pub fn build_openai_request(request: &ChatRequest) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &request.messages {
        match message.structured.as_ref().and_then(|s| s.as_array()) {
            Some(blocks) => messages.push(structured_message(&message.role, blocks)),
            None => {
                let content = if message.text.trim().is_empty() {
                    // The backend rejects empty content outright
                    chat::BLANK_CONTENT_FILLER
                } else {
                    message.text.as_str()
                };
                messages.push(json!({"role": message.role, "content": content}));
            }
        }
    }

    if messages.is_empty() {
        messages.push(json!({"role": "user", "content": chat::BLANK_CONTENT_FILLER}));
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": clamp_max_tokens(request.max_tokens),
        "stream": request.stream,
    });

    match request.temperature {
        Some(t) if (0.0..=2.0).contains(&t) => {
            body["temperature"] = json!(t);
        }
        Some(t) => debug!("Dropping out-of-range temperature {}", t),
        None => {}
    }

    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if request.top_k.is_some() {
        // No OpenAI-side equivalent; the backend would reject it
        debug!("Dropping top_k; not supported by the upstream dialect");
    }
    if let Some(stop) = &request.stop_sequences {
        if !stop.is_empty() {
            body["stop"] = json!(stop);
        }
    }

    let tools: Vec<Value> = request.tools.iter().filter_map(convert_tool).collect();
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }
    if let Some(tool_choice) = &request.tool_choice {
        body["tool_choice"] = tool_choice.clone();
    }

    body
}

/// Clamp the output budget to what the backend accepts.
pub fn clamp_max_tokens(requested: i64) -> i64 {
    if requested <= 0 {
        chat::DEFAULT_MAX_TOKENS
    } else {
        requested.min(chat::MAX_TOKENS_CAP)
    }
}

/// Rebuild one message from its original content-block array.
///
/// Text blocks join into `content`, tool_use blocks become `tool_calls`
/// entries, and a tool_result block sets `tool_call_id` with its output
/// appended to the textual part.
fn structured_message(role: &str, blocks: &[Value]) -> Value {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut tool_call_id: Option<String> = None;

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    texts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                tool_calls.push(json!({
                    "id": block.get("id").and_then(|i| i.as_str()).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": block.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                        "arguments": input.to_string(),
                    }
                }));
            }
            Some("tool_result") => {
                if let Some(id) = block.get("tool_use_id").and_then(|i| i.as_str()) {
                    tool_call_id = Some(id.to_string());
                }
                let output = block
                    .get("content")
                    .map(flatten_content)
                    .unwrap_or_default();
                if !output.trim().is_empty() {
                    texts.push(output);
                }
            }
            _ => {}
        }
    }

    let content = texts.join("\n");
    let mut message = json!({"role": role});

    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
        if !content.is_empty() {
            message["content"] = json!(content);
        }
    } else if content.is_empty() {
        message["content"] = json!(chat::BLANK_CONTENT_FILLER);
    } else {
        message["content"] = json!(content);
    }

    if let Some(id) = tool_call_id {
        message["tool_call_id"] = json!(id);
    }

    message
}

/// Convert one tool descriptor to the OpenAI function shape.
///
/// Anthropic-shaped `{name, input_schema}` descriptors are wrapped;
/// already-OpenAI `{type, function}` descriptors pass through untouched
/// (the `parameters` schema is caller-supplied and is never reshaped).
/// Anything else is dropped with a warning.
fn convert_tool(tool: &Value) -> Option<Value> {
    if let (Some(name), Some(schema)) = (
        tool.get("name").and_then(|n| n.as_str()),
        tool.get("input_schema"),
    ) {
        let description = tool
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("");
        return Some(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": schema.clone(),
            }
        }));
    }

    if tool.get("type").is_some() && tool.get("function").is_some() {
        return Some(tool.clone());
    }

    warn!("Dropping tool descriptor with unrecognized shape");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn base_request() -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4".to_string(),
            max_tokens: 1000,
            messages: vec![ChatMessage::new("user", "Hi")],
            system: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    #[test]
    fn system_prompt_is_prepended_only_when_present() {
        let mut request = base_request();
        let body = build_openai_request(&request);
        assert_eq!(body["messages"][0]["role"], "user");

        request.system = Some("be brief".to_string());
        let body = build_openai_request(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
    }

    #[test]
    fn blank_string_content_becomes_filler() {
        let mut request = base_request();
        request.messages = vec![ChatMessage::new("user", "  ")];
        let body = build_openai_request(&request);
        assert_eq!(body["messages"][0]["content"], "Hello");
    }

    #[test]
    fn empty_message_list_gets_a_filler_user_message() {
        let mut request = base_request();
        request.messages = Vec::new();
        let body = build_openai_request(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Hello");
    }

    #[test]
    fn max_tokens_is_clamped() {
        assert_eq!(clamp_max_tokens(50_000), 4096);
        assert_eq!(clamp_max_tokens(4096), 4096);
        assert_eq!(clamp_max_tokens(1), 1);
        assert_eq!(clamp_max_tokens(0), 100);
        assert_eq!(clamp_max_tokens(-3), 100);
    }

    #[test]
    fn out_of_range_temperature_is_dropped() {
        let mut request = base_request();
        request.temperature = Some(3.5);
        let body = build_openai_request(&request);
        assert!(body.get("temperature").is_none());

        request.temperature = Some(0.7);
        let body = build_openai_request(&request);
        assert_eq!(body["temperature"], 0.7);
    }

    #[test]
    fn structured_tool_use_becomes_tool_calls() {
        let mut request = base_request();
        request.messages = vec![ChatMessage {
            role: "assistant".to_string(),
            text: String::new(),
            structured: Some(serde_json::json!([
                {"type": "text", "text": "Checking the weather"},
                {"type": "tool_use", "id": "t1", "name": "get_weather",
                 "input": {"city": "Tokyo"}}
            ])),
        }];

        let body = build_openai_request(&request);
        let message = &body["messages"][0];
        assert_eq!(message["content"], "Checking the weather");
        let calls = message["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "t1");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "get_weather");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"city":"Tokyo"}"#);
    }

    #[test]
    fn tool_result_sets_tool_call_id_and_appends_output() {
        let mut request = base_request();
        request.messages = vec![ChatMessage {
            role: "user".to_string(),
            text: String::new(),
            structured: Some(serde_json::json!([
                {"type": "tool_result", "tool_use_id": "t1", "content": "22 degrees"}
            ])),
        }];

        let body = build_openai_request(&request);
        let message = &body["messages"][0];
        assert_eq!(message["tool_call_id"], "t1");
        assert_eq!(message["content"], "22 degrees");
    }

    #[test]
    fn anthropic_tools_are_wrapped_and_openai_tools_pass_through() {
        let mut request = base_request();
        request.tools = vec![
            serde_json::json!({"name": "get_weather", "description": "weather",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}}),
            serde_json::json!({"type": "function", "function": {"name": "already_openai",
                "parameters": {"type": "object"}}}),
            serde_json::json!({"bogus": true}),
        ];

        let body = build_openai_request(&request);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["function"]["name"], "get_weather");
        assert_eq!(
            tools[0]["function"]["parameters"]["properties"]["city"]["type"],
            "string"
        );
        assert_eq!(tools[1]["function"]["name"], "already_openai");
    }

    #[test]
    fn structured_message_with_no_usable_blocks_gets_filler() {
        let mut request = base_request();
        request.messages = vec![ChatMessage {
            role: "user".to_string(),
            text: String::new(),
            structured: Some(serde_json::json!([{"type": "image", "source": {}}])),
        }];

        let body = build_openai_request(&request);
        assert_eq!(body["messages"][0]["content"], "Hello");
    }

    #[test]
    fn stop_sequences_and_tool_choice_pass_through() {
        let mut request = base_request();
        request.stop_sequences = Some(vec!["END".to_string()]);
        request.tool_choice = Some(serde_json::json!({"type": "auto"}));
        let body = build_openai_request(&request);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["tool_choice"]["type"], "auto");
    }
}
