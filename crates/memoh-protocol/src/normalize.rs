//! Bidirectional translator between the permissive gateway message shape and
//! the typed internal representation.
//!
//! The wire format mixes plain strings, content-part arrays and several
//! vendor tool-call dialects. Everything is folded into
//! [`NormalizedMessage`]; the opaque map shape exists only at this boundary.

use serde_json::{json, Map, Value};

/// A message the rest of the backend can reason about: explicit role, text
/// content (single string or parts), tool calls, and — for tool responses —
/// the call id being answered.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub role: String,
    pub body: MessageBody,
    pub tool_calls: Vec<ToolCall>,
    /// Set on role "tool" messages: which call this result answers.
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

/// Content is either one string or an ordered list of parts. A message with
/// exactly one text part and no tool calls always collapses to `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// A tool result found inline in a message body; emitted as a separate
/// trailing `role:"tool"` message.
#[derive(Debug, Clone)]
struct InlineToolResult {
    tool_call_id: Option<String>,
    name: Option<String>,
    content: String,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Normalize one on-wire message.
///
/// Returns zero messages when the input carries nothing (blank content, no
/// tool calls), one for the common case, or more when the body embeds tool
/// results — each result becomes its own trailing `role:"tool"` message.
pub fn normalize_message(raw: &Map<String, Value>) -> Vec<NormalizedMessage> {
    let role = raw
        .get("role")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or("assistant")
        .to_string();
    let tool_call_id = raw
        .get("tool_call_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let name = raw.get("name").and_then(Value::as_str).map(str::to_string);

    let mut parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut results: Vec<InlineToolResult> = Vec::new();

    // Top-level tool_calls (the OpenAI function dialect; also what our own
    // serializer emits, which is what makes double-normalize idempotent).
    if let Some(calls) = raw.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            if let Some(tc) = tool_call_from_value(call) {
                tool_calls.push(tc);
            }
        }
    }

    match raw.get("content") {
        Some(Value::String(s)) => {
            // Blank string content with no tool calls means the message
            // carries nothing; otherwise the blank is preserved implicitly.
            if !s.trim().is_empty() {
                parts.push(s.clone());
            }
        }
        Some(Value::Array(elements)) => {
            for element in elements {
                classify_element(element, &mut parts, &mut tool_calls, &mut results);
            }
        }
        Some(Value::Object(map)) => {
            classify_element(
                &Value::Object(map.clone()),
                &mut parts,
                &mut tool_calls,
                &mut results,
            );
        }
        _ => {}
    }

    let mut out = Vec::new();

    let has_main = !parts.is_empty() || !tool_calls.is_empty() || tool_call_id.is_some();
    if has_main {
        let body = if parts.len() == 1 && tool_calls.is_empty() {
            MessageBody::Text(parts.remove(0))
        } else if parts.is_empty() {
            MessageBody::Text(String::new())
        } else {
            MessageBody::Parts(parts.into_iter().map(ContentPart::Text).collect())
        };
        out.push(NormalizedMessage {
            role,
            body,
            tool_calls,
            tool_call_id,
            name,
        });
    }

    for result in results {
        out.push(NormalizedMessage {
            role: "tool".to_string(),
            body: MessageBody::Text(result.content),
            tool_calls: Vec::new(),
            tool_call_id: result.tool_call_id,
            name: result.name,
        });
    }

    out
}

fn classify_element(
    element: &Value,
    parts: &mut Vec<String>,
    tool_calls: &mut Vec<ToolCall>,
    results: &mut Vec<InlineToolResult>,
) {
    match element {
        Value::String(s) => parts.push(s.clone()),
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or("");
            match kind {
                "tool_use" | "tool-call" | "function_call" => {
                    if let Some(tc) = tool_call_from_value(element) {
                        tool_calls.push(tc);
                    }
                    return;
                }
                "tool_result" | "tool-result" => {
                    results.push(tool_result_from_map(map));
                    return;
                }
                "text" => {
                    parts.push(
                        map.get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    );
                    return;
                }
                _ => {}
            }

            // Untagged vendor envelopes.
            if let Some(Value::Object(inner)) = map.get("toolResult") {
                results.push(tool_result_from_map(inner));
                return;
            }
            if let Some(Value::Object(inner)) = map.get("functionResponse") {
                results.push(InlineToolResult {
                    tool_call_id: string_field(inner, &["id"]),
                    name: string_field(inner, &["name"]),
                    content: inner
                        .get("response")
                        .map(value_to_text)
                        .unwrap_or_default(),
                });
                return;
            }
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    parts.push(text.to_string());
                    return;
                }
            }

            // Unknown shape — keep it as its JSON encoding rather than drop it.
            parts.push(Value::Object(map.clone()).to_string());
        }
        other => parts.push(other.to_string()),
    }
}

/// Decode one tool call from any of the supported dialects:
/// Anthropic `tool_use`, Vercel `tool-call`, Gemini `function_call`, and
/// the OpenAI `function` entry used in top-level `tool_calls` arrays.
fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let map = value.as_object()?;
    let kind = map.get("type").and_then(Value::as_str).unwrap_or("");

    let (id, name, arguments) = match kind {
        "tool_use" => (
            string_field(map, &["id"]),
            string_field(map, &["name"]),
            map.get("input").cloned(),
        ),
        "tool-call" => (
            string_field(map, &["toolCallId"]),
            string_field(map, &["toolName"]),
            map.get("args").cloned(),
        ),
        "function_call" => (
            string_field(map, &["call_id", "id"]),
            string_field(map, &["name"]),
            map.get("arguments").cloned(),
        ),
        // "function" (and untyped entries with a function object) come from
        // OpenAI-style tool_calls arrays.
        _ => {
            let function = map.get("function").and_then(Value::as_object)?;
            (
                string_field(map, &["id"]),
                string_field(function, &["name"]),
                function.get("arguments").cloned(),
            )
        }
    };

    let arguments = match arguments {
        // OpenAI encodes arguments as a JSON string; decode when possible.
        Some(Value::String(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        Some(v) => v,
        None => json!({}),
    };

    Some(ToolCall {
        id,
        name: name.unwrap_or_default(),
        arguments,
    })
}

fn tool_result_from_map(map: &Map<String, Value>) -> InlineToolResult {
    InlineToolResult {
        tool_call_id: string_field(map, &["tool_use_id", "toolCallId", "tool_call_id", "id"]),
        name: string_field(map, &["name", "toolName"]),
        content: map
            .get("content")
            .or_else(|| map.get("result"))
            .or_else(|| map.get("output"))
            .map(value_to_text)
            .unwrap_or_default(),
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Re-encode a normalized message into the gateway shape.
///
/// Mirrors the inbound rules: a parts body with no tool calls becomes a
/// content array; everything else flattens to a content string. Tool calls
/// are emitted in the OpenAI function dialect; calls with an empty function
/// name are dropped.
pub fn serialize_message(message: &NormalizedMessage) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("role".to_string(), Value::String(message.role.clone()));

    if let Some(id) = &message.tool_call_id {
        out.insert("tool_call_id".to_string(), Value::String(id.clone()));
    }
    if let Some(name) = &message.name {
        out.insert("name".to_string(), Value::String(name.clone()));
    }

    let calls: Vec<Value> = message
        .tool_calls
        .iter()
        .filter(|tc| !tc.name.is_empty())
        .map(|tc| {
            let mut call = Map::new();
            call.insert("type".to_string(), Value::String("function".to_string()));
            if let Some(id) = &tc.id {
                call.insert("id".to_string(), Value::String(id.clone()));
            }
            call.insert(
                "function".to_string(),
                json!({
                    "name": tc.name,
                    "arguments": tc.arguments.to_string(),
                }),
            );
            Value::Object(call)
        })
        .collect();
    let has_calls = !calls.is_empty();
    if has_calls {
        out.insert("tool_calls".to_string(), Value::Array(calls));
    }

    let content = match &message.body {
        MessageBody::Parts(parts) if !parts.is_empty() && !has_calls => Value::Array(
            parts
                .iter()
                .map(|ContentPart::Text(text)| json!({"type": "text", "text": text}))
                .collect(),
        ),
        MessageBody::Parts(parts) => Value::String(
            parts
                .iter()
                .map(|ContentPart::Text(text)| text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        MessageBody::Text(text) => Value::String(text.clone()),
    };
    out.insert("content".to_string(), content);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn missing_role_defaults_to_assistant() {
        let msgs = normalize_message(&raw(json!({"content": "hi"})));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "assistant");
        assert_eq!(msgs[0].body, MessageBody::Text("hi".to_string()));
    }

    #[test]
    fn blank_content_without_tool_calls_is_dropped() {
        assert!(normalize_message(&raw(json!({"role": "user", "content": "  "}))).is_empty());

        // With tool calls the message survives with empty content.
        let msgs = normalize_message(&raw(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"type": "function", "id": "c1",
                 "function": {"name": "lookup", "arguments": "{\"q\":1}"}}
            ]
        })));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tool_calls.len(), 1);
        assert_eq!(msgs[0].tool_calls[0].arguments, json!({"q": 1}));
    }

    #[test]
    fn single_text_part_collapses_to_content() {
        let msgs = normalize_message(&raw(json!({
            "role": "user",
            "content": [{"type": "text", "text": "only"}]
        })));
        assert_eq!(msgs[0].body, MessageBody::Text("only".to_string()));
    }

    #[test]
    fn vendor_tool_call_dialects_are_folded() {
        let msgs = normalize_message(&raw(json!({
            "role": "assistant",
            "content": [
                {"type": "tool_use", "id": "a", "name": "read", "input": {"p": 1}},
                {"type": "tool-call", "toolCallId": "b", "toolName": "write", "args": {"p": 2}},
                {"type": "function_call", "call_id": "c", "name": "list",
                 "arguments": "{\"p\":3}"}
            ]
        })));
        assert_eq!(msgs.len(), 1);
        let names: Vec<_> = msgs[0].tool_calls.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read", "write", "list"]);
        assert_eq!(msgs[0].tool_calls[2].arguments, json!({"p": 3}));
    }

    #[test]
    fn tool_results_split_into_trailing_tool_messages() {
        let msgs = normalize_message(&raw(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "and the result:"},
                {"type": "tool_result", "tool_use_id": "a", "content": "42"},
                {"toolResult": {"toolCallId": "b", "result": {"ok": true}}}
            ]
        })));
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "tool");
        assert_eq!(msgs[1].tool_call_id.as_deref(), Some("a"));
        assert_eq!(msgs[1].body, MessageBody::Text("42".to_string()));
        assert_eq!(msgs[2].tool_call_id.as_deref(), Some("b"));
        assert_eq!(msgs[2].body, MessageBody::Text("{\"ok\":true}".to_string()));
    }

    #[test]
    fn function_response_envelope_is_a_tool_result() {
        let msgs = normalize_message(&raw(json!({
            "role": "user",
            "content": {"functionResponse": {"name": "weather", "response": {"temp": 20}}}
        })));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "tool");
        assert_eq!(msgs[0].name.as_deref(), Some("weather"));
    }

    #[test]
    fn unknown_map_becomes_its_json_encoding() {
        let msgs = normalize_message(&raw(json!({
            "role": "user",
            "content": [{"weird": "shape"}]
        })));
        assert_eq!(msgs[0].body, MessageBody::Text("{\"weird\":\"shape\"}".to_string()));
    }

    #[test]
    fn serialize_drops_nameless_tool_calls() {
        let message = NormalizedMessage {
            role: "assistant".to_string(),
            body: MessageBody::Text(String::new()),
            tool_calls: vec![
                ToolCall { id: Some("a".into()), name: String::new(), arguments: json!({}) },
                ToolCall { id: Some("b".into()), name: "keep".into(), arguments: json!({}) },
            ],
            tool_call_id: None,
            name: None,
        };
        let out = serialize_message(&message);
        let calls = out.get("tool_calls").unwrap().as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["function"]["name"], "keep");
    }

    #[test]
    fn multi_part_body_serializes_to_content_array() {
        let message = NormalizedMessage {
            role: "user".to_string(),
            body: MessageBody::Parts(vec![
                ContentPart::Text("a".into()),
                ContentPart::Text("b".into()),
            ]),
            tool_calls: vec![],
            tool_call_id: None,
            name: None,
        };
        let out = serialize_message(&message);
        let content = out.get("content").unwrap().as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["text"], "a");
    }

    #[test]
    fn double_normalize_is_idempotent() {
        let inputs = vec![
            json!({"role": "user", "content": "plain"}),
            json!({"role": "user", "content": [
                {"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}),
            json!({"role": "assistant", "content": [
                {"type": "text", "text": "calling"},
                {"type": "tool_use", "id": "t1", "name": "read", "input": {"k": "v"}}]}),
            json!({"role": "tool", "tool_call_id": "t1", "content": "result"}),
        ];
        for input in inputs {
            let first = normalize_message(&raw(input));
            for message in &first {
                let rewired = serialize_message(message);
                let second = normalize_message(&rewired);
                assert_eq!(second.len(), 1, "round trip must keep one message");
                assert_eq!(&second[0], message);
            }
        }
    }
}
