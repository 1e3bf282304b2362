//! Model provider abstractions.
//!
//! Defines the [`ModelProvider`] trait, the [`ChatMessage`] type and the
//! response parsing helpers shared by concrete providers.  The only
//! concrete backend is the OpenAI-compatible [`OpenAIProvider`], which is
//! used both for the tool-routing conversation and for vision analysis of
//! rendered document pages.

pub mod openai;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

pub use openai::OpenAIProvider;

// ---------------------------------------------------------------------------
// ChatMessage – shared message representation
// ---------------------------------------------------------------------------

/// An inline image attached to a user message.
///
/// Serialised as an OpenAI `image_url` content part carrying a
/// `data:` URL, so no image ever has to be hosted anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type of the encoded bytes (`image/png` for rendered pages).
    pub media_type: String,
    /// Base64 encoding of the image bytes.
    pub data: String,
    /// Vision detail hint: `low`, `high` or `auto`.
    pub detail: String,
}

impl ImagePayload {
    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A single chat message with a role and content.
///
/// Optionally carries OpenAI tool-calling metadata so that
/// `tool` role messages and assistant `tool_calls` responses
/// are serialised correctly for the API.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// For assistant messages that invoke tools: the raw
    /// OpenAI-format `tool_calls` array.
    pub tool_calls: Option<Vec<Value>>,
    /// For `role: "tool"` messages: the id of the tool call
    /// this result corresponds to.
    pub tool_call_id: Option<String>,
    /// Images sent after the text part, in order.
    pub images: Vec<ImagePayload>,
}

impl ChatMessage {
    /// Convenience constructor for a plain message (no tool metadata).
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            images: Vec::new(),
        }
    }

    /// A user message carrying a text directive followed by images.
    pub fn with_images(content: impl Into<String>, images: Vec<ImagePayload>) -> Self {
        Self {
            images,
            ..Self::new("user", content)
        }
    }
}

/// Serialise a slice of [`ChatMessage`]s into the OpenAI-compatible
/// JSON array format, including `tool_calls` and `tool_call_id` when
/// present.
///
/// Messages with images use the multi-part content form: one `text` part
/// followed by one `image_url` part per image.
pub fn serialize_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({ "role": m.role });
            if let Some(ref tcs) = m.tool_calls {
                msg["tool_calls"] = json!(tcs);
                // OpenAI expects content to be null (or absent) on
                // assistant messages that carry tool_calls.
                if m.content.is_empty() {
                    msg["content"] = Value::Null;
                } else {
                    msg["content"] = json!(m.content);
                }
            } else if !m.images.is_empty() {
                let mut parts = vec![json!({ "type": "text", "text": m.content })];
                parts.extend(m.images.iter().map(|img| {
                    json!({
                        "type": "image_url",
                        "image_url": { "url": img.data_url(), "detail": img.detail },
                    })
                }));
                msg["content"] = Value::Array(parts);
            } else {
                msg["content"] = json!(m.content);
            }
            if let Some(ref tcid) = m.tool_call_id {
                msg["tool_call_id"] = json!(tcid);
            }
            msg
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ModelProvider trait
// ---------------------------------------------------------------------------

/// Trait implemented by every completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a sequence of chat messages and return the assistant's reply.
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error>;

    /// Send chat messages with an array of tool definitions.
    ///
    /// The default implementation ignores the tools and wraps the plain
    /// reply in [`ProviderResponse::Final`].
    async fn send_chat_with_functions(
        &self,
        messages: &[ChatMessage],
        _functions: &[Value],
    ) -> Result<(ProviderResponse, Option<TokenUsage>), anyhow::Error> {
        let reply = self.send_chat(messages).await?;
        Ok((ProviderResponse::Final(reply), None))
    }
}

/// Extract token usage statistics from an OpenAI response JSON.
pub fn parse_token_usage(json: &Value) -> Option<TokenUsage> {
    let usage = json.get("usage")?;
    Some(TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    })
}

/// Parse `tool_calls` from an OpenAI-style chat completion response.
///
/// Returns `Some(ProviderResponse::ToolCalls)` if the response contains at
/// least one well-formed call, preserving the returned order.  Falls back
/// to the legacy single `function_call` field.
pub fn parse_tool_calls(json: &Value) -> Option<ProviderResponse> {
    let message = json.get("choices")?.get(0)?.get("message")?;

    if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        let items: Vec<FunctionCallItem> = tool_calls
            .iter()
            .filter_map(|tc| {
                let func = tc.get("function")?;
                let name = func.get("name")?.as_str()?.to_string();
                let arguments = func
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .unwrap_or("{}")
                    .to_string();
                let id = tc
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or("")
                    .to_string();
                Some(FunctionCallItem { id, name, arguments })
            })
            .collect();

        if items.len() < tool_calls.len() {
            warn!(
                dropped = tool_calls.len() - items.len(),
                kept = items.len(),
                "dropping malformed tool_calls entries"
            );
        }
        if !items.is_empty() {
            return Some(ProviderResponse::ToolCalls(items));
        }
    }

    // Legacy `function_call` field.
    if let Some(fc) = message.get("function_call").and_then(|v| v.as_object()) {
        let name = fc
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let arguments = fc
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}")
            .to_string();
        return Some(ProviderResponse::ToolCalls(vec![FunctionCallItem {
            id: String::new(),
            name,
            arguments,
        }]));
    }

    None
}

// ---------------------------------------------------------------------------
// ProviderResponse – function-calling aware response
// ---------------------------------------------------------------------------

/// Token usage statistics returned by the API.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A single tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallItem {
    /// Tool call id (from the API).  May be empty for legacy responses.
    pub id: String,
    pub name: String,
    /// Raw JSON argument text, exactly as the model produced it.
    pub arguments: String,
}

/// Response from a model: either a final text reply or tool calls, never both.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    /// Plain text reply from the model.
    Final(String),
    /// The model wants to invoke one or more tools, in this order.
    ToolCalls(Vec<FunctionCallItem>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_plain_and_tool_messages() {
        let mut assistant = ChatMessage::new("assistant", "");
        assistant.tool_calls = Some(vec![json!({
            "id": "call_1",
            "type": "function",
            "function": { "name": "fetch_all_announcements", "arguments": "{}" }
        })]);
        let mut tool = ChatMessage::new("tool", "[]");
        tool.tool_call_id = Some("call_1".into());

        let out = serialize_messages(&[ChatMessage::new("user", "hi"), assistant, tool]);
        assert_eq!(out[0]["content"], "hi");
        assert!(out[1]["content"].is_null());
        assert_eq!(out[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(out[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn serialize_images_as_content_parts() {
        let img = |d: &str| ImagePayload {
            media_type: "image/png".into(),
            data: d.into(),
            detail: "low".into(),
        };
        let msg = ChatMessage::with_images("Summarize", vec![img("AAA"), img("BBB")]);
        let out = serialize_messages(&[msg]);
        let parts = out[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Summarize");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAA");
        assert_eq!(parts[2]["image_url"]["url"], "data:image/png;base64,BBB");
        assert_eq!(parts[2]["image_url"]["detail"], "low");
    }

    #[test]
    fn parse_multiple_tool_calls_in_order() {
        let resp = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        { "id": "a", "type": "function", "function": { "name": "first", "arguments": "{}" } },
                        { "id": "b", "type": "function", "function": { "name": "second", "arguments": "{\"x\":1}" } }
                    ]
                }
            }]
        });
        match parse_tool_calls(&resp) {
            Some(ProviderResponse::ToolCalls(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].name, "first");
                assert_eq!(items[1].id, "b");
                assert_eq!(items[1].arguments, "{\"x\":1}");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_calls_are_dropped() {
        let resp = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [
                        { "id": "a", "type": "function" },
                        { "id": "b", "type": "function", "function": { "name": "kept" } }
                    ]
                }
            }]
        });
        match parse_tool_calls(&resp) {
            Some(ProviderResponse::ToolCalls(items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name, "kept");
                assert_eq!(items[0].arguments, "{}");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }

        let all_bad = json!({
            "choices": [{ "message": { "tool_calls": [{ "id": "a" }] } }]
        });
        assert!(parse_tool_calls(&all_bad).is_none());
    }

    #[test]
    fn parse_plain_reply_has_no_tool_calls() {
        let resp = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
        });
        assert!(parse_tool_calls(&resp).is_none());
    }

    #[test]
    fn parse_usage() {
        let resp = json!({ "usage": { "prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7 } });
        let usage = parse_token_usage(&resp).unwrap();
        assert_eq!(usage.total_tokens, 7);
    }
}
