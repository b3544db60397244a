//! Wire types for a generic Vercel AI SDK-compatible backend.
//!
//! This family carries no stable tool-call identifier on the wire: a
//! `tool-call` part and its matching `tool-result` part are correlated purely by
//! their position within the turn (the AI SDK's `toolCallId` is a client-side
//! convenience, not something every backend that speaks this protocol actually
//! echoes back). `crate::convert::vercel` matches them by order of appearance
//! instead of by ID, the way `provider/google.rs`'s function-call/function-response
//! pairing works in the pack this crate was grounded on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VercelRequest {
    pub model: String,
    pub messages: Vec<VercelMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<VercelTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VercelMessage {
    pub role: VercelRole,
    pub parts: Vec<VercelPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VercelRole {
    System,
    User,
    Assistant,
}

/// A part within a message. No `id`/`toolCallId` field: position within the
/// enclosing message's `parts` array is the only correlation available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VercelPart {
    Text { text: String },
    Reasoning { text: String },
    ToolCall { tool_name: String, args: Value },
    ToolResult { tool_name: String, result: Value, #[serde(default)] is_error: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VercelTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VercelResponse {
    pub model: String,
    pub message: VercelMessage,
    pub finish_reason: VercelFinishReason,
    pub usage: VercelUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VercelFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VercelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A streamed delta. Like the full response, it carries no tool-call ID: a
/// `tool-call-delta` is matched to the in-flight call at the same `part_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VercelStreamEvent {
    TextDelta { part_index: u32, delta: String },
    ToolCallStart { part_index: u32, tool_name: String },
    ToolCallDelta { part_index: u32, args_text_delta: String },
    Finish { finish_reason: VercelFinishReason, usage: VercelUsage },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_part_has_no_id_field() {
        let part = VercelPart::ToolCall {
            tool_name: "get_weather".into(),
            args: json!({"city": "nyc"}),
        };

        let json = serde_json::to_value(&part).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("toolCallId").is_none());
        assert_eq!(json["type"], "tool-call");
    }

    #[test]
    fn deserializes_assistant_message_with_tool_call() {
        let json = json!({
            "role": "assistant",
            "parts": [
                {"type": "text", "text": "checking"},
                {"type": "tool-call", "tool_name": "get_weather", "args": {"city": "nyc"}}
            ]
        });

        let message: VercelMessage = serde_json::from_value(json).unwrap();
        assert_eq!(message.parts.len(), 2);
        assert!(matches!(message.parts[1], VercelPart::ToolCall { .. }));
    }
}
