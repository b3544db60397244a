//! Wire types for OpenAI's Responses API (`/v1/responses`).
//!
//! Structurally this is OpenAI Chat's sibling rather than a different vendor:
//! tool calls are still explicit-ID (`call_<n>`), but the turn is a flat `input`
//! item list instead of a `messages` array, and a function call's result is its
//! own top-level item (`function_call_output`) rather than a message with a
//! `tool_call_id` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponsesToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ResponsesReasoning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesReasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    Message {
        role: ResponsesRole,
        content: Vec<ResponsesContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<ResponsesContent>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsesRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContent {
    InputText { text: String },
    OutputText { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesToolChoice {
    Mode(String),
    Specific { #[serde(rename = "type")] choice_type: String, name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub model: String,
    pub output: Vec<ResponsesItem>,
    pub status: ResponsesStatus,
    pub usage: ResponsesUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesStatus {
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Streaming events. Unlike Chat Completions' per-token deltas bundled into one
/// chunk type, the Responses API emits a distinct event per output item and
/// indexes deltas by `output_index` rather than inlining them into a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesStreamEvent {
    ResponseOutputItemAdded { output_index: u32, item: ResponsesItem },
    ResponseOutputTextDelta { output_index: u32, delta: String },
    ResponseFunctionCallArgumentsDelta { output_index: u32, delta: String },
    ResponseOutputItemDone { output_index: u32, item: ResponsesItem },
    ResponseCompleted { response: ResponsesResponse },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_call_and_output_are_separate_items() {
        let call = ResponsesItem::FunctionCall {
            call_id: "call_1".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let output = ResponsesItem::FunctionCallOutput {
            call_id: "call_1".into(),
            output: "72F".into(),
        };

        let call_json = serde_json::to_value(&call).unwrap();
        let output_json = serde_json::to_value(&output).unwrap();

        assert_eq!(call_json["type"], "function_call");
        assert_eq!(output_json["type"], "function_call_output");
        assert_eq!(call_json["call_id"], output_json["call_id"]);
    }

    #[test]
    fn deserializes_message_input_item() {
        let json = json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": "hi"}]
        });

        let item: ResponsesItem = serde_json::from_value(json).unwrap();
        assert!(matches!(item, ResponsesItem::Message { role: ResponsesRole::User, .. }));
    }
}
