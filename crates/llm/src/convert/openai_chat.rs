//! Converter for the explicit-ID, message-list vendor family (OpenAI Chat
//! Completions). Tool calls are matched to results by an adapter-owned
//! canonical↔vendor bimap.

use serde_json::Value;

use crate::convert::{self, ToolCallIdMap};
use crate::history::{Block, HistoryService, ImageSource, NeutralRecord, Speaker};
use crate::wire::openai::{
    ChatFunctionCall, ChatMessage, ChatRole, ChatToolCall,
};

/// `neutral_to_V_request`'s message-building half: produces the `messages`
/// array for a Chat Completions request body. Synthesizes "interrupted"
/// tool-results for dangling calls before encoding.
pub fn neutral_to_messages(records: &[NeutralRecord], ids: &mut ToolCallIdMap) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let dangling = convert::unresponded_call_ids_in_turn(record, &records[index + 1..]);

        match record.speaker {
            Speaker::System => messages.push(ChatMessage {
                role: ChatRole::System,
                content: Some(text_of(record)),
                tool_calls: None,
                tool_call_id: None,
            }),
            Speaker::Human => messages.push(ChatMessage {
                role: ChatRole::User,
                content: Some(text_of(record)),
                tool_calls: None,
                tool_call_id: None,
            }),
            Speaker::Ai => {
                let text = text_of(record);
                let tool_calls: Vec<ChatToolCall> = record
                    .blocks
                    .iter()
                    .filter_map(|block| match block {
                        Block::ToolCall { id, name, parameters } => Some(ChatToolCall {
                            id: ids.vendor_id_for(id, |n| format!("call_{n}")),
                            call_type: "function".to_string(),
                            function: ChatFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(parameters).unwrap_or_default(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();

                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                });

                for call_id in dangling {
                    if let Some(vendor_id) = ids.canonical_to_vendor_lookup(call_id) {
                        messages.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: Some(convert::INTERRUPTED_MARKER.to_string()),
                            tool_calls: None,
                            tool_call_id: Some(vendor_id),
                        });
                    }
                }
            }
            Speaker::Tool => {
                for block in &record.blocks {
                    if let Block::ToolResponse { call_id, result, .. } = block {
                        let vendor_id = ids.vendor_id_for(call_id, |n| format!("call_{n}"));
                        messages.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: Some(convert::stringify_tool_result(result)),
                            tool_calls: None,
                            tool_call_id: Some(vendor_id),
                        });
                    }
                }
            }
        }
    }

    messages
}

fn text_of(record: &NeutralRecord) -> String {
    record
        .blocks
        .iter()
        .filter_map(|block| match block {
            Block::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `V_tool_use_to_neutral_tool_call`: decodes one assistant `tool_calls[]`
/// entry into a neutral `ToolCall` block, allocating a canonical ID on first
/// sighting of the vendor ID.
pub fn tool_use_to_neutral_tool_call(call: &ChatToolCall, ids: &mut ToolCallIdMap, history: &HistoryService) -> Block {
    let canonical_id = ids.canonical_id_for(&call.id, history);
    let parameters: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);

    Block::ToolCall {
        id: canonical_id,
        name: call.function.name.clone(),
        parameters,
    }
}

/// `V_tool_result_to_neutral_tool_response`: decodes a `role: "tool"` message
/// into a neutral `ToolResponse` block.
pub fn tool_result_to_neutral_tool_response(message: &ChatMessage, ids: &mut ToolCallIdMap, history: &HistoryService) -> Option<Block> {
    let vendor_id = message.tool_call_id.as_ref()?;
    let canonical_id = ids.canonical_id_for(vendor_id, history);
    let content = message.content.clone().unwrap_or_default();

    Some(Block::ToolResponse {
        call_id: canonical_id,
        tool_name: String::new(),
        result: Value::String(content),
        error: None,
    })
}

/// Decodes an assistant message's image blocks. OpenAI Chat has no image
/// content inside a plain message-list response, so this always returns
/// `ImageSource::Url` placeholders when the caller constructs one out-of-band;
/// present for symmetry with the encode direction, which `neutral_to_messages`
/// does not yet emit (images are not part of this crate's tool-call scope).
pub fn image_source_unsupported() -> Option<ImageSource> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Metadata;

    fn ai_with_call(id: &str) -> NeutralRecord {
        NeutralRecord::new(
            Speaker::Ai,
            vec![Block::ToolCall {
                id: id.to_string(),
                name: "get_weather".into(),
                parameters: serde_json::json!({"city": "nyc"}),
            }],
        )
    }

    fn tool_with_response(id: &str) -> NeutralRecord {
        NeutralRecord::new(
            Speaker::Tool,
            vec![Block::ToolResponse {
                call_id: id.to_string(),
                tool_name: "get_weather".into(),
                result: serde_json::json!("72F"),
                error: None,
            }],
        )
    }

    #[test]
    fn round_trips_tool_call_and_response_with_matching_vendor_id() {
        let mut ids = ToolCallIdMap::new();
        let records = vec![ai_with_call("hist_tool_1"), tool_with_response("hist_tool_1")];

        let messages = neutral_to_messages(&records, &mut ids);

        let call_id = messages[0].tool_calls.as_ref().unwrap()[0].id.clone();
        assert_eq!(messages[1].tool_call_id.as_deref(), Some(call_id.as_str()));
    }

    #[test]
    fn dangling_call_gets_interrupted_placeholder() {
        let mut ids = ToolCallIdMap::new();
        let records = vec![ai_with_call("hist_tool_1")];

        let messages = neutral_to_messages(&records, &mut ids);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ChatRole::Tool);
        assert_eq!(messages[1].content.as_deref(), Some(convert::INTERRUPTED_MARKER));
    }

    #[test]
    fn decodes_tool_use_allocating_canonical_id() {
        let history = HistoryService::new();
        let mut ids = ToolCallIdMap::new();

        let call = ChatToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: ChatFunctionCall {
                name: "get_weather".into(),
                arguments: "{\"city\":\"nyc\"}".into(),
            },
        };

        let block = tool_use_to_neutral_tool_call(&call, &mut ids, &history);
        let Block::ToolCall { id, name, .. } = block else {
            unreachable!()
        };
        assert!(id.starts_with("hist_tool_"));
        assert_eq!(name, "get_weather");
        let _ = Metadata::default();
    }
}
