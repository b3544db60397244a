//! Converter for Anthropic's Messages API (explicit-ID, `toolu_<n>` family).
//!
//! Anthropic requires exactly one `tool_result` block per `tool_response`,
//! placed in the `user`-role message immediately following the assistant turn
//! that issued the call; any free text that conceptually belongs to that same
//! reply is coalesced as a sibling `text` block in the same message rather than
//! duplicated into the tool result.

use serde_json::Value;

use crate::convert::{self, ToolCallIdMap};
use crate::history::{Block, HistoryService, NeutralRecord, Speaker};
use crate::wire::anthropic::{AnthropicContent, AnthropicMessage, AnthropicRole, AnthropicToolResultContent};

/// `neutral_to_V_request`'s message-building half. System-speaker records are
/// excluded here — Anthropic carries the system prompt in a top-level `system`
/// field, built separately by [`system_prompt_of`].
pub fn neutral_to_messages(records: &[NeutralRecord], ids: &mut ToolCallIdMap) -> Vec<AnthropicMessage> {
    let mut messages = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let dangling = convert::unresponded_call_ids_in_turn(record, &records[index + 1..]);

        match record.speaker {
            Speaker::System => continue,
            Speaker::Human => messages.push(AnthropicMessage {
                role: AnthropicRole::User,
                content: text_content(record),
            }),
            Speaker::Ai => {
                let mut content = text_content(record);
                for block in &record.blocks {
                    if let Block::ToolCall { id, name, parameters } = block {
                        let vendor_id = ids.vendor_id_for(id, |n| format!("toolu_{n}"));
                        content.push(AnthropicContent::ToolUse {
                            id: vendor_id,
                            name: name.clone(),
                            input: parameters.clone(),
                        });
                    }
                }
                messages.push(AnthropicMessage { role: AnthropicRole::Assistant, content });

                if !dangling.is_empty() {
                    let placeholders = dangling
                        .into_iter()
                        .filter_map(|call_id| ids.canonical_to_vendor_lookup(call_id))
                        .map(|vendor_id| AnthropicContent::ToolResult {
                            tool_use_id: vendor_id,
                            content: vec![AnthropicToolResultContent::Text { text: convert::INTERRUPTED_MARKER.to_string() }],
                            is_error: true,
                        })
                        .collect();
                    messages.push(AnthropicMessage { role: AnthropicRole::User, content: placeholders });
                }
            }
            Speaker::Tool => {
                // Exactly one tool_result per tool_response, grouped into a single
                // user-role message; any sibling text in this record is coalesced
                // alongside rather than duplicated.
                let mut content = Vec::new();
                for block in &record.blocks {
                    match block {
                        Block::ToolResponse { call_id, result, error, .. } => {
                            let vendor_id = ids.vendor_id_for(call_id, |n| format!("toolu_{n}"));
                            content.push(AnthropicContent::ToolResult {
                                tool_use_id: vendor_id,
                                content: vec![AnthropicToolResultContent::Text {
                                    text: convert::stringify_tool_result(result),
                                }],
                                is_error: error.is_some(),
                            });
                        }
                        Block::Text { text } if !text.trim().is_empty() => {
                            content.push(AnthropicContent::Text { text: text.clone() });
                        }
                        _ => {}
                    }
                }
                messages.push(AnthropicMessage { role: AnthropicRole::User, content });
            }
        }
    }

    messages
}

pub fn system_prompt_of(records: &[NeutralRecord]) -> Option<String> {
    let system_text: Vec<&str> = records
        .iter()
        .filter(|r| matches!(r.speaker, Speaker::System))
        .flat_map(|r| r.blocks.iter())
        .filter_map(|block| match block {
            Block::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if system_text.is_empty() {
        None
    } else {
        Some(system_text.join("\n"))
    }
}

fn text_content(record: &NeutralRecord) -> Vec<AnthropicContent> {
    record
        .blocks
        .iter()
        .filter_map(|block| match block {
            Block::Text { text } if !text.is_empty() => Some(AnthropicContent::Text { text: text.clone() }),
            _ => None,
        })
        .collect()
}

/// `V_tool_use_to_neutral_tool_call`.
pub fn tool_use_to_neutral_tool_call(id: &str, name: &str, input: &Value, ids: &mut ToolCallIdMap, history: &HistoryService) -> Block {
    let canonical_id = ids.canonical_id_for(id, history);
    Block::ToolCall { id: canonical_id, name: name.to_string(), parameters: input.clone() }
}

/// `V_tool_result_to_neutral_tool_response`.
pub fn tool_result_to_neutral_tool_response(
    tool_use_id: &str,
    content: &[AnthropicToolResultContent],
    is_error: bool,
    ids: &mut ToolCallIdMap,
    history: &HistoryService,
) -> Block {
    let canonical_id = ids.canonical_id_for(tool_use_id, history);
    let text: String = content
        .iter()
        .map(|c| match c {
            AnthropicToolResultContent::Text { text } => text.as_str(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    // `is_error` is a genuine vendor-reported failure, distinct from the
    // synthetic `INTERRUPTED_MARKER` placeholder the encode path fabricates for
    // dangling calls; the real error text from the tool result is preserved here.
    Block::ToolResponse {
        call_id: canonical_id,
        tool_name: String::new(),
        result: Value::String(text.clone()),
        error: if is_error { Some(text) } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_response_and_sibling_text_coalesce_into_one_message() {
        let mut ids = ToolCallIdMap::new();
        ids.vendor_id_for("hist_tool_1", |n| format!("toolu_{n}"));

        let record = NeutralRecord::new(
            Speaker::Tool,
            vec![
                Block::ToolResponse {
                    call_id: "hist_tool_1".into(),
                    tool_name: "read_file".into(),
                    result: serde_json::json!("contents"),
                    error: None,
                },
                Block::Text { text: "done reading".into() },
            ],
        );

        let messages = neutral_to_messages(std::slice::from_ref(&record), &mut ids);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.len(), 2);
        assert!(matches!(messages[0].content[0], AnthropicContent::ToolResult { .. }));
        assert!(matches!(messages[0].content[1], AnthropicContent::Text { .. }));
    }

    #[test]
    fn dangling_call_gets_error_tool_result() {
        let mut ids = ToolCallIdMap::new();
        let records = vec![NeutralRecord::new(
            Speaker::Ai,
            vec![Block::ToolCall {
                id: "hist_tool_1".into(),
                name: "read_file".into(),
                parameters: serde_json::json!({}),
            }],
        )];

        let messages = neutral_to_messages(&records, &mut ids);
        assert_eq!(messages.len(), 2);
        let AnthropicContent::ToolResult { is_error, .. } = &messages[1].content[0] else {
            unreachable!("expected tool_result");
        };
        assert!(*is_error);
    }
}
