//! Converter for the explicit-ID, `input`-array vendor family (OpenAI
//! Responses API). Function calls and their outputs are distinct top-level
//! items rather than role-tagged messages, but the ID bookkeeping is identical
//! to `openai_chat`'s.

use serde_json::Value;

use crate::convert::{self, ToolCallIdMap};
use crate::history::{Block, HistoryService, NeutralRecord, Speaker};
use crate::wire::openai_responses::{ResponsesContent, ResponsesItem, ResponsesRole};

/// `neutral_to_V_request`'s item-building half.
pub fn neutral_to_input_items(records: &[NeutralRecord], ids: &mut ToolCallIdMap) -> Vec<ResponsesItem> {
    let mut items = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let dangling = convert::unresponded_call_ids_in_turn(record, &records[index + 1..]);

        match record.speaker {
            Speaker::System => items.push(message_item(ResponsesRole::System, text_of(record), false)),
            Speaker::Human => items.push(message_item(ResponsesRole::User, text_of(record), false)),
            Speaker::Ai => {
                let text = text_of(record);
                if !text.is_empty() {
                    items.push(message_item(ResponsesRole::Assistant, text, true));
                }

                for block in &record.blocks {
                    if let Block::ToolCall { id, name, parameters } = block {
                        let vendor_id = ids.vendor_id_for(id, |n| format!("call_{n}"));
                        items.push(ResponsesItem::FunctionCall {
                            call_id: vendor_id,
                            name: name.clone(),
                            arguments: serde_json::to_string(parameters).unwrap_or_default(),
                        });
                    }
                }

                for call_id in dangling {
                    if let Some(vendor_id) = ids.canonical_to_vendor_lookup(call_id) {
                        items.push(ResponsesItem::FunctionCallOutput {
                            call_id: vendor_id,
                            output: convert::INTERRUPTED_MARKER.to_string(),
                        });
                    }
                }
            }
            Speaker::Tool => {
                for block in &record.blocks {
                    if let Block::ToolResponse { call_id, result, .. } = block {
                        let vendor_id = ids.vendor_id_for(call_id, |n| format!("call_{n}"));
                        items.push(ResponsesItem::FunctionCallOutput {
                            call_id: vendor_id,
                            output: convert::stringify_tool_result(result),
                        });
                    }
                }
            }
        }
    }

    items
}

fn message_item(role: ResponsesRole, text: String, is_output: bool) -> ResponsesItem {
    let content = if is_output {
        ResponsesContent::OutputText { text }
    } else {
        ResponsesContent::InputText { text }
    };

    ResponsesItem::Message { role, content: vec![content] }
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

/// `V_tool_use_to_neutral_tool_call`.
pub fn function_call_to_neutral(call_id: &str, name: &str, arguments: &str, ids: &mut ToolCallIdMap, history: &HistoryService) -> Block {
    let canonical_id = ids.canonical_id_for(call_id, history);
    let parameters: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);

    Block::ToolCall { id: canonical_id, name: name.to_string(), parameters }
}

/// `V_tool_result_to_neutral_tool_response`.
pub fn function_call_output_to_neutral(call_id: &str, output: &str, ids: &mut ToolCallIdMap, history: &HistoryService) -> Block {
    let canonical_id = ids.canonical_id_for(call_id, history);

    Block::ToolResponse {
        call_id: canonical_id,
        tool_name: String::new(),
        result: Value::String(output.to_string()),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_and_output_share_vendor_call_id() {
        let mut ids = ToolCallIdMap::new();
        let records = vec![
            NeutralRecord::new(
                Speaker::Ai,
                vec![Block::ToolCall {
                    id: "hist_tool_1".into(),
                    name: "read_file".into(),
                    parameters: serde_json::json!({"path": "/x"}),
                }],
            ),
            NeutralRecord::new(
                Speaker::Tool,
                vec![Block::ToolResponse {
                    call_id: "hist_tool_1".into(),
                    tool_name: "read_file".into(),
                    result: serde_json::json!("contents"),
                    error: None,
                }],
            ),
        ];

        let items = neutral_to_input_items(&records, &mut ids);

        let ResponsesItem::FunctionCall { call_id: call_cid, .. } = &items[0] else {
            unreachable!("expected function_call item");
        };
        let ResponsesItem::FunctionCallOutput { call_id: output_cid, .. } = &items[1] else {
            unreachable!("expected function_call_output item");
        };
        assert_eq!(call_cid, output_cid);
    }
}
