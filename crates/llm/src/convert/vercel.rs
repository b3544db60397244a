//! Converter for the position-indexed vendor family (generic Vercel AI SDK
//! backend). No bimap: a decoded `tool-result` part is matched to the most
//! recent unresponded tool-call in the record being decoded, and encoding
//! simply omits any ID field.

use crate::convert;
use crate::history::{Block, NeutralRecord, Speaker};
use crate::wire::vercel::{VercelMessage, VercelPart, VercelRole};

pub fn neutral_to_messages(records: &[NeutralRecord]) -> Vec<VercelMessage> {
    let mut messages = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let dangling = convert::unresponded_call_ids_in_turn(record, &records[index + 1..]);
        let dangling_names: Vec<&str> = dangling
            .iter()
            .filter_map(|id| tool_name_for_call(record, id))
            .collect();

        // Tool responses are `user`-role parts in the Vercel wire shape, matched
        // to the preceding assistant turn's tool calls by position.
        let role = match record.speaker {
            Speaker::System => VercelRole::System,
            Speaker::Human | Speaker::Tool => VercelRole::User,
            Speaker::Ai => VercelRole::Assistant,
        };

        let mut parts = Vec::new();
        for block in &record.blocks {
            match block {
                Block::Text { text } if !text.is_empty() => parts.push(VercelPart::Text { text: text.clone() }),
                Block::Thought { text } => parts.push(VercelPart::Reasoning { text: text.clone() }),
                Block::ToolCall { name, parameters, .. } => parts.push(VercelPart::ToolCall {
                    tool_name: name.clone(),
                    args: parameters.clone(),
                }),
                Block::ToolResponse { tool_name, result, error, .. } => parts.push(VercelPart::ToolResult {
                    tool_name: tool_name.clone(),
                    result: result.clone(),
                    is_error: error.is_some(),
                }),
                _ => {}
            }
        }

        for name in dangling_names {
            parts.push(VercelPart::ToolResult {
                tool_name: name.to_string(),
                result: serde_json::Value::Null,
                is_error: true,
            });
        }

        if !parts.is_empty() {
            messages.push(VercelMessage { role, parts });
        }
    }

    messages
}

fn tool_name_for_call<'a>(record: &'a NeutralRecord, call_id: &str) -> Option<&'a str> {
    record.blocks.iter().find_map(|block| match block {
        Block::ToolCall { id, name, .. } if id == call_id => Some(name.as_str()),
        _ => None,
    })
}

/// `V_tool_use_to_neutral_tool_call`: no vendor ID exists to translate, so the
/// caller supplies a fresh canonical ID via `HistoryService::allocate_tool_call_id`.
pub fn tool_call_to_neutral(canonical_id: String, tool_name: &str, args: &serde_json::Value) -> Block {
    Block::ToolCall { id: canonical_id, name: tool_name.to_string(), parameters: args.clone() }
}

/// `V_tool_result_to_neutral_tool_response`: `call_id` here is whatever
/// canonical ID the decoder matched this part to by position (see
/// `crate::provider::vercel` for the position-matching loop).
pub fn tool_result_to_neutral_tool_response(call_id: String, tool_name: &str, result: &serde_json::Value, is_error: bool) -> Block {
    // A real vendor-reported error carries the actual result payload as the
    // error text; `INTERRUPTED_MARKER` is reserved for the synthesize-on-encode
    // path, not for decoding a genuine failure.
    Block::ToolResponse {
        call_id,
        tool_name: tool_name.to_string(),
        result: result.clone(),
        error: if is_error { Some(convert::stringify_tool_result(result)) } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_and_result_carry_no_id_field() {
        let records = vec![
            NeutralRecord::new(
                Speaker::Ai,
                vec![Block::ToolCall {
                    id: "hist_tool_1".into(),
                    name: "get_weather".into(),
                    parameters: serde_json::json!({"city": "nyc"}),
                }],
            ),
            NeutralRecord::new(
                Speaker::Tool,
                vec![Block::ToolResponse {
                    call_id: "hist_tool_1".into(),
                    tool_name: "get_weather".into(),
                    result: serde_json::json!("72F"),
                    error: None,
                }],
            ),
        ];

        let messages = neutral_to_messages(&records);
        let json = serde_json::to_value(&messages).unwrap();
        assert!(json[0]["parts"][0].get("id").is_none());
        assert!(json[1]["parts"][0].get("id").is_none());
    }

    #[test]
    fn dangling_call_becomes_error_result_part() {
        let records = vec![NeutralRecord::new(
            Speaker::Ai,
            vec![Block::ToolCall {
                id: "hist_tool_1".into(),
                name: "get_weather".into(),
                parameters: serde_json::json!({}),
            }],
        )];

        let messages = neutral_to_messages(&records);
        assert_eq!(messages[0].parts.len(), 2);
        assert!(matches!(messages[0].parts[1], VercelPart::ToolResult { is_error: true, .. }));
    }
}
