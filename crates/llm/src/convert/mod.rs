//! Bidirectional translation between [`NeutralRecord`](crate::history::NeutralRecord)
//! and each vendor's wire format.
//!
//! Converters never fail the whole conversion on malformed input: they emit a
//! best-effort record and log a warning rather than surfacing a parse error
//! for one malformed block.

pub mod anthropic;
pub mod openai_chat;
pub mod openai_responses;
pub mod vercel;

use std::collections::HashMap;

use crate::history::{Block, HistoryService, NeutralRecord};

/// Placeholder substituted for a tool response whose payload exceeded
/// `tool-output-max-tokens` under truncate mode.
pub const TRUNCATION_MARKER: &str = "[Output truncated due to token limit]";

/// Placeholder substituted for an assistant tool-call with no matching response
/// anywhere in the turn being sent, so every vendor ID on the wire has a partner.
pub const INTERRUPTED_MARKER: &str = "Tool execution was interrupted";

/// Per-request correlation between canonical history IDs and vendor-minted wire
/// IDs, owned by the adapter for the lifetime of one `generateChatCompletion`
/// call. Only the "explicit-ID" vendor families need one.
#[derive(Debug, Default)]
pub struct ToolCallIdMap {
    canonical_to_vendor: HashMap<String, String>,
    vendor_to_canonical: HashMap<String, String>,
    next_index: u32,
}

impl ToolCallIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or mint) the vendor ID for a canonical history ID, using `mint`
    /// to produce a fresh one (e.g. `|n| format!("call_{n}")`) the first time a
    /// given canonical ID is seen.
    pub fn vendor_id_for(&mut self, canonical_id: &str, mint: impl FnOnce(u32) -> String) -> String {
        if let Some(existing) = self.canonical_to_vendor.get(canonical_id) {
            return existing.clone();
        }

        self.next_index += 1;
        let vendor_id = mint(self.next_index);
        self.canonical_to_vendor.insert(canonical_id.to_string(), vendor_id.clone());
        self.vendor_to_canonical.insert(vendor_id.clone(), canonical_id.to_string());
        vendor_id
    }

    /// Look up a vendor ID already minted for `canonical_id`, without minting a
    /// new one if absent.
    pub fn canonical_to_vendor_lookup(&self, canonical_id: &str) -> Option<String> {
        self.canonical_to_vendor.get(canonical_id).cloned()
    }

    /// Translate a vendor ID to its canonical counterpart, allocating a new
    /// canonical ID via `history` the first time this vendor ID is seen (a
    /// decode-time first sighting).
    pub fn canonical_id_for(&mut self, vendor_id: &str, history: &HistoryService) -> String {
        if let Some(existing) = self.vendor_to_canonical.get(vendor_id) {
            return existing.clone();
        }

        let canonical_id = history.allocate_tool_call_id();
        self.vendor_to_canonical.insert(vendor_id.to_string(), canonical_id.clone());
        self.canonical_to_vendor.insert(canonical_id.clone(), vendor_id.to_string());
        canonical_id
    }
}

/// Truncates `text` to fit within `max_tokens`, using a rough 4-bytes-per-token
/// heuristic consistent with `crate::token_counter`'s estimator. Returns the
/// original string unchanged when it already fits.
pub fn truncate_tool_output(text: &str, max_tokens: u32) -> (String, bool) {
    let budget_bytes = max_tokens.saturating_mul(4) as usize;

    if text.len() <= budget_bytes {
        return (text.to_string(), false);
    }

    let mut cut = budget_bytes.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    (format!("{}\n{TRUNCATION_MARKER}", &text[..cut]), true)
}

/// Serializes a structured tool result into a stable string form for vendors
/// whose wire format requires a string payload. Scalars that are already
/// strings are passed through unescaped so callers see plain text, not a
/// quoted JSON string.
pub fn stringify_tool_result(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Finds assistant tool-calls within `record` with no matching `tool_response`
/// anywhere in `remaining` records that follow it, for the "synthesize an
/// interrupted placeholder" rule.
pub fn unresponded_call_ids_in_turn<'a>(record: &'a NeutralRecord, remaining: &[NeutralRecord]) -> Vec<&'a str> {
    let responded: std::collections::HashSet<&str> = remaining
        .iter()
        .flat_map(|r| r.tool_response_call_ids())
        .collect();

    record
        .tool_call_ids()
        .filter(|id| !responded.contains(id))
        .collect()
}

/// Builds the synthetic "interrupted" tool-response block used by adapters
/// right before sending, when an assistant turn's tool-call has no response
/// anywhere later in the conversation being submitted.
pub fn synthesize_interrupted_response(call_id: &str, tool_name: &str) -> Block {
    Block::ToolResponse {
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        result: serde_json::Value::Null,
        error: Some(INTERRUPTED_MARKER.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_id_map_mints_once_per_canonical_id() {
        let mut map = ToolCallIdMap::new();
        let first = map.vendor_id_for("hist_tool_a", |n| format!("call_{n}"));
        let second = map.vendor_id_for("hist_tool_a", |n| format!("call_{n}"));
        assert_eq!(first, second);

        let third = map.vendor_id_for("hist_tool_b", |n| format!("call_{n}"));
        assert_ne!(first, third);
    }

    #[test]
    fn canonical_id_for_allocates_through_history() {
        let history = HistoryService::new();
        let mut map = ToolCallIdMap::new();

        let canonical = map.canonical_id_for("call_1", &history);
        assert!(canonical.starts_with("hist_tool_"));
        assert_eq!(map.canonical_id_for("call_1", &history), canonical);
    }

    #[test]
    fn truncate_tool_output_appends_marker_only_when_over_budget() {
        let (short, truncated) = truncate_tool_output("hi", 100);
        assert_eq!(short, "hi");
        assert!(!truncated);

        let long = "x".repeat(1000);
        let (result, truncated) = truncate_tool_output(&long, 10);
        assert!(truncated);
        assert!(result.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn stringify_tool_result_passes_strings_through_unquoted() {
        assert_eq!(stringify_tool_result(&serde_json::json!("hello")), "hello");
        assert_eq!(stringify_tool_result(&serde_json::json!({"a": 1})), "{\"a\":1}");
    }
}
