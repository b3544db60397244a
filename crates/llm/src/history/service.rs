use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::model::{Block, NeutralRecord};

/// The append-only conversation log and the sole authority for canonical
/// tool-call IDs.
///
/// Cloning a `HistoryService` clones a handle to the same underlying log (it is
/// `Arc`-backed): history is passed around as an explicit handle rather than a
/// module-global, so concurrent sessions stay isolated and tests can build
/// their own instance cheaply.
#[derive(Clone, Default)]
pub struct HistoryService {
    inner: Arc<Mutex<HistoryState>>,
}

#[derive(Default)]
struct HistoryState {
    records: Vec<NeutralRecord>,
}

impl HistoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh canonical ID. Never returns a previously allocated one
    /// (`uuid::Uuid::new_v4` makes collision astronomically unlikely, and we don't
    /// bother tracking previously-issued IDs beyond that).
    pub fn allocate_tool_call_id(&self) -> String {
        format!("hist_tool_{}", Uuid::new_v4())
    }

    /// Append a record to the log. O(1) amortized. Records referencing unknown
    /// canonical tool-call IDs are still stored — they simply show up later in
    /// [`HistoryService::find_unmatched`] — decoding order transiently produces
    /// exactly this state before the matching `ToolCall` record is appended.
    pub fn append(&self, record: NeutralRecord) {
        let mut state = self.inner.lock().expect("history mutex poisoned");
        state.records.push(record);
    }

    /// Every record, in insertion order.
    pub fn all(&self) -> Vec<NeutralRecord> {
        self.inner.lock().expect("history mutex poisoned").records.clone()
    }

    /// Records with empty turns and dangling trailing tool-calls (calls with no
    /// response anywhere later in the log) removed. Idempotent: curating a
    /// curated transcript returns the same sequence.
    pub fn curated(&self) -> Vec<NeutralRecord> {
        let records = self.all();
        let unmatched = Self::unmatched_ids(&records);

        records
            .into_iter()
            .filter(|record| !record.is_empty_turn())
            .map(|mut record| {
                if !unmatched.is_empty() {
                    record.blocks.retain(|block| match block {
                        Block::ToolCall { id, .. } => !unmatched.contains(id.as_str()),
                        _ => true,
                    });
                }
                record
            })
            .filter(|record| !record.blocks.is_empty())
            .collect()
    }

    /// The set of tool-call IDs with no matching `ToolResponse` anywhere in the log.
    pub fn find_unmatched(&self) -> std::collections::HashSet<String> {
        let records = self.all();
        Self::unmatched_ids(&records).into_iter().map(str::to_string).collect()
    }

    fn unmatched_ids(records: &[NeutralRecord]) -> std::collections::HashSet<&str> {
        let mut calls: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut responded: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for record in records {
            calls.extend(record.tool_call_ids());
            responded.extend(record.tool_response_call_ids());
        }

        calls.difference(&responded).copied().collect()
    }

    /// Empties the log. Allocated IDs are not reused even across a reset; nothing
    /// tracks them, so this is purely a matter of not appending anything that
    /// would collide (astronomically unlikely either way).
    pub fn reset(&self) {
        let mut state = self.inner.lock().expect("history mutex poisoned");
        state.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::model::{Metadata, Speaker};
    use serde_json::json;

    fn tool_call(id: &str) -> Block {
        Block::ToolCall {
            id: id.to_string(),
            name: "read_file".to_string(),
            parameters: json!({"path": "/x"}),
        }
    }

    fn tool_response(call_id: &str) -> Block {
        Block::ToolResponse {
            call_id: call_id.to_string(),
            tool_name: "read_file".to_string(),
            result: json!("hi"),
            error: None,
        }
    }

    #[test]
    fn allocated_ids_are_unique_and_well_formed() {
        let history = HistoryService::new();
        let a = history.allocate_tool_call_id();
        let b = history.allocate_tool_call_id();

        assert_ne!(a, b);
        assert!(a.starts_with("hist_tool_"));
        assert!(b.starts_with("hist_tool_"));
    }

    #[test]
    fn find_unmatched_reports_calls_without_responses() {
        let history = HistoryService::new();
        let id = history.allocate_tool_call_id();

        history.append(NeutralRecord::new(
            Speaker::Ai,
            vec![Block::Text { text: "ok".into() }, tool_call(&id)],
        ));

        let unmatched = history.find_unmatched();
        assert_eq!(unmatched.len(), 1);
        assert!(unmatched.contains(&id));

        history.append(NeutralRecord::new(Speaker::Tool, vec![tool_response(&id)]));
        assert!(history.find_unmatched().is_empty());
    }

    #[test]
    fn curated_drops_empty_turns_and_dangling_calls() {
        let history = HistoryService::new();
        let answered = history.allocate_tool_call_id();
        let dangling = history.allocate_tool_call_id();

        history.append(NeutralRecord::new(Speaker::Human, vec![Block::Text { text: "  ".into() }]));
        history.append(NeutralRecord::new(
            Speaker::Ai,
            vec![tool_call(&answered), tool_call(&dangling)],
        ));
        history.append(NeutralRecord::new(Speaker::Tool, vec![tool_response(&answered)]));

        let curated = history.curated();

        // the blank human turn is gone entirely
        assert!(curated.iter().all(|r| !matches!(r.speaker, Speaker::Human)));

        let ai_turn = curated
            .iter()
            .find(|r| matches!(r.speaker, Speaker::Ai))
            .expect("ai turn survives");
        assert_eq!(ai_turn.tool_call_ids().collect::<Vec<_>>(), vec![answered.as_str()]);
    }

    #[test]
    fn curated_is_idempotent() {
        let history = HistoryService::new();
        let id = history.allocate_tool_call_id();

        history.append(NeutralRecord::new(Speaker::Ai, vec![tool_call(&id)]));
        history.append(
            NeutralRecord::new(Speaker::Tool, vec![tool_response(&id)])
                .with_metadata(Metadata::default()),
        );

        let once = history.curated();
        // curating a log built only from curated-survivable records is a fixed point
        let twice_history = HistoryService::new();
        for record in &once {
            twice_history.append(record.clone());
        }
        assert_eq!(format!("{:?}", once), format!("{:?}", twice_history.curated()));
    }

    #[test]
    fn reset_empties_the_log() {
        let history = HistoryService::new();
        history.append(NeutralRecord::new(Speaker::Human, vec![Block::Text { text: "hi".into() }]));
        assert_eq!(history.all().len(), 1);

        history.reset();
        assert!(history.all().is_empty());
    }
}
