//! Provider-neutral conversation record and block taxonomy.
//!
//! This is the internal representation every vendor converter translates to and
//! from. Unlike a protocol-specific wire type, a [`NeutralRecord`] never carries a
//! vendor tool-call ID directly — those only ever exist inside an adapter's
//! per-request bimap (see `crate::convert`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a [`NeutralRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Human,
    Ai,
    Tool,
    System,
}

/// A single turn in the conversation log.
///
/// Block order within a record is significant and must be preserved through
/// every conversion round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralRecord {
    pub speaker: Speaker,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NeutralRecord {
    pub fn new(speaker: Speaker, blocks: Vec<Block>) -> Self {
        Self {
            speaker,
            blocks,
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Tool-call IDs this record introduces.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            Block::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// Tool-response `call_id`s this record resolves.
    pub fn tool_response_call_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            Block::ToolResponse { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }

    /// True if this record carries no blocks at all, or only whitespace text.
    pub fn is_empty_turn(&self) -> bool {
        self.blocks.iter().all(|block| match block {
            Block::Text { text } => text.trim().is_empty(),
            _ => false,
        })
    }
}

/// Content block variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Block {
    Text {
        text: String,
    },
    /// `id` is always a canonical `hist_tool_<uuid>` allocated by the
    /// [`crate::history::HistoryService`] — never a vendor ID.
    ToolCall {
        id: String,
        name: String,
        parameters: Value,
    },
    /// `call_id` must equal the `id` of a preceding `ToolCall` block in the same
    /// history. This invariant is enforced on `append`, but may be transiently
    /// violated mid-decode, before the referenced call has been appended.
    ToolResponse {
        call_id: String,
        tool_name: String,
        result: Value,
        error: Option<String>,
    },
    Thought {
        text: String,
    },
    Image {
        source: ImageSource,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Per-record metadata. Every field is optional; `usage`, when present, must
/// satisfy `total == prompt + completion` whenever all three are given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub usage: Option<Usage>,
    pub created_at: Option<i64>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// `true` if the three counts are internally consistent.
    pub fn is_consistent(&self) -> bool {
        self.total_tokens == self.prompt_tokens + self.completion_tokens
    }
}
