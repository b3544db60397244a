//! Per-invocation settings overriding component defaults. These are plain,
//! caller-populated structs — no file-loading or validation lives here,
//! that's the embedding CLI's concern.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutputTruncateMode {
    Truncate,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpContextMode {
    Off,
    On,
    Error,
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningSettings {
    pub effort: Option<ReasoningEffort>,
    pub summary: Option<ReasoningSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ephemerals {
    pub retries: Option<u32>,
    pub retrywait: Option<u64>,
    pub streaming: Option<StreamingMode>,
    pub timeout_ms: Option<u64>,
    pub failover_retry_count: Option<u32>,
    #[serde(rename = "tool-output-max-tokens")]
    pub tool_output_max_tokens: Option<u32>,
    #[serde(rename = "tool-output-truncate-mode")]
    pub tool_output_truncate_mode: Option<ToolOutputTruncateMode>,
    pub dumpcontext: Option<DumpContextMode>,
    #[serde(rename = "custom-headers")]
    pub custom_headers: Option<HashMap<String, String>>,
    pub reasoning: Option<ReasoningSettings>,
}

impl Ephemerals {
    pub fn streaming_enabled(&self, default: bool) -> bool {
        match self.streaming {
            Some(StreamingMode::Enabled) => true,
            Some(StreamingMode::Disabled) => false,
            None => default,
        }
    }

    pub fn dump_mode(&self) -> DumpContextMode {
        self.dumpcontext.unwrap_or(DumpContextMode::Off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_kebab_case_keys_from_json() {
        let json = serde_json::json!({
            "tool-output-max-tokens": 500,
            "tool-output-truncate-mode": "truncate",
            "custom-headers": {"x-trace-id": "abc"}
        });

        let ephemerals: Ephemerals = serde_json::from_value(json).unwrap();
        assert_eq!(ephemerals.tool_output_max_tokens, Some(500));
        assert_eq!(ephemerals.tool_output_truncate_mode, Some(ToolOutputTruncateMode::Truncate));
        assert_eq!(ephemerals.custom_headers.unwrap().get("x-trace-id").unwrap(), "abc");
    }

    #[test]
    fn streaming_enabled_falls_back_to_default_when_unset() {
        let ephemerals = Ephemerals::default();
        assert!(ephemerals.streaming_enabled(true));
        assert!(!ephemerals.streaming_enabled(false));
    }
}
