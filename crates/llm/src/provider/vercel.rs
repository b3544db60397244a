//! Generic Vercel AI SDK-compatible adapter (position-indexed family). The
//! wire carries no stable tool-call ID, so decoding matches a `tool-result`
//! part to the oldest outstanding tool-call part seen so far in the same
//! response, in order.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;

use crate::convert::vercel as convert;
use crate::error::{LlmError, Result};
use crate::history::{Block, HistoryService, Metadata, NeutralRecord, Speaker, Usage};
use crate::provider::http_client::http_client;
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};
use crate::wire::vercel::{VercelFinishReason, VercelPart, VercelRequest, VercelResponse, VercelStreamEvent, VercelTool};

const DEFAULT_BASE_URL: &str = "https://ai-gateway.vercel.sh/v1";

pub struct VercelProvider {
    client: reqwest::Client,
    name: String,
    default_model: String,
}

impl VercelProvider {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self { client: http_client(), name: name.into(), default_model: default_model.into() }
    }

    fn base_url(options: &ChatCompletionOptions) -> String {
        options.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn build_request(options: &ChatCompletionOptions, stream: bool) -> VercelRequest {
        let messages = convert::neutral_to_messages(&options.contents);
        let tools = if options.tools.is_empty() {
            None
        } else {
            Some(
                options
                    .tools
                    .iter()
                    .map(|tool| VercelTool {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    })
                    .collect(),
            )
        };

        VercelRequest {
            model: options.model.clone(),
            messages,
            max_output_tokens: None,
            temperature: None,
            tools,
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl Provider for VercelProvider {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        crate::cancellation::check(&options.cancel)?;

        let url = format!("{}/chat/completions", Self::base_url(&options));
        let streaming = options.ephemerals.streaming_enabled(true);
        let request = Self::build_request(&options, streaming);

        let body = serde_json::to_vec(&request).map_err(|e| LlmError::Internal(format!("serializing request: {e}")))?;

        let response = self
            .client
            .request(Method::POST, &url)
            .headers(options.custom_headers.clone())
            .header(AUTHORIZATION, format!("Bearer {}", options.auth.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response.headers().get(reqwest::header::RETRY_AFTER).cloned();
            let text = response.text().await.unwrap_or_default();
            return Err(crate::provider::error_from_status(status.as_u16(), text, retry_after.as_ref()));
        }

        if !streaming {
            let text = response.text().await?;
            let parsed: VercelResponse = serde_json::from_str(&text)
                .map_err(|e| LlmError::ProviderError { message: format!("failed to parse Vercel response: {e}"), original: None })?;

            let record = response_to_record(parsed, history);
            return Ok(Box::pin(futures::stream::once(async { Ok(record) })));
        }

        let event_stream = response.bytes_stream().eventsource();
        let history = history.clone();
        let pending: HashMap<u32, PendingVercelCall> = HashMap::new();

        let chunk_stream = futures::stream::unfold(
            (event_stream, history, pending, false),
            |(mut events, history, mut pending, mut terminal)| async move {
                loop {
                    if terminal {
                        return None;
                    }

                    let event = events.next().await?;
                    let event = match event {
                        Ok(event) => event,
                        Err(error) => {
                            log::warn!("Vercel SSE parse error: {error}");
                            continue;
                        }
                    };

                    let parsed: VercelStreamEvent = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(error) => {
                            log::warn!("failed to parse Vercel stream event: {error}");
                            continue;
                        }
                    };

                    match parsed {
                        VercelStreamEvent::TextDelta { delta, .. } => {
                            let record = NeutralRecord::new(Speaker::Ai, vec![Block::Text { text: delta }]);
                            return Some((Ok(record), (events, history, pending, terminal)));
                        }
                        VercelStreamEvent::ToolCallStart { part_index, tool_name } => {
                            let canonical_id = history.allocate_tool_call_id();
                            pending.insert(part_index, PendingVercelCall { canonical_id, tool_name, args_text: String::new() });
                            continue;
                        }
                        VercelStreamEvent::ToolCallDelta { part_index, args_text_delta } => {
                            if let Some(entry) = pending.get_mut(&part_index) {
                                entry.args_text.push_str(&args_text_delta);
                            }
                            continue;
                        }
                        VercelStreamEvent::Finish { .. } => {
                            terminal = true;
                            let blocks = finalize_pending_tool_calls(std::mem::take(&mut pending));
                            if blocks.is_empty() {
                                return None;
                            }
                            return Some((Ok(NeutralRecord::new(Speaker::Ai, blocks)), (events, history, pending, terminal)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(vec![ModelDescriptor {
            id: self.default_model.clone(),
            owned_by: "vercel".to_string(),
            supports_tools: true,
        }])
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn response_to_record(response: VercelResponse, history: &HistoryService) -> NeutralRecord {
    let mut blocks = Vec::new();
    let mut outstanding: VecDeque<String> = VecDeque::new();

    for part in &response.message.parts {
        match part {
            VercelPart::Text { text } => blocks.push(Block::Text { text: text.clone() }),
            VercelPart::Reasoning { text } => blocks.push(Block::Thought { text: text.clone() }),
            VercelPart::ToolCall { tool_name, args } => {
                let canonical_id = history.allocate_tool_call_id();
                outstanding.push_back(canonical_id.clone());
                blocks.push(convert::tool_call_to_neutral(canonical_id, tool_name, args));
            }
            VercelPart::ToolResult { tool_name, result, is_error } => {
                let Some(call_id) = outstanding.pop_front() else {
                    log::warn!("Vercel tool-result part with no outstanding tool-call to match");
                    continue;
                };
                blocks.push(convert::tool_result_to_neutral_tool_response(call_id, tool_name, result, *is_error));
            }
        }
    }

    if blocks.is_empty() {
        blocks.push(Block::Text { text: String::new() });
    }

    NeutralRecord::new(Speaker::Ai, blocks).with_metadata(Metadata {
        model_id: Some(response.model),
        usage: Some(Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
        finish_reason: Some(finish_reason_label(response.finish_reason)),
        ..Metadata::default()
    })
}

fn finish_reason_label(reason: VercelFinishReason) -> String {
    format!("{reason:?}")
}

/// One tool-call part assembled across however many `ToolCallDelta` events
/// carry its `args_text_delta` fragments, keyed by the part's stream index.
struct PendingVercelCall {
    canonical_id: String,
    tool_name: String,
    args_text: String,
}

fn finalize_pending_tool_calls(pending: HashMap<u32, PendingVercelCall>) -> Vec<Block> {
    let mut entries: Vec<_> = pending.into_iter().collect();
    entries.sort_by_key(|(index, _)| *index);

    entries
        .into_iter()
        .map(|(_, call)| {
            let args = serde_json::from_str(&call.args_text).unwrap_or(serde_json::Value::Null);
            convert::tool_call_to_neutral(call.canonical_id, &call.tool_name, &args)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_configured_default_model() {
        let provider = VercelProvider::new("vercel", "gemini-2.5-pro");
        assert_eq!(provider.get_default_model(), "gemini-2.5-pro");
        assert_eq!(provider.name(), "vercel");
    }
}
