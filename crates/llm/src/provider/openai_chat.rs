//! OpenAI Chat Completions adapter (explicit-ID family, `messages` shape).
//! Wire payloads go through `sonic_rs`; the SSE byte stream is decoded with
//! `eventsource-stream`.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;

use crate::convert::ToolCallIdMap;
use crate::convert::openai_chat as convert;
use crate::error::{LlmError, Result};
use crate::history::{Block, HistoryService, Metadata, NeutralRecord, Speaker, Usage};
use crate::provider::http_client::http_client;
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};
use crate::wire::openai::{ChatMessage, ChatRequest, ChatResponse, ChatStreamChunk, ChatTool, ChatFunctionDef};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatProvider {
    client: reqwest::Client,
    name: String,
    default_model: String,
}

impl OpenAiChatProvider {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self { client: http_client(), name: name.into(), default_model: default_model.into() }
    }

    fn base_url(options: &ChatCompletionOptions) -> String {
        options.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn build_request(options: &ChatCompletionOptions, ids: &mut ToolCallIdMap, stream: bool) -> ChatRequest {
        let messages = convert::neutral_to_messages(&options.contents, ids);
        let tools = if options.tools.is_empty() {
            None
        } else {
            Some(
                options
                    .tools
                    .iter()
                    .map(|tool| ChatTool {
                        tool_type: "function".to_string(),
                        function: ChatFunctionDef {
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            parameters: tool.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        ChatRequest {
            model: options.model.clone(),
            messages,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: Some(stream),
            tools,
            tool_choice: None,
            parallel_tool_calls: None,
        }
    }
}

#[async_trait]
impl Provider for OpenAiChatProvider {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        crate::cancellation::check(&options.cancel)?;

        let url = format!("{}/chat/completions", Self::base_url(&options));
        let streaming = options.ephemerals.streaming_enabled(true);
        let mut ids = ToolCallIdMap::new();
        let request = Self::build_request(&options, &mut ids, streaming);

        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::Internal(format!("serializing request: {e}")))?;

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
            let parsed: ChatResponse = sonic_rs::from_str(&text)
                .map_err(|e| LlmError::ProviderError { message: format!("failed to parse OpenAI response: {e}"), original: None })?;

            let record = response_to_record(parsed, &mut ids, history);
            return Ok(Box::pin(futures::stream::once(async { Ok(record) })));
        }

        let event_stream = response.bytes_stream().eventsource();
        let history = history.clone();

        let chunk_stream = futures::stream::unfold(
            (event_stream, ids, history, HashMap::<u32, PendingToolCall>::new(), false),
            |(mut events, mut ids, history, mut pending, mut terminal)| async move {
                loop {
                    if terminal {
                        return None;
                    }

                    let event = events.next().await?;
                    let event = match event {
                        Ok(event) => event,
                        Err(error) => {
                            log::warn!("OpenAI SSE parse error: {error}");
                            continue;
                        }
                    };

                    if event.data == "[DONE]" {
                        terminal = true;
                        if pending.is_empty() {
                            return None;
                        }
                        let blocks = finalize_pending_tool_calls(std::mem::take(&mut pending));
                        if blocks.is_empty() {
                            return None;
                        }
                        return Some((Ok(NeutralRecord::new(Speaker::Ai, blocks)), (events, ids, history, pending, terminal)));
                    }

                    let chunk: ChatStreamChunk = match sonic_rs::from_str(&event.data) {
                        Ok(chunk) => chunk,
                        Err(error) => {
                            log::warn!("failed to parse OpenAI stream chunk: {error}");
                            continue;
                        }
                    };

                    let text_blocks = stream_chunk_text_blocks(&chunk);
                    accumulate_tool_calls(&chunk, &mut ids, &history, &mut pending);

                    if !text_blocks.is_empty() {
                        let record = NeutralRecord::new(Speaker::Ai, text_blocks);
                        return Some((Ok(record), (events, ids, history, pending, terminal)));
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(vec![ModelDescriptor {
            id: self.default_model.clone(),
            owned_by: "openai".to_string(),
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

fn response_to_record(response: ChatResponse, ids: &mut ToolCallIdMap, history: &HistoryService) -> NeutralRecord {
    let Some(choice) = response.choices.into_iter().next() else {
        return NeutralRecord::new(Speaker::Ai, vec![]);
    };

    let mut blocks = message_to_blocks(&choice.message, ids, history);
    if blocks.is_empty() {
        blocks.push(Block::Text { text: String::new() });
    }

    NeutralRecord::new(Speaker::Ai, blocks).with_metadata(Metadata {
        model_id: Some(response.model),
        usage: Some(Usage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        }),
        finish_reason: choice.finish_reason.map(|reason| format!("{reason:?}")),
        ..Metadata::default()
    })
}

fn message_to_blocks(message: &ChatMessage, ids: &mut ToolCallIdMap, history: &HistoryService) -> Vec<Block> {
    let mut blocks = Vec::new();

    if let Some(text) = &message.content {
        if !text.is_empty() {
            blocks.push(Block::Text { text: text.clone() });
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            blocks.push(convert::tool_use_to_neutral_tool_call(call, ids, history));
        }
    }

    blocks
}

/// Accumulates one in-progress tool call across however many streaming
/// deltas it takes to complete. Only the first delta for a given `index`
/// carries `id`/`name`; every later one contributes an `arguments` fragment.
#[derive(Default)]
struct PendingToolCall {
    canonical_id: Option<String>,
    name: String,
    arguments: String,
}

fn stream_chunk_text_blocks(chunk: &ChatStreamChunk) -> Vec<Block> {
    chunk
        .choices
        .iter()
        .filter_map(|choice| choice.delta.content.clone())
        .map(|text| Block::Text { text })
        .collect()
}

fn accumulate_tool_calls(chunk: &ChatStreamChunk, ids: &mut ToolCallIdMap, history: &HistoryService, pending: &mut HashMap<u32, PendingToolCall>) {
    for choice in &chunk.choices {
        let Some(tool_calls) = &choice.delta.tool_calls else { continue };

        for call in tool_calls {
            let entry = pending.entry(call.index).or_default();

            if let Some(vendor_id) = &call.id {
                entry.canonical_id = Some(ids.canonical_id_for(vendor_id, history));
            }

            if let Some(function) = &call.function {
                if let Some(name) = &function.name {
                    entry.name = name.clone();
                }
                entry.arguments.push_str(&function.arguments);
            }
        }
    }
}

fn finalize_pending_tool_calls(pending: HashMap<u32, PendingToolCall>) -> Vec<Block> {
    let mut entries: Vec<_> = pending.into_iter().collect();
    entries.sort_by_key(|(index, _)| *index);

    entries
        .into_iter()
        .filter_map(|(index, call)| {
            let Some(id) = call.canonical_id else {
                log::warn!("tool call at stream index {index} never received a vendor id; dropping");
                return None;
            };
            let parameters = sonic_rs::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
            Some(Block::ToolCall { id, name: call.name, parameters })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_configured_default_model() {
        let provider = OpenAiChatProvider::new("openai", "gpt-4.1");
        assert_eq!(provider.get_default_model(), "gpt-4.1");
        assert_eq!(provider.name(), "openai");
    }
}
