//! OpenAI Responses adapter (explicit-ID family, `input` item-list shape).
//! Shares HTTP client tuning and status-to-taxonomy mapping with
//! `provider::openai_chat`; differs only in the wire shape.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;

use crate::convert::ToolCallIdMap;
use crate::convert::openai_responses as convert;
use crate::error::{LlmError, Result};
use crate::history::{Block, HistoryService, Metadata, NeutralRecord, Speaker, Usage};
use crate::provider::http_client::http_client;
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};
use crate::wire::openai_responses::{
    ResponsesItem, ResponsesReasoning, ResponsesRequest, ResponsesResponse, ResponsesStreamEvent, ResponsesTool,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
    name: String,
    default_model: String,
}

impl OpenAiResponsesProvider {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self { client: http_client(), name: name.into(), default_model: default_model.into() }
    }

    fn base_url(options: &ChatCompletionOptions) -> String {
        options.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn build_request(options: &ChatCompletionOptions, ids: &mut ToolCallIdMap, stream: bool) -> ResponsesRequest {
        let input = convert::neutral_to_input_items(&options.contents, ids);

        let tools = if options.tools.is_empty() {
            None
        } else {
            Some(
                options
                    .tools
                    .iter()
                    .map(|tool| ResponsesTool {
                        tool_type: "function".to_string(),
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    })
                    .collect(),
            )
        };

        let reasoning = options.ephemerals.reasoning.as_ref().map(|settings| ResponsesReasoning {
            effort: settings.effort.map(|effort| format!("{effort:?}").to_lowercase()),
            summary: settings.summary.map(|summary| format!("{summary:?}").to_lowercase()),
        });

        ResponsesRequest {
            model: options.model.clone(),
            input,
            instructions: None,
            max_output_tokens: None,
            temperature: None,
            stream: Some(stream),
            tools,
            tool_choice: None,
            parallel_tool_calls: None,
            reasoning,
        }
    }
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        crate::cancellation::check(&options.cancel)?;

        let url = format!("{}/responses", Self::base_url(&options));
        let streaming = options.ephemerals.streaming_enabled(true);
        let mut ids = ToolCallIdMap::new();
        let request = Self::build_request(&options, &mut ids, streaming);

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
            let parsed: ResponsesResponse = serde_json::from_str(&text)
                .map_err(|e| LlmError::ProviderError { message: format!("failed to parse Responses output: {e}"), original: None })?;

            let record = response_to_record(parsed, &mut ids, history);
            return Ok(Box::pin(futures::stream::once(async { Ok(record) })));
        }

        let event_stream = response.bytes_stream().eventsource();
        let history = history.clone();

        let chunk_stream = futures::stream::unfold((event_stream, ids, history), |(mut events, mut ids, history)| async move {
            loop {
                let event = events.next().await?;
                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        log::warn!("Responses SSE parse error: {error}");
                        continue;
                    }
                };

                let parsed: ResponsesStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        log::warn!("failed to parse Responses stream event: {error}");
                        continue;
                    }
                };

                if let Some(record) = stream_event_to_record(parsed, &mut ids, &history) {
                    return Some((Ok(record), (events, ids, history)));
                }
            }
        });

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

fn response_to_record(response: ResponsesResponse, ids: &mut ToolCallIdMap, history: &HistoryService) -> NeutralRecord {
    let mut blocks = Vec::new();

    for item in &response.output {
        match item {
            ResponsesItem::Message { content, .. } => {
                for part in content {
                    if let crate::wire::openai_responses::ResponsesContent::OutputText { text } = part {
                        blocks.push(Block::Text { text: text.clone() });
                    }
                }
            }
            ResponsesItem::FunctionCall { call_id, name, arguments } => {
                blocks.push(convert::function_call_to_neutral(call_id, name, arguments, ids, history));
            }
            _ => {}
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
            total_tokens: response.usage.total_tokens,
        }),
        finish_reason: Some(format!("{:?}", response.status)),
        ..Metadata::default()
    })
}

fn stream_event_to_record(event: ResponsesStreamEvent, ids: &mut ToolCallIdMap, history: &HistoryService) -> Option<NeutralRecord> {
    match event {
        ResponsesStreamEvent::ResponseOutputTextDelta { delta, .. } => {
            Some(NeutralRecord::new(Speaker::Ai, vec![Block::Text { text: delta }]))
        }
        ResponsesStreamEvent::ResponseOutputItemDone {
            item: ResponsesItem::FunctionCall { call_id, name, arguments },
            ..
        } => {
            let block = convert::function_call_to_neutral(&call_id, &name, &arguments, ids, history);
            Some(NeutralRecord::new(Speaker::Ai, vec![block]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_configured_default_model() {
        let provider = OpenAiResponsesProvider::new("openai-responses", "gpt-5");
        assert_eq!(provider.get_default_model(), "gpt-5");
        assert_eq!(provider.name(), "openai-responses");
    }
}
