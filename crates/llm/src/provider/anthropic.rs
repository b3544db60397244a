//! Anthropic Messages API adapter (explicit-ID family, `toolu_<n>` shape).
//! Uses the `anthropic-version` header, SSE decoding via `eventsource-stream`,
//! and the status-to-taxonomy mapping shared with every other adapter.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use crate::convert::ToolCallIdMap;
use crate::convert::anthropic as convert;
use crate::error::{LlmError, Result};
use crate::history::{Block, HistoryService, Metadata, NeutralRecord, Speaker, Usage};
use crate::provider::http_client::default_http_client_builder;
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};
use crate::wire::anthropic::{
    AnthropicContent, AnthropicContentDelta, AnthropicRequest, AnthropicResponse, AnthropicStreamEvent, AnthropicTool,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    name: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self { name: name.into(), default_model: default_model.into() }
    }

    fn base_url(options: &ChatCompletionOptions) -> String {
        options.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn client(options: &ChatCompletionOptions) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(options.auth.expose_secret())
                .map_err(|e| LlmError::Internal(format!("invalid auth header value: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        default_http_client_builder(headers)
            .build()
            .map_err(|e| LlmError::Internal(format!("failed to build Anthropic HTTP client: {e}")))
    }

    fn build_request(options: &ChatCompletionOptions, ids: &mut ToolCallIdMap, stream: bool) -> AnthropicRequest {
        let messages = convert::neutral_to_messages(&options.contents, ids);
        let system = convert::system_prompt_of(&options.contents);

        let tools = if options.tools.is_empty() {
            None
        } else {
            Some(
                options
                    .tools
                    .iter()
                    .map(|tool| AnthropicTool {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.parameters.clone(),
                    })
                    .collect(),
            )
        };

        AnthropicRequest {
            model: options.model.clone(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            system,
            temperature: None,
            stream: Some(stream),
            tools,
            tool_choice: None,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        crate::cancellation::check(&options.cancel)?;

        let client = Self::client(&options)?;
        let url = format!("{}/messages", Self::base_url(&options));
        let streaming = options.ephemerals.streaming_enabled(true);
        let mut ids = ToolCallIdMap::new();
        let request = Self::build_request(&options, &mut ids, streaming);

        let body = serde_json::to_vec(&request).map_err(|e| LlmError::Internal(format!("serializing request: {e}")))?;

        let response = client
            .request(Method::POST, &url)
            .headers(options.custom_headers.clone())
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
            let parsed: AnthropicResponse = serde_json::from_str(&text)
                .map_err(|e| LlmError::ProviderError { message: format!("failed to parse Anthropic response: {e}"), original: None })?;

            let record = response_to_record(parsed, &mut ids, history);
            return Ok(Box::pin(futures::stream::once(async { Ok(record) })));
        }

        let event_stream = response.bytes_stream().eventsource();
        let history = history.clone();

        let chunk_stream = futures::stream::unfold(
            (event_stream, ids, history, None::<(String, String)>, String::new()),
            move |(mut events, mut ids, history, mut pending_tool, mut pending_json)| async move {
                loop {
                    let event = events.next().await?;
                    let event = match event {
                        Ok(event) => event,
                        Err(error) => {
                            log::warn!("Anthropic SSE parse error: {error}");
                            continue;
                        }
                    };

                    let parsed: AnthropicStreamEvent = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(error) => {
                            log::warn!("failed to parse Anthropic stream event: {error}");
                            continue;
                        }
                    };

                    match parsed {
                        AnthropicStreamEvent::ContentBlockDelta { delta: AnthropicContentDelta::TextDelta { text }, .. } => {
                            let record = NeutralRecord::new(Speaker::Ai, vec![Block::Text { text }]);
                            return Some((Ok(record), (events, ids, history, pending_tool, pending_json)));
                        }
                        AnthropicStreamEvent::ContentBlockStart {
                            content_block: AnthropicContent::ToolUse { id, name, .. },
                            ..
                        } => {
                            pending_json.clear();
                            pending_tool = Some((id, name));
                            continue;
                        }
                        AnthropicStreamEvent::ContentBlockDelta {
                            delta: AnthropicContentDelta::InputJsonDelta { partial_json },
                            ..
                        } => {
                            pending_json.push_str(&partial_json);
                            continue;
                        }
                        AnthropicStreamEvent::ContentBlockStop { .. } => {
                            let Some((id, name)) = pending_tool.take() else { continue };
                            let input: serde_json::Value = if pending_json.is_empty() {
                                serde_json::Value::Object(Default::default())
                            } else {
                                serde_json::from_str(&pending_json).unwrap_or_else(|error| {
                                    log::warn!("failed to parse accumulated tool-call input for '{name}': {error}");
                                    serde_json::Value::Object(Default::default())
                                })
                            };
                            pending_json.clear();
                            let block = convert::tool_use_to_neutral_tool_call(&id, &name, &input, &mut ids, &history);
                            let record = NeutralRecord::new(Speaker::Ai, vec![block]);
                            return Some((Ok(record), (events, ids, history, pending_tool, pending_json)));
                        }
                        AnthropicStreamEvent::Error { error } => {
                            return Some((
                                Err(LlmError::ProviderError { message: error.message, original: None }),
                                (events, ids, history, pending_tool, pending_json),
                            ));
                        }
                        AnthropicStreamEvent::MessageStop => return None,
                        _ => continue,
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(vec![ModelDescriptor {
            id: self.default_model.clone(),
            owned_by: "anthropic".to_string(),
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

fn response_to_record(response: AnthropicResponse, ids: &mut ToolCallIdMap, history: &HistoryService) -> NeutralRecord {
    let mut blocks = Vec::new();

    for block in &response.content {
        match block {
            AnthropicContent::Text { text } => blocks.push(Block::Text { text: text.clone() }),
            AnthropicContent::ToolUse { id, name, input } => {
                blocks.push(convert::tool_use_to_neutral_tool_call(id, name, input, ids, history));
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
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
        finish_reason: response.stop_reason.map(|reason| format!("{reason:?}")),
        ..Metadata::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_configured_default_model() {
        let provider = AnthropicProvider::new("anthropic", "claude-sonnet-4");
        assert_eq!(provider.get_default_model(), "claude-sonnet-4");
        assert_eq!(provider.name(), "anthropic");
    }

    use axum::{Json, Router, extract::State, http::HeaderMap, response::IntoResponse, routing::post};
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct CaptureState {
        captured: Arc<StdMutex<Option<(HeaderMap, serde_json::Value)>>>,
    }

    async fn handle_messages(State(state): State<CaptureState>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> impl IntoResponse {
        *state.captured.lock().unwrap() = Some((headers, body));

        Json(serde_json::json!({
            "id": "msg_test",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi there"}],
            "model": "claude-sonnet-4",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }))
    }

    #[tokio::test]
    async fn generate_chat_completion_sends_version_header_and_parses_response() {
        let state = CaptureState { captured: Arc::new(StdMutex::new(None)) };

        let app = Router::new().route("/messages", post(handle_messages)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = AnthropicProvider::new("anthropic", "claude-sonnet-4");
        let options = ChatCompletionOptions {
            model: "claude-sonnet-4".into(),
            contents: vec![NeutralRecord::new(Speaker::Human, vec![Block::Text { text: "hello".into() }])],
            tools: vec![],
            auth: SecretString::from("test-key".to_string()),
            base_url: Some(format!("http://{address}/v1")),
            custom_headers: HeaderMap::new(),
            ephemerals: crate::ephemerals::Ephemerals { streaming: Some(crate::ephemerals::StreamingMode::Disabled), ..Default::default() },
            cancel: crate::cancellation::CancellationToken::new(),
        };

        let history = HistoryService::new();
        let mut stream = provider.generate_chat_completion(options, &history).await.unwrap();
        let record = stream.next().await.unwrap().unwrap();
        let Block::Text { text } = &record.blocks[0] else { unreachable!() };
        assert_eq!(text, "hi there");

        let captured = state.captured.lock().unwrap().take().unwrap();
        assert_eq!(captured.0.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(captured.0.get("x-api-key").unwrap(), "test-key");
    }
}
