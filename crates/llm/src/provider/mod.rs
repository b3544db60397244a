//! Uniform async-stream surface every backend implements.

mod http_client;

pub mod anthropic;
pub mod dump_context;
pub mod openai_chat;
pub mod openai_responses;
pub mod vercel;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::error::{LlmError, Result};
use crate::ephemerals::Ephemerals;
use crate::history::{HistoryService, NeutralRecord};

/// A tool definition as offered to the model, vendor-agnostic (JSON Schema
/// parameters, as every adapter's wire format accepts).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Everything a call to `generate_chat_completion` needs: the neutral
/// conversation so far, the tools on offer, resolved auth/routing, and the
/// ephemeral overrides for this one invocation.
pub struct ChatCompletionOptions {
    pub model: String,
    pub contents: Vec<NeutralRecord>,
    pub tools: Vec<ToolDefinition>,
    pub auth: SecretString,
    pub base_url: Option<String>,
    pub custom_headers: reqwest::header::HeaderMap,
    pub ephemerals: Ephemerals,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub owned_by: String,
    pub supports_tools: bool,
}

pub type ChatCompletionStream = Pin<Box<dyn Stream<Item = Result<NeutralRecord>> + Send>>;

/// The capability set every backend — a concrete vendor adapter, a
/// `RetryOrchestrator`, or a `LoadBalancingProvider` — implements: a single
/// `Provider` trait with tagged variants rather than one trait per adapter
/// kind.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream>;

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>>;

    fn get_default_model(&self) -> &str;

    fn get_server_tools(&self) -> &[String] {
        &[]
    }

    async fn invoke_server_tool(&self, name: &str, _params: Value, _cancel: &CancellationToken) -> Result<Value> {
        Err(LlmError::NotFound(format!("server tool '{name}' is not implemented by this provider")))
    }

    fn name(&self) -> &str;

    /// Capability flag `RetryOrchestrator` uses to detect it's wrapping a
    /// `LoadBalancingProvider`, which already has its own retry/failover loop
    /// and must be passed through untouched.
    fn is_load_balancer(&self) -> bool {
        false
    }
}

/// Shared HTTP status → taxonomy mapping, so the four adapters don't drift on
/// what counts as a 429 vs a 5xx.
pub(crate) fn error_from_status(status: u16, body: String, retry_after: Option<&reqwest::header::HeaderValue>) -> LlmError {
    let retry_after = retry_after.and_then(|value| value.to_str().ok()).and_then(parse_retry_after);
    LlmError::from_status(status, body, retry_after)
}

/// Parses a `Retry-After` header value, which per HTTP may be either a
/// delay in seconds or an HTTP-date.
pub(crate) fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(std::time::Duration::from_secs(seconds));
    }

    let target = jiff::Timestamp::strptime("%a, %d %b %Y %H:%M:%S GMT", value.trim()).ok()?;
    let now = jiff::Timestamp::now();
    let seconds = target.since(now).ok()?.total(jiff::Unit::Second).ok()?;
    Some(std::time::Duration::from_secs_f64(seconds.max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_after_reads_plain_seconds() {
        assert_eq!(parse_retry_after("2"), Some(std::time::Duration::from_secs(2)));
    }

    #[test]
    fn default_server_tools_is_empty() {
        struct Stub;

        #[async_trait]
        impl Provider for Stub {
            async fn generate_chat_completion(
                &self,
                _options: ChatCompletionOptions,
                _history: &HistoryService,
            ) -> Result<ChatCompletionStream> {
                unimplemented!()
            }

            async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
                Ok(vec![])
            }

            fn get_default_model(&self) -> &str {
                "stub-model"
            }

            fn name(&self) -> &str {
                "stub"
            }
        }

        assert!(Stub.get_server_tools().is_empty());
        assert!(!Stub.is_load_balancer());
    }
}
