//! Multi-provider LLM request pipeline.
//!
//! Conversations live in a vendor-agnostic [`history::NeutralRecord`] log
//! owned by a [`history::HistoryService`], translated to and from each
//! backend's wire format by [`convert`], and sent through a [`provider::Provider`]
//! implementation — a single vendor adapter, a [`retry::RetryOrchestrator`]
//! wrapping one, or a [`load_balancer::LoadBalancingProvider`] spanning
//! several. [`bucket`] tracks the credential/endpoint buckets the retry
//! orchestrator fails over across; [`ephemerals`] carries the per-call
//! overrides (retry counts, streaming, tool-output truncation, reasoning
//! effort) that flow down from the caller into a single request.

pub mod bucket;
pub mod cancellation;
pub mod convert;
pub mod ephemerals;
pub mod error;
pub mod history;
pub mod load_balancer;
pub mod provider;
pub mod retry;
pub mod token_counter;
pub mod wire;

pub use bucket::{Bucket, BucketFailoverController};
pub use error::{LlmError, Result};
pub use ephemerals::Ephemerals;
pub use history::{HistoryService, NeutralRecord};
pub use load_balancer::{LoadBalancingProvider, Strategy as LoadBalancingStrategy, SubProfile};
pub use provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider, ToolDefinition};
pub use retry::{RetryConfig, RetryOrchestrator, ThrottleTracker};
