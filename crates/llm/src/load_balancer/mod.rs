//! LoadBalancingProvider: dispatches to N sub-profiles by a named strategy.
//! Not wrapped by `RetryOrchestrator` itself (it has its own failover loop)
//! — `Provider::is_load_balancer` is how the orchestrator detects and passes
//! it through untouched. Each sub-provider may still be individually wrapped
//! in its own `RetryOrchestrator` so per-backend transient errors retry.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::error::{LlmError, Result};
use crate::history::HistoryService;
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Failover,
    Weighted,
    HealthAware,
}

/// One backend the load balancer can dispatch to.
pub struct SubProfile {
    pub name: String,
    pub weight: u32,
    pub provider: Arc<dyn Provider>,
}

impl SubProfile {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self { name: name.into(), weight: 1, provider }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct BackendStats {
    total_requests: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_latency_ms: Option<u64>,
    mean_latency_ms: f64,
}

impl BackendStats {
    fn record_success(&mut self, latency: Duration) {
        self.total_requests += 1;
        self.successes += 1;
        self.consecutive_failures = 0;
        let latency_ms = latency.as_millis() as u64;
        self.last_latency_ms = Some(latency_ms);
        let n = self.successes as f64;
        self.mean_latency_ms += (latency_ms as f64 - self.mean_latency_ms) / n;
    }

    fn record_failure(&mut self, error: &LlmError) {
        self.total_requests += 1;
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendStatsSnapshot {
    pub name: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub mean_latency_ms: f64,
}

struct Lb {
    profile_name: String,
    strategy: Strategy,
    sub_profiles: Vec<SubProfile>,
    stats: Vec<Mutex<BackendStats>>,
    round_robin_cursor: Mutex<usize>,
    sticky_index: Mutex<usize>,
    timeout_ms: u64,
    failover_retry_count: u32,
}

/// Implements the `Provider` interface while dispatching to one of its
/// sub-profiles according to `strategy`.
pub struct LoadBalancingProvider {
    lb: Arc<Lb>,
}

impl LoadBalancingProvider {
    pub fn new(profile_name: impl Into<String>, strategy: Strategy, sub_profiles: Vec<SubProfile>) -> Self {
        Self::with_settings(profile_name, strategy, sub_profiles, 0, 0)
    }

    pub fn with_settings(
        profile_name: impl Into<String>,
        strategy: Strategy,
        sub_profiles: Vec<SubProfile>,
        timeout_ms: u64,
        failover_retry_count: u32,
    ) -> Self {
        let stats = sub_profiles.iter().map(|_| Mutex::new(BackendStats::default())).collect();

        Self {
            lb: Arc::new(Lb {
                profile_name: profile_name.into(),
                strategy,
                sub_profiles,
                stats,
                round_robin_cursor: Mutex::new(0),
                sticky_index: Mutex::new(0),
                timeout_ms,
                failover_retry_count,
            }),
        }
    }

    pub fn stats(&self) -> Vec<BackendStatsSnapshot> {
        self.lb
            .sub_profiles
            .iter()
            .zip(&self.lb.stats)
            .map(|(profile, stats)| {
                let stats = stats.lock().expect("stats mutex poisoned");
                BackendStatsSnapshot {
                    name: profile.name.clone(),
                    total_requests: stats.total_requests,
                    successes: stats.successes,
                    failures: stats.failures,
                    consecutive_failures: stats.consecutive_failures,
                    last_error: stats.last_error.clone(),
                    last_latency_ms: stats.last_latency_ms,
                    mean_latency_ms: stats.mean_latency_ms,
                }
            })
            .collect()
    }
}

impl Lb {
    /// Candidate order for this dispatch.
    fn candidate_order(&self) -> Vec<usize> {
        let len = self.sub_profiles.len();
        if len == 0 {
            return vec![];
        }

        match self.strategy {
            Strategy::RoundRobin => {
                let mut cursor = self.round_robin_cursor.lock().expect("round robin cursor mutex poisoned");
                let start = *cursor;
                *cursor = (*cursor + 1) % len;
                (0..len).map(|offset| (start + offset) % len).collect()
            }
            Strategy::Failover => {
                let sticky = *self.sticky_index.lock().expect("sticky index mutex poisoned");
                (0..len).map(|offset| (sticky + offset) % len).collect()
            }
            Strategy::Weighted => {
                let mut indices: Vec<usize> = (0..len).collect();
                indices.sort_by(|&a, &b| self.sub_profiles[b].weight.cmp(&self.sub_profiles[a].weight));
                indices
            }
            Strategy::HealthAware => {
                let mut indices: Vec<usize> = (0..len).collect();
                indices.sort_by(|&a, &b| {
                    let stats_a = self.stats[a].lock().expect("stats mutex poisoned");
                    let stats_b = self.stats[b].lock().expect("stats mutex poisoned");
                    stats_a
                        .consecutive_failures
                        .cmp(&stats_b.consecutive_failures)
                        .then(stats_a.mean_latency_ms.partial_cmp(&stats_b.mean_latency_ms).unwrap_or(std::cmp::Ordering::Equal))
                });
                indices
            }
        }
    }

    fn mark_success(&self, index: usize, latency: Duration) {
        self.stats[index].lock().expect("stats mutex poisoned").record_success(latency);
        if self.strategy == Strategy::Failover {
            *self.sticky_index.lock().expect("sticky index mutex poisoned") = index;
        }
    }

    fn mark_failure(&self, index: usize, error: &LlmError) {
        self.stats[index].lock().expect("stats mutex poisoned").record_failure(error);
    }
}

#[async_trait]
impl Provider for LoadBalancingProvider {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        crate::cancellation::check(&options.cancel)?;

        let lb = Arc::clone(&self.lb);
        let order = lb.candidate_order();
        if order.is_empty() {
            return Err(LlmError::Internal(format!("load balancer '{}' has no sub-profiles configured", lb.profile_name)));
        }

        let failover_retry_count = options.ephemerals.failover_retry_count.unwrap_or(lb.failover_retry_count);
        let timeout_ms = options.ephemerals.timeout_ms.unwrap_or(lb.timeout_ms);
        let attempts = (failover_retry_count as usize + 1).min(order.len());
        let timeout = Duration::from_millis(timeout_ms);
        let mut last_error = LlmError::Internal("no sub-profile attempted".into());

        for &index in order.iter().take(attempts) {
            crate::cancellation::check(&options.cancel)?;

            let profile = &lb.sub_profiles[index];
            let sub_options = clone_options_for_subprofile(&options);
            let started = Instant::now();

            let opened = profile.provider.generate_chat_completion(sub_options, history).await;
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("load balancer '{}': sub-profile '{}' failed to open: {err}", lb.profile_name, profile.name);
                    lb.mark_failure(index, &err);
                    last_error = err;
                    continue;
                }
            };

            let first = if timeout_ms == 0 {
                stream.next().await
            } else {
                tokio::select! {
                    item = stream.next() => item,
                    _ = tokio::time::sleep(timeout) => {
                        let err = LlmError::StreamTimeout(timeout);
                        log::warn!("load balancer '{}': sub-profile '{}' timed out waiting for first chunk", lb.profile_name, profile.name);
                        lb.mark_failure(index, &err);
                        last_error = err;
                        continue;
                    }
                }
            };

            match first {
                Some(Ok(record)) => {
                    lb.mark_success(index, started.elapsed());
                    let passthrough = futures::stream::once(async { Ok(record) }).chain(stream);
                    return Ok(Box::pin(passthrough));
                }
                Some(Err(err)) => {
                    log::warn!("load balancer '{}': sub-profile '{}' errored on first chunk: {err}", lb.profile_name, profile.name);
                    lb.mark_failure(index, &err);
                    last_error = err;
                    continue;
                }
                None => {
                    lb.mark_success(index, started.elapsed());
                    return Ok(Box::pin(futures::stream::empty()));
                }
            }
        }

        Err(last_error)
    }

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
        let Some(first) = self.lb.sub_profiles.first() else {
            return Ok(vec![]);
        };
        first.provider.get_models().await
    }

    fn get_default_model(&self) -> &str {
        self.lb.sub_profiles.first().map(|p| p.provider.get_default_model()).unwrap_or("")
    }

    async fn invoke_server_tool(&self, name: &str, params: Value, cancel: &CancellationToken) -> Result<Value> {
        let Some(first) = self.lb.sub_profiles.first() else {
            return Err(LlmError::NotFound(format!("server tool '{name}' is not implemented by this provider")));
        };
        first.provider.invoke_server_tool(name, params, cancel).await
    }

    fn name(&self) -> &str {
        &self.lb.profile_name
    }

    fn is_load_balancer(&self) -> bool {
        true
    }
}

fn clone_options_for_subprofile(options: &ChatCompletionOptions) -> ChatCompletionOptions {
    use secrecy::{ExposeSecret, SecretString};

    ChatCompletionOptions {
        model: options.model.clone(),
        contents: options.contents.clone(),
        tools: options.tools.clone(),
        auth: SecretString::from(options.auth.expose_secret().to_string()),
        base_url: options.base_url.clone(),
        custom_headers: options.custom_headers.clone(),
        ephemerals: options.ephemerals.clone(),
        cancel: options.cancel.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Block, NeutralRecord, Speaker};
    use secrecy::SecretString;

    struct StaticProvider {
        name: String,
        fails: bool,
    }

    #[async_trait]
    impl Provider for StaticProvider {
        async fn generate_chat_completion(&self, _options: ChatCompletionOptions, _history: &HistoryService) -> Result<ChatCompletionStream> {
            if self.fails {
                return Err(LlmError::ServerError { status: 503, message: "down".into() });
            }

            let record = NeutralRecord::new(Speaker::Ai, vec![Block::Text { text: self.name.clone() }]);
            Ok(Box::pin(futures::stream::once(async { Ok(record) })))
        }

        async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
            Ok(vec![])
        }

        fn get_default_model(&self) -> &str {
            "static"
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn test_options() -> ChatCompletionOptions {
        ChatCompletionOptions {
            model: "m".into(),
            contents: vec![],
            tools: vec![],
            auth: SecretString::from("secret".to_string()),
            base_url: None,
            custom_headers: reqwest::header::HeaderMap::new(),
            ephemerals: crate::ephemerals::Ephemerals::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn failover_strategy_moves_to_next_backend_on_failure() {
        let primary = SubProfile::new("primary", Arc::new(StaticProvider { name: "primary".into(), fails: true }));
        let secondary = SubProfile::new("secondary", Arc::new(StaticProvider { name: "secondary".into(), fails: false }));
        let lb = LoadBalancingProvider::with_settings("lb", Strategy::Failover, vec![primary, secondary], 0, 1);

        let history = HistoryService::new();
        let mut stream = lb.generate_chat_completion(test_options(), &history).await.unwrap();
        let record = stream.next().await.unwrap().unwrap();
        let Block::Text { text } = &record.blocks[0] else { unreachable!() };
        assert_eq!(text, "secondary");

        let stats = lb.stats();
        assert_eq!(stats[0].failures, 1);
        assert_eq!(stats[1].successes, 1);
    }

    #[tokio::test]
    async fn reports_last_error_when_every_backend_fails() {
        let a = SubProfile::new("a", Arc::new(StaticProvider { name: "a".into(), fails: true }));
        let b = SubProfile::new("b", Arc::new(StaticProvider { name: "b".into(), fails: true }));
        let lb = LoadBalancingProvider::with_settings("lb", Strategy::Failover, vec![a, b], 0, 1);

        let history = HistoryService::new();
        let result = lb.generate_chat_completion(test_options(), &history).await;
        assert!(result.is_err());
    }

    #[test]
    fn is_load_balancer_flag_is_set() {
        let lb = LoadBalancingProvider::new("lb", Strategy::RoundRobin, vec![]);
        assert!(lb.is_load_balancer());
    }

    #[tokio::test]
    async fn default_failover_retry_count_is_zero_so_one_failure_is_terminal() {
        let primary = SubProfile::new("primary", Arc::new(StaticProvider { name: "primary".into(), fails: true }));
        let secondary = SubProfile::new("secondary", Arc::new(StaticProvider { name: "secondary".into(), fails: false }));
        let lb = LoadBalancingProvider::new("lb", Strategy::Failover, vec![primary, secondary]);

        let history = HistoryService::new();
        let result = lb.generate_chat_completion(test_options(), &history).await;
        assert!(result.is_err(), "with the default retry count of 0, only the first candidate should be tried");
    }

    #[tokio::test]
    async fn per_call_ephemeral_failover_retry_count_overrides_the_configured_default() {
        let primary = SubProfile::new("primary", Arc::new(StaticProvider { name: "primary".into(), fails: true }));
        let secondary = SubProfile::new("secondary", Arc::new(StaticProvider { name: "secondary".into(), fails: false }));
        let lb = LoadBalancingProvider::new("lb", Strategy::Failover, vec![primary, secondary]);

        let mut options = test_options();
        options.ephemerals.failover_retry_count = Some(1);

        let history = HistoryService::new();
        let mut stream = lb.generate_chat_completion(options, &history).await.unwrap();
        let record = stream.next().await.unwrap().unwrap();
        let Block::Text { text } = &record.blocks[0] else { unreachable!() };
        assert_eq!(text, "secondary");
    }
}
