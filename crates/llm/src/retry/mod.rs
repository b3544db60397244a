//! RetryOrchestrator: wraps any provider and adds retry, backoff, bucket
//! failover, and first-chunk timeout enforcement. Every non-streaming call
//! is delegated straight through to the wrapped provider.

mod backoff;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use crate::bucket::{Bucket, BucketFailoverController};
use crate::cancellation::CancellationToken;
use crate::error::{LlmError, Result};
use crate::history::HistoryService;
use crate::provider::dump_context::{self, DumpSink};
use crate::provider::{ChatCompletionOptions, ChatCompletionStream, ModelDescriptor, Provider};

const DEFAULT_MAX_ATTEMPTS: u32 = 6;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const FAILOVER_THRESHOLD: u32 = 1;

/// A callback the embedding caller can use to surface "waiting Ns for rate
/// limit" to a user-facing status line.
pub trait ThrottleTracker: Send + Sync {
    fn track_throttle_wait(&self, wait: Duration);
}

#[derive(Serialize)]
struct DumpRecord<'a> {
    attempt: u32,
    model: &'a str,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Zero disables the first-chunk timeout.
    pub streaming_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            streaming_timeout: Duration::ZERO,
        }
    }
}

pub struct RetryOrchestrator {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
    buckets: Option<BucketFailoverController>,
    throttle_tracker: Option<Arc<dyn ThrottleTracker>>,
    dump_sink: Option<Arc<dyn DumpSink>>,
}

impl RetryOrchestrator {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner, config: RetryConfig::default(), buckets: None, throttle_tracker: None, dump_sink: None }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_buckets(mut self, buckets: BucketFailoverController) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn with_throttle_tracker(mut self, tracker: Arc<dyn ThrottleTracker>) -> Self {
        self.throttle_tracker = Some(tracker);
        self
    }

    /// Installs the sink `dumpcontext` hands completed/failed attempts to.
    pub fn with_dump_sink(mut self, sink: Arc<dyn DumpSink>) -> Self {
        self.dump_sink = Some(sink);
        self
    }
}

/// Reconstructs an owned `ChatCompletionOptions` for the next attempt.
/// `SecretString` has no `Clone` impl by design, so the secret is re-wrapped
/// via `expose_secret` rather than cloned directly.
fn clone_options(options: &ChatCompletionOptions) -> ChatCompletionOptions {
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

/// Rebinds an options struct's routing/auth to a newly-selected bucket.
fn apply_bucket(options: &mut ChatCompletionOptions, bucket: &Bucket) {
    if let Some(base_url) = &bucket.base_url {
        options.base_url = Some(base_url.clone());
    }
    if let Some(auth) = &bucket.auth {
        options.auth = SecretString::from(auth.expose_secret().to_string());
    }
    options.model = bucket.model_id.clone();
}

struct Driver {
    options: ChatCompletionOptions,
    attempt: u32,
    delay: Duration,
    consec_429: u32,
    consec_auth: u32,
    max_attempts: u32,
    stream: Option<ChatCompletionStream>,
}

enum ErrorOutcome {
    RetryAttempt,
    Terminal(LlmError),
}

#[async_trait]
impl Provider for RetryOrchestrator {
    async fn generate_chat_completion(
        &self,
        options: ChatCompletionOptions,
        history: &HistoryService,
    ) -> Result<ChatCompletionStream> {
        if self.inner.is_load_balancer() {
            return self.inner.generate_chat_completion(options, history).await;
        }

        crate::cancellation::check(&options.cancel)?;

        let max_attempts = options.ephemerals.retries.unwrap_or(self.config.max_attempts).max(1);
        let initial_delay = options.ephemerals.retrywait.map(Duration::from_millis).unwrap_or(self.config.initial_delay);

        let driver = Driver {
            options,
            attempt: 0,
            delay: initial_delay,
            consec_429: 0,
            consec_auth: 0,
            max_attempts,
            stream: None,
        };

        let inner = Arc::clone(&self.inner);
        let buckets = self.buckets.clone();
        let throttle_tracker = self.throttle_tracker.clone();
        let dump_sink = self.dump_sink.clone();
        let config = self.config.clone();
        let history = history.clone();

        let stream = futures::stream::unfold(Some(driver), move |driver| {
            let inner = Arc::clone(&inner);
            let buckets = buckets.clone();
            let throttle_tracker = throttle_tracker.clone();
            let dump_sink = dump_sink.clone();
            let config = config.clone();
            let history = history.clone();

            async move {
                let mut driver = driver?;

                loop {
                    if let Some(mut inner_stream) = driver.stream.take() {
                        match inner_stream.next().await {
                            Some(Ok(record)) => {
                                driver.stream = Some(inner_stream);
                                return Some((Ok(record), Some(driver)));
                            }
                            Some(Err(err)) => {
                                match handle_error(err, &mut driver, &buckets, &throttle_tracker, &dump_sink, &config).await {
                                    ErrorOutcome::RetryAttempt => continue,
                                    ErrorOutcome::Terminal(err) => return Some((Err(err), None)),
                                }
                            }
                            None => return None,
                        }
                    }

                    if let Err(err) = crate::cancellation::check(&driver.options.cancel) {
                        return Some((Err(err), None));
                    }

                    driver.attempt += 1;
                    if driver.attempt > driver.max_attempts {
                        return Some((Err(LlmError::RetryExhausted { last: Box::new(LlmError::Internal("no attempts remained".into())) }), None));
                    }

                    let attempt_options = clone_options(&driver.options);
                    let opened = inner.generate_chat_completion(attempt_options, &history).await;

                    let mut new_stream = match opened {
                        Ok(stream) => stream,
                        Err(err) => {
                            match handle_error(err, &mut driver, &buckets, &throttle_tracker, &dump_sink, &config).await {
                                ErrorOutcome::RetryAttempt => continue,
                                ErrorOutcome::Terminal(err) => return Some((Err(err), None)),
                            }
                        }
                    };

                    let first = if config.streaming_timeout.is_zero() {
                        new_stream.next().await
                    } else {
                        tokio::select! {
                            item = new_stream.next() => item,
                            _ = tokio::time::sleep(config.streaming_timeout) => {
                                match handle_error(LlmError::StreamTimeout(config.streaming_timeout), &mut driver, &buckets, &throttle_tracker, &dump_sink, &config).await {
                                    ErrorOutcome::RetryAttempt => continue,
                                    ErrorOutcome::Terminal(err) => return Some((Err(err), None)),
                                }
                            }
                        }
                    };

                    match first {
                        Some(Ok(record)) => {
                            if let Some(sink) = &dump_sink {
                                if dump_context::should_dump(driver.options.ephemerals.dump_mode(), false) {
                                    let dump_record = DumpRecord { attempt: driver.attempt, model: &driver.options.model, error: None };
                                    dump_context::dump(sink.as_ref(), "chat_completion", &dump_record);
                                }
                            }
                            driver.consec_429 = 0;
                            driver.consec_auth = 0;
                            driver.delay = initial_delay;
                            driver.stream = Some(new_stream);
                            return Some((Ok(record), Some(driver)));
                        }
                        Some(Err(err)) => {
                            match handle_error(err, &mut driver, &buckets, &throttle_tracker, &dump_sink, &config).await {
                                ErrorOutcome::RetryAttempt => continue,
                                ErrorOutcome::Terminal(err) => return Some((Err(err), None)),
                            }
                        }
                        None => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.inner.get_models().await
    }

    fn get_default_model(&self) -> &str {
        self.inner.get_default_model()
    }

    fn get_server_tools(&self) -> &[String] {
        self.inner.get_server_tools()
    }

    async fn invoke_server_tool(&self, name: &str, params: Value, cancel: &CancellationToken) -> Result<Value> {
        self.inner.invoke_server_tool(name, params, cancel).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

async fn handle_error(
    err: LlmError,
    driver: &mut Driver,
    buckets: &Option<BucketFailoverController>,
    throttle_tracker: &Option<Arc<dyn ThrottleTracker>>,
    dump_sink: &Option<Arc<dyn DumpSink>>,
    config: &RetryConfig,
) -> ErrorOutcome {
    if let Some(sink) = dump_sink {
        if dump_context::should_dump(driver.options.ephemerals.dump_mode(), true) {
            let dump_record = DumpRecord { attempt: driver.attempt, model: &driver.options.model, error: Some(err.to_string()) };
            dump_context::dump(sink.as_ref(), "chat_completion", &dump_record);
        }
    }

    if err.is_cancelled() {
        return ErrorOutcome::Terminal(err);
    }

    let is_429 = matches!(err, LlmError::RateLimited { .. });
    let is_402 = matches!(err, LlmError::PaymentRequired(_));
    let is_auth = matches!(err, LlmError::Unauthorized(_));

    driver.consec_429 = if is_429 { driver.consec_429 + 1 } else { 0 };
    driver.consec_auth = if is_auth { driver.consec_auth + 1 } else { 0 };

    let should_attempt_refresh_retry = is_auth && buckets.is_some() && driver.consec_auth == 1;
    let should_attempt_failover = buckets.is_some()
        && ((is_429 && driver.consec_429 > FAILOVER_THRESHOLD) || is_402 || (is_auth && driver.consec_auth > 1));

    if should_attempt_failover {
        let controller = buckets.as_ref().expect("checked above");
        if controller.try_failover() {
            driver.consec_429 = 0;
            driver.consec_auth = 0;
            driver.delay = config.initial_delay;
            driver.attempt = driver.attempt.saturating_sub(1);
            if let Some(bucket) = controller.get_current() {
                apply_bucket(&mut driver.options, &bucket);
            }
            return ErrorOutcome::RetryAttempt;
        }

        let failed_buckets = controller.get_buckets().into_iter().map(|b| b.id).collect();
        return ErrorOutcome::Terminal(LlmError::AllBucketsExhausted { buckets: failed_buckets, last: Box::new(err) });
    }

    let should_retry = err.should_retry();
    if !should_retry && !should_attempt_refresh_retry {
        return ErrorOutcome::Terminal(err);
    }

    if driver.attempt >= driver.max_attempts {
        if should_attempt_refresh_retry {
            driver.attempt = driver.attempt.saturating_sub(1);
        } else {
            return ErrorOutcome::Terminal(LlmError::RetryExhausted { last: Box::new(err) });
        }
    }

    let wait = if let Some(retry_after) = err.retry_after() {
        driver.delay = config.initial_delay;
        retry_after
    } else {
        let current = driver.delay;
        driver.delay = backoff::double(driver.delay, config.max_delay);
        backoff::jittered(current)
    };

    if let Some(tracker) = throttle_tracker {
        tracker.track_throttle_wait(wait);
    }

    let slept = crate::cancellation::race(&driver.options.cancel, async {
        tokio::time::sleep(wait).await;
        Ok::<(), LlmError>(())
    })
    .await;

    if slept.is_err() {
        return ErrorOutcome::Terminal(LlmError::Cancelled);
    }

    ErrorOutcome::RetryAttempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::NeutralRecord;
    use crate::history::Speaker;

    struct FlakyProvider {
        failures_before_success: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn generate_chat_completion(&self, _options: ChatCompletionOptions, _history: &HistoryService) -> Result<ChatCompletionStream> {
            let remaining = self.failures_before_success.load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(LlmError::ServerError { status: 503, message: "overloaded".into() });
            }

            let record = NeutralRecord::new(Speaker::Ai, vec![crate::history::Block::Text { text: "ok".into() }]);
            Ok(Box::pin(futures::stream::once(async { Ok(record) })))
        }

        async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
            Ok(vec![])
        }

        fn get_default_model(&self) -> &str {
            "flaky"
        }

        fn name(&self) -> &str {
            "flaky"
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
            ephemerals: crate::ephemerals::Ephemerals { retrywait: Some(1), ..Default::default() },
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let inner = Arc::new(FlakyProvider { failures_before_success: std::sync::atomic::AtomicU32::new(2) });
        let orchestrator = RetryOrchestrator::new(inner);
        let history = HistoryService::new();

        let mut stream = orchestrator.generate_chat_completion(test_options(), &history).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let crate::history::Block::Text { text } = &first.blocks[0] else { unreachable!() };
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let inner = Arc::new(FlakyProvider { failures_before_success: std::sync::atomic::AtomicU32::new(100) });
        let orchestrator = RetryOrchestrator::new(inner).with_config(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            streaming_timeout: Duration::ZERO,
        });
        let history = HistoryService::new();

        let mut stream = orchestrator.generate_chat_completion(test_options(), &history).await.unwrap();
        let result = stream.next().await.unwrap();
        assert!(matches!(result, Err(LlmError::RetryExhausted { .. })));
    }

    #[tokio::test]
    async fn load_balancer_inner_is_passed_through_untouched() {
        struct FakeLb;

        #[async_trait]
        impl Provider for FakeLb {
            async fn generate_chat_completion(&self, _options: ChatCompletionOptions, _history: &HistoryService) -> Result<ChatCompletionStream> {
                Err(LlmError::Internal("lb reached".into()))
            }

            async fn get_models(&self) -> Result<Vec<ModelDescriptor>> {
                Ok(vec![])
            }

            fn get_default_model(&self) -> &str {
                "lb"
            }

            fn name(&self) -> &str {
                "lb"
            }

            fn is_load_balancer(&self) -> bool {
                true
            }
        }

        let orchestrator = RetryOrchestrator::new(Arc::new(FakeLb));
        let history = HistoryService::new();
        let result = orchestrator.generate_chat_completion(test_options(), &history).await;
        assert!(matches!(result, Err(LlmError::Internal(_))));
    }

    #[derive(Default)]
    struct RecordingSink {
        labels: std::sync::Mutex<Vec<(String, bool)>>,
    }

    impl DumpSink for RecordingSink {
        fn dump(&self, label: &str, payload: Value) {
            let is_error = payload.get("error").map(|e| !e.is_null()).unwrap_or(false);
            self.labels.lock().unwrap().push((label.to_string(), is_error));
        }
    }

    #[tokio::test]
    async fn dump_sink_receives_both_failed_and_successful_attempts() {
        let inner = Arc::new(FlakyProvider { failures_before_success: std::sync::atomic::AtomicU32::new(1) });
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = RetryOrchestrator::new(inner).with_dump_sink(sink.clone());
        let history = HistoryService::new();

        let mut options = test_options();
        options.ephemerals.dumpcontext = Some(crate::ephemerals::DumpContextMode::On);

        let mut stream = orchestrator.generate_chat_completion(options, &history).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let crate::history::Block::Text { text } = &first.blocks[0] else { unreachable!() };
        assert_eq!(text, "ok");

        let dumped = sink.labels.lock().unwrap();
        assert_eq!(dumped.len(), 2);
        assert!(dumped[0].1, "first attempt failed and should dump with an error payload");
        assert!(!dumped[1].1, "second attempt succeeded and should dump without an error payload");
    }
}
