use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Error taxonomy shared by every provider adapter, the retry orchestrator, the
/// bucket failover controller and the load balancer.
///
/// Adapters wrap vendor-specific failures into this taxonomy at the wire boundary
/// (`ProviderError` is the escape hatch for anything that doesn't fit); every other
/// component downstream only ever sees these variants.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Caller cancellation. Never retried.
    #[error("request cancelled")]
    Cancelled,

    /// Malformed request, status 400. Not retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Requested model or provider does not exist, status 404. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Status 429, or a vendor-specific overload signal. Retried with backoff; may
    /// trigger bucket failover after consecutive occurrences.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Status 402. Triggers bucket failover immediately.
    #[error("payment required: {0}")]
    PaymentRequired(String),

    /// Status 401 or 403. One retry is permitted for token refresh, then failover.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Status in [500, 600). Retried.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Transport-level failure (reset, timeout, DNS). Retried except for an
    /// unresolvable DNS name, which is treated as terminal.
    #[error("network error: {0}")]
    NetworkTransient(String),

    /// No DNS record for the configured host. Not retried.
    #[error("host not found: {0}")]
    UnresolvableHost(String),

    /// No stream chunk arrived within the configured first-chunk timeout.
    /// Retried by the orchestrator; triggers failover to the next candidate in
    /// the load balancer.
    #[error("stream timed out waiting for first chunk after {0:?}")]
    StreamTimeout(Duration),

    /// Every bucket was exhausted without a successful attempt. Terminal.
    #[error("all {} buckets exhausted, last error: {last}", buckets.len())]
    AllBucketsExhausted { buckets: Vec<String>, last: Box<LlmError> },

    /// `maxAttempts` was reached without a successful attempt or failover. Terminal.
    #[error("retries exhausted, last error: {last}")]
    RetryExhausted { last: Box<LlmError> },

    /// Catch-all for a vendor-specific failure that doesn't map to the taxonomy
    /// above. Classified as non-retryable unless a network-level signal upgrades it.
    #[error("provider error: {message}")]
    ProviderError {
        message: String,
        #[source]
        original: Option<anyhow::Error>,
    },

    /// Streaming was requested from a provider that cannot stream.
    #[error("streaming is not supported by this provider")]
    StreamingNotSupported,

    /// Internal invariant violation; should not normally surface to a caller.
    #[error("internal error: {0}")]
    Internal(String),
}

/// How the retry orchestrator should treat a given error on a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry with backoff, no bucket implications.
    Retry,
    /// Never retry; propagate to the caller immediately.
    Terminal,
    /// Counts toward the 429 failover threshold.
    RateLimited,
    /// Counts toward the auth failover threshold; also eligible for a one-shot
    /// refresh retry before failover kicks in.
    Unauthorized,
    /// Immediately eligible for bucket failover.
    PaymentRequired,
}

impl LlmError {
    /// Classification used by the retry orchestrator and the bucket failover
    /// controller. Kept as a single source of truth so the two components never
    /// disagree about what counts as retryable.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            LlmError::Cancelled
            | LlmError::BadRequest(_)
            | LlmError::NotFound(_)
            | LlmError::UnresolvableHost(_)
            | LlmError::AllBucketsExhausted { .. }
            | LlmError::RetryExhausted { .. }
            | LlmError::StreamingNotSupported
            | LlmError::ProviderError { .. }
            | LlmError::Internal(_) => RetryClass::Terminal,
            LlmError::RateLimited { .. } => RetryClass::RateLimited,
            LlmError::PaymentRequired(_) => RetryClass::PaymentRequired,
            LlmError::Unauthorized(_) => RetryClass::Unauthorized,
            LlmError::ServerError { .. } | LlmError::NetworkTransient(_) | LlmError::StreamTimeout(_) => {
                RetryClass::Retry
            }
        }
    }

    /// Whether the orchestrator should sleep and re-attempt at all (ignoring
    /// bucket failover, which is evaluated separately).
    pub fn should_retry(&self) -> bool {
        !matches!(self.retry_class(), RetryClass::Terminal)
    }

    /// Vendor-reported `Retry-After`, if any. Only `RateLimited` carries one today,
    /// but the accessor exists so future variants can report one too.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }

    /// Maps an HTTP status code plus a vendor message into the taxonomy. Shared
    /// by every adapter so status-code handling doesn't drift between vendors.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            400 => LlmError::BadRequest(message),
            401 | 403 => LlmError::Unauthorized(message),
            402 => LlmError::PaymentRequired(message),
            404 => LlmError::NotFound(message),
            429 => LlmError::RateLimited { message, retry_after },
            500..=599 => LlmError::ServerError { status, message },
            _ => LlmError::ProviderError {
                message,
                original: None,
            },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return LlmError::NetworkTransient(format!("request timed out: {err}"));
        }

        if err.is_connect() {
            let message = err.to_string();

            if message.contains("dns error") || message.contains("failed to lookup address") {
                return LlmError::UnresolvableHost(message);
            }

            return LlmError::NetworkTransient(message);
        }

        LlmError::NetworkTransient(err.to_string())
    }
}
