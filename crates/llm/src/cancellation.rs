//! A single cancellation token threaded from the caller through the load
//! balancer, retry orchestrator, and adapter down to the HTTP client.
//!
//! A long-lived server process can rely on an implicit request-drop signal to
//! cancel in-flight work; a bare library has no such ambient signal, so this
//! is the direct Tokio-ecosystem equivalent callers construct explicitly.

pub use tokio_util::sync::CancellationToken;

use crate::error::LlmError;

/// Returns `Err(LlmError::Cancelled)` if `token` has already fired.
pub fn check(token: &CancellationToken) -> crate::error::Result<()> {
    if token.is_cancelled() { Err(LlmError::Cancelled) } else { Ok(()) }
}

/// Races `future` against cancellation, mapping a fired token to `Cancelled`.
pub async fn race<F, T>(token: &CancellationToken, future: F) -> crate::error::Result<T>
where
    F: std::future::Future<Output = crate::error::Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LlmError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn race_returns_cancelled_once_token_fires() {
        let token = CancellationToken::new();
        token.cancel();

        let result = race(&token, async { Ok::<_, LlmError>(1) }).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }

    #[tokio::test]
    async fn race_returns_future_result_when_not_cancelled() {
        let token = CancellationToken::new();
        let result = race(&token, async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
