//! Bucket failover: an ordered list of credential/endpoint buckets the retry
//! orchestrator advances through on a terminal-enough error class. Serialized
//! behind a single mutex, matching the "per provider-manager, serialized
//! access" concurrency rule the rest of this crate follows.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// An opaque credential handle plus routing metadata: a provider id, a
/// model id, and optionally an overriding base URL / auth token. `SecretString`
/// has no `Clone` impl (by design, to discourage casual secret copies), so
/// `Bucket` clones it explicitly via `expose_secret`.
pub struct Bucket {
    pub id: String,
    pub provider_id: String,
    pub model_id: String,
    pub base_url: Option<String>,
    pub auth: Option<SecretString>,
    exhausted: bool,
    last_failure_at: Option<Instant>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl Clone for Bucket {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            provider_id: self.provider_id.clone(),
            model_id: self.model_id.clone(),
            base_url: self.base_url.clone(),
            auth: self.auth.as_ref().map(|s| SecretString::from(s.expose_secret().to_string())),
            exhausted: self.exhausted,
            last_failure_at: self.last_failure_at,
        }
    }
}

impl Bucket {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            base_url: None,
            auth: None,
            exhausted: false,
            last_failure_at: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_auth(mut self, auth: SecretString) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

struct State {
    buckets: Vec<Bucket>,
    current: usize,
    cooldown: Duration,
}

/// Advances through an ordered bucket list on failure via a single-step
/// `tryFailover` call — the orchestrator drives the loop, this just tracks
/// which bucket is live and which are in cooldown.
#[derive(Clone)]
pub struct BucketFailoverController {
    state: Arc<Mutex<State>>,
}

impl BucketFailoverController {
    pub fn new(buckets: Vec<Bucket>) -> Self {
        Self::with_cooldown(buckets, DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(buckets: Vec<Bucket>, cooldown: Duration) -> Self {
        Self { state: Arc::new(Mutex::new(State { buckets, current: 0, cooldown })) }
    }

    pub fn get_buckets(&self) -> Vec<Bucket> {
        self.state.lock().expect("bucket state mutex poisoned").buckets.clone()
    }

    pub fn get_current(&self) -> Option<Bucket> {
        let state = self.state.lock().expect("bucket state mutex poisoned");
        state.buckets.get(state.current).cloned()
    }

    /// Marks the current bucket exhausted and advances to the next
    /// non-exhausted bucket. Returns `true` if one was found.
    pub fn try_failover(&self) -> bool {
        let mut state = self.state.lock().expect("bucket state mutex poisoned");
        let len = state.buckets.len();
        if len == 0 {
            return false;
        }

        if let Some(failed) = state.buckets.get_mut(state.current) {
            failed.exhausted = true;
            failed.last_failure_at = Some(Instant::now());
        }

        for offset in 1..=len {
            let candidate = (state.current + offset) % len;
            if !state.buckets[candidate].exhausted {
                state.current = candidate;
                log::warn!("bucket failover: advancing to bucket '{}'", state.buckets[candidate].id);
                return true;
            }
        }

        false
    }

    /// Re-enables any bucket whose last failure is older than the cooldown window.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("bucket state mutex poisoned");
        let cooldown = state.cooldown;
        let now = Instant::now();

        for bucket in &mut state.buckets {
            if bucket.exhausted {
                let cooled_down = bucket.last_failure_at.map(|at| now.duration_since(at) >= cooldown).unwrap_or(true);
                if cooled_down {
                    bucket.exhausted = false;
                    bucket.last_failure_at = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(ids: &[&str]) -> Vec<Bucket> {
        ids.iter().map(|id| Bucket::new(*id, "openai", "gpt-4.1")).collect()
    }

    #[test]
    fn try_failover_advances_to_next_bucket_and_marks_current_exhausted() {
        let controller = BucketFailoverController::new(buckets(&["a", "b", "c"]));
        assert_eq!(controller.get_current().unwrap().id, "a");

        assert!(controller.try_failover());
        assert_eq!(controller.get_current().unwrap().id, "b");
        assert!(controller.get_buckets()[0].is_exhausted());
    }

    #[test]
    fn try_failover_returns_false_once_every_bucket_is_exhausted() {
        let controller = BucketFailoverController::new(buckets(&["a", "b"]));
        assert!(controller.try_failover());
        assert!(!controller.try_failover());
    }

    #[test]
    fn reset_re_enables_buckets_past_the_cooldown_window() {
        let controller = BucketFailoverController::with_cooldown(buckets(&["a", "b"]), Duration::from_millis(0));
        controller.try_failover();
        assert!(controller.get_buckets()[0].is_exhausted());

        controller.reset();
        assert!(!controller.get_buckets()[0].is_exhausted());
    }

    #[test]
    fn single_bucket_cannot_fail_over() {
        let controller = BucketFailoverController::new(buckets(&["only"]));
        assert!(!controller.try_failover());
    }
}
