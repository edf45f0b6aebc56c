//! Fixed-window admission control keyed by client identity.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vetline_core::{Error, Result};

use crate::backend::{MemoryBackend, RateLimitBackend};
use crate::policy::{Policies, PolicyName};

/// Successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Requests left in the current window
    pub remaining: u32,
    pub reset_in: Duration,
}

pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    policies: Policies,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>, policies: Policies) -> Self {
        Self { backend, policies }
    }

    /// Limiter over process-local counters
    pub fn in_memory(policies: Policies) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), policies)
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Count a request from `key` against `policy`.
    ///
    /// A backend failure admits the request; limits are abuse control,
    /// not a correctness guard.
    pub async fn check(&self, policy: PolicyName, key: &str) -> Result<Admission> {
        let policy = self.policies.get(policy);
        let counter_key = format!("{}:{}", policy.name, key);

        let state = match self.backend.hit(&counter_key, policy.window).await {
            Ok(state) => state,
            Err(e) => {
                warn!(policy = %policy.name, error = %e, "Rate limit backend unavailable, admitting");
                return Ok(Admission {
                    remaining: policy.max_requests,
                    reset_in: policy.window,
                });
            }
        };

        if state.count > policy.max_requests {
            debug!(policy = %policy.name, key, count = state.count, "Rate limit exceeded");
            return Err(Error::TooManyRequests {
                message: policy.message.clone(),
                retry_after_secs: retry_after_secs(state.reset_in),
            });
        }

        Ok(Admission {
            remaining: policy.max_requests - state.count,
            reset_in: state.reset_in,
        })
    }

    /// Drop expired windows now.
    pub async fn sweep(&self) -> usize {
        self.backend.sweep().await
    }

    /// Periodically sweep expired windows until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep().await;
                if removed > 0 {
                    debug!(removed, "Swept expired rate-limit windows");
                }
            }
        })
    }
}

/// Whole seconds to wait, rounded up, never zero
fn retry_after_secs(reset_in: Duration) -> u64 {
    let secs = reset_in.as_secs() + u64::from(reset_in.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, WindowState};
    use async_trait::async_trait;

    #[tokio::test(start_paused = true)]
    async fn test_fourth_distress_call_rejected_then_admitted_after_window() {
        let limiter = RateLimiter::in_memory(Policies::default());

        for expected_remaining in [2, 1, 0] {
            let admission = limiter
                .check(PolicyName::DistressCall, "10.0.0.1")
                .await
                .unwrap();
            assert_eq!(admission.remaining, expected_remaining);
        }

        let err = limiter
            .check(PolicyName::DistressCall, "10.0.0.1")
            .await
            .unwrap_err();
        match err {
            Error::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                assert_eq!(
                    message,
                    "Too many distress calls. Please wait before creating another."
                );
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter
            .check(PolicyName::DistressCall, "10.0.0.1")
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policies_and_clients_counted_separately() {
        let limiter = RateLimiter::in_memory(Policies::default());
        for _ in 0..3 {
            limiter.check(PolicyName::DistressCall, "a").await.unwrap();
        }
        assert!(limiter.check(PolicyName::DistressCall, "a").await.is_err());
        assert!(limiter.check(PolicyName::DistressCall, "b").await.is_ok());
        assert!(limiter.check(PolicyName::General, "a").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_windows() {
        let backend = Arc::new(MemoryBackend::new());
        let limiter = Arc::new(RateLimiter::new(backend.clone(), Policies::default()));
        limiter.check(PolicyName::AiAssist, "a").await.unwrap();

        let sweeper = limiter.spawn_sweeper(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(backend.tracked_keys(), 0);
        sweeper.abort();
    }

    struct BrokenBackend;

    #[async_trait]
    impl RateLimitBackend for BrokenBackend {
        async fn hit(&self, _key: &str, _window: Duration) -> std::result::Result<WindowState, BackendError> {
            Err(BackendError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn sweep(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_backend_failure_admits() {
        let limiter = RateLimiter::new(Arc::new(BrokenBackend), Policies::default());
        let admission = limiter.check(PolicyName::DistressCall, "a").await.unwrap();
        assert_eq!(admission.remaining, 3);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(59_001)), 60);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
