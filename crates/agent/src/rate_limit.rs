use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use datapilot_core::config::RateLimitConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allow() -> Self {
        Self { allowed: true, retry_after: None }
    }

    fn deny(retry_after: Duration) -> Self {
        Self { allowed: false, retry_after: Some(retry_after) }
    }

    /// Whole seconds to wait, rounded up so a client never retries early.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map(|wait| wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
            .unwrap_or(0)
    }
}

/// Call timestamps still inside the window, oldest first.
#[derive(Debug, Default)]
struct RateLimitBucket {
    calls: VecDeque<Instant>,
}

impl RateLimitBucket {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while self.calls.front().is_some_and(|oldest| now.duration_since(*oldest) >= window) {
            self.calls.pop_front();
        }
    }
}

/// Sliding-window limiter keyed by caller id.
///
/// The whole check-evict-record sequence runs under one lock so two
/// concurrent calls for the same caller can never both take the last slot.
/// Rejected calls are not recorded.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls: usize::try_from(max_calls).unwrap_or(usize::MAX).max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.max_calls, config.window()))
    }

    pub async fn check(&self, caller_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, bucket| {
            bucket.evict_expired(now, self.window);
            !bucket.calls.is_empty()
        });
        let bucket = buckets.entry(caller_id.to_string()).or_default();

        if bucket.calls.len() >= self.max_calls {
            let retry_after = bucket
                .calls
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            tracing::warn!(
                event_name = "agent.rate_limit.rejected",
                caller_id,
                calls_in_window = bucket.calls.len(),
                limit = self.max_calls,
                "rate limit exceeded"
            );
            return RateDecision::deny(retry_after);
        }

        bucket.calls.push_back(now);
        RateDecision::allow()
    }

    /// Calls currently counted against `caller_id`.
    pub async fn in_window(&self, caller_id: &str) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let Some(bucket) = buckets.get_mut(caller_id) else {
            return 0;
        };
        bucket.evict_expired(now, self.window);
        let count = bucket.calls.len();
        if count == 0 {
            buckets.remove(caller_id);
        }
        count
    }

    /// Callers with at least one call still inside the window.
    pub async fn tracked_callers(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::RateLimiter;

    #[tokio::test(start_paused = true)]
    async fn second_call_inside_window_is_rejected_with_retry_hint() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        let first = limiter.check("thread-a").await;
        tokio::time::advance(Duration::from_secs(15)).await;
        let second = limiter.check("thread-a").await;

        assert!(first.allowed);
        assert!(!second.allowed);
        assert_eq!(second.retry_after, Some(Duration::from_secs(45)));
        assert_eq!(second.retry_after_secs(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_and_callers_are_independent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));

        assert!(limiter.check("a").await.allowed);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("a").await.allowed);
        assert!(!limiter.check("a").await.allowed);
        assert!(limiter.check("b").await.allowed);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.check("a").await.allowed, "first call should have left the window");
        assert_eq!(limiter.in_window("a").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_calls_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("a").await.allowed);
        for _ in 0..5 {
            assert!(!limiter.check("a").await.allowed);
        }

        assert_eq!(limiter.in_window("a").await, 1);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check("a").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_callers_are_forgotten_once_their_window_empties() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));

        for caller in ["t1", "t2", "t3"] {
            assert!(limiter.check(caller).await.allowed);
        }
        assert_eq!(limiter.tracked_callers().await, 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check("t4").await.allowed);
        assert_eq!(limiter.tracked_callers().await, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.in_window("t4").await, 0);
        assert_eq!(limiter.tracked_callers().await, 0);
    }

    #[tokio::test]
    async fn concurrent_checks_never_exceed_the_limit() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));

        let handles = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check("shared").await.allowed })
            })
            .collect::<Vec<_>>();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.expect("join") {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
    }
}
