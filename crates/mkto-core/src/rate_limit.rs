//! Minimum spacing between outbound requests.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide pacer protecting the per-account rate budget.
///
/// `acquire` suspends the calling task until the configured minimum interval
/// has elapsed since the previous permit. Waiters are served in arrival
/// order; nothing beyond the issuance times is serialized, so concurrent
/// callers only have their send instants spaced, not their whole requests.
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Arc<DirectRateLimiter>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        // A zero interval still needs a valid quota period.
        let period = min_interval.max(Duration::from_millis(1));
        let quota = Quota::with_period(period)
            .expect("pacer period is always greater than zero")
            .allow_burst(NonZeroU32::new(1).expect("burst of one is non-zero"));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Waits until a request may be issued.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Non-blocking probe; used by tests and diagnostics.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn first_permit_is_immediate_second_is_not() {
        let pacer = RequestPacer::new(Duration::from_secs(60));
        assert!(pacer.try_acquire());
        assert!(!pacer.try_acquire());
    }

    #[tokio::test]
    async fn consecutive_acquires_are_spaced_by_the_interval() {
        let interval = Duration::from_millis(30);
        let pacer = RequestPacer::new(interval);
        let started = Instant::now();

        pacer.acquire().await;
        pacer.acquire().await;
        pacer.acquire().await;

        // Two waits of at least one interval each.
        assert!(started.elapsed() >= interval * 2);
    }
}
