use std::num::NonZeroU32;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use tokio::sync::{Semaphore, SemaphorePermit};

use super::error::FetchError;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Wraps every outbound request: a bounded number in flight, and a global
/// requests-per-minute budget shared by all sources.
pub struct RequestGate {
    in_flight: Semaphore,
    limiter: Limiter,
}

impl RequestGate {
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            in_flight: Semaphore::new(max_concurrent.max(1)),
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
        }
    }

    /// Waits for a concurrency slot, then for a rate-limit token.
    /// The request must be made while the returned permit is alive.
    pub async fn enter(&self) -> Result<SemaphorePermit<'_>, FetchError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Connection("request gate closed".into()))?;
        self.limiter.until_ready().await;
        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn in_flight_requests_are_bounded() {
        let gate = RequestGate::new(1, 60_000);

        let first = gate.enter().await.unwrap();
        assert!(timeout(Duration::from_secs(1), gate.enter()).await.is_err());

        drop(first);
        assert!(timeout(Duration::from_secs(1), gate.enter()).await.is_ok());
    }

    #[tokio::test]
    async fn rate_budget_delays_the_next_request() {
        // one token per minute, burst of one
        let gate = RequestGate::new(4, 1);

        let first = timeout(Duration::from_millis(200), gate.enter()).await;
        assert!(first.is_ok());

        let second = timeout(Duration::from_millis(200), gate.enter()).await;
        assert!(second.is_err());
    }
}
