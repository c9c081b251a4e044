//! Per-host request pacing.
//!
//! A keyed `governor` limiter with a burst of one cell per interval, so two
//! requests to the same host are never closer than the configured interval.
//! The limiter reads the tokio clock, which lets paused-time tests drive it.

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::keyed::HashMapStateStore;
use governor::{Quota, RateLimiter};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Governor clock backed by `tokio::time::Instant`, measured from construction.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        Nanos::from(Instant::now().saturating_duration_since(self.origin))
    }
}

type HostLimiter = RateLimiter<String, HashMapStateStore<String>, TokioClock, NoOpMiddleware<Nanos>>;

pub struct HostPacer {
    clock: TokioClock,
    limiter: Option<HostLimiter>,
}

impl fmt::Debug for HostPacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPacer")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl HostPacer {
    /// A zero interval disables pacing.
    pub fn new(interval: Duration) -> Self {
        let clock = TokioClock::new();
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::hashmap_with_clock(quota, clock.clone()));
        Self { clock, limiter }
    }

    /// Wait until `host` may be contacted again.
    ///
    /// Concurrent waiters on the same host all race for the next cell; losers
    /// sleep until the following one.
    pub async fn wait(&self, host: &str) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let key = host.to_string();
        while let Err(not_until) = limiter.check_key(&key) {
            let delay = not_until.wait_time_from(self.clock.now());
            trace!(host, delay_ms = delay.as_millis() as u64, "pacing request");
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let pacer = HostPacer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        pacer.wait("m.example.com").await;
        assert_eq!(Instant::now(), t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let pacer = HostPacer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        pacer.wait("m.example.com").await;
        pacer.wait("m.example.com").await;
        pacer.wait("m.example.com").await;
        assert!(Instant::now() - t0 >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let pacer = HostPacer::new(Duration::from_secs(5));
        let t0 = Instant::now();
        pacer.wait("a.example.com").await;
        pacer.wait("b.example.com").await;
        assert_eq!(Instant::now(), t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_spaced() {
        let pacer = HostPacer::new(Duration::from_millis(500));
        let waits = (0..4).map(|_| async {
            pacer.wait("m.example.com").await;
            Instant::now()
        });
        let mut times = join_all(waits).await;
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let pacer = HostPacer::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..10 {
            pacer.wait("m.example.com").await;
        }
        assert_eq!(Instant::now(), t0);
    }
}
