//! Bounded retry with exponential backoff and jitter

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter_range: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(2);

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_base_delay,
            jitter_range: Self::DEFAULT_JITTER,
        }
    }

    /// `base_delay * 2^attempt + uniform(0, jitter_range)` for a zero-based
    /// attempt index.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = self.jitter_range.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=jitter_ms))
        };
        exponential.saturating_add(jitter)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached; the last error is returned.
    ///
    /// `operation` receives the state it works on and the zero-based attempt
    /// index, so stateful callers (a fetcher owning its session) can retry
    /// without giving up ownership.
    pub async fn run<S, T, F>(&self, state: &mut S, mut operation: F) -> Result<T, ScrapeError>
    where
        S: ?Sized + Send,
        F: for<'a> FnMut(&'a mut S, u32) -> BoxFuture<'a, Result<T, ScrapeError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match operation(state, attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt + 1 >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(attempt, &mut rand::thread_rng());
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::time::Instant;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            jitter_range: Duration::ZERO,
        }
    }

    fn navigation_error() -> ScrapeError {
        ScrapeError::navigation("https://shop.test/p", Some(502), "bad gateway")
    }

    #[test]
    fn delay_doubles_and_jitter_is_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = policy(3);
        assert_eq!(p.delay_for(0, &mut rng), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, &mut rng), Duration::from_millis(400));

        let jittered = RetryPolicy {
            jitter_range: Duration::from_secs(2),
            ..p
        };
        for attempt in 0..4 {
            let delay = jittered.delay_for(attempt, &mut rng);
            let floor = Duration::from_millis(100 * (1 << attempt));
            assert!(delay >= floor && delay <= floor + Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_backoff() {
        let started = Instant::now();
        let mut calls = 0u32;
        let result = policy(3)
            .run(&mut calls, |calls, attempt| {
                Box::pin(async move {
                    *calls += 1;
                    if attempt < 2 {
                        Err(navigation_error())
                    } else {
                        Ok(attempt)
                    }
                })
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_attempts_run_out() {
        let mut calls = 0u32;
        let result: Result<(), _> = policy(3)
            .run(&mut calls, |calls, _| {
                Box::pin(async move {
                    *calls += 1;
                    Err(ScrapeError::Timeout {
                        url: "https://shop.test/p".into(),
                        timeout_ms: 10,
                    })
                })
            })
            .await;

        assert_eq!(calls, 3);
        assert!(matches!(result, Err(ScrapeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let mut calls = 0u32;
        let result: Result<(), _> = policy(5)
            .run(&mut calls, |calls, _| {
                Box::pin(async move {
                    *calls += 1;
                    Err(ScrapeError::Parsing {
                        url: "https://shop.test/p".into(),
                        reason: "empty".into(),
                    })
                })
            })
            .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(ScrapeError::Parsing { .. })));
    }
}
