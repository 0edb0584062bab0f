use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential backoff with uniform jitter.
///
/// The wait after failed attempt `n` (0-indexed) is
/// `base_delay * 2^n + uniform(jitter_min, jitter_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1_500),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Exponential part of the delay, without jitter.
    pub fn base_backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let seconds = rand::thread_rng()
            .gen_range(self.jitter_min.as_secs_f64()..self.jitter_max.as_secs_f64());
        Duration::from_secs_f64(seconds)
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        self.base_backoff(attempt) + self.jitter()
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: usize,
}

/// Runs `operation` until it succeeds or the policy's attempts are used up.
/// The closure receives the 0-based attempt number. The task sleeps between
/// attempts; no sleep follows the last one.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0usize;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            Err(error) if attempt + 1 >= attempts => {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt + 1,
                }
            }
            Err(error) => {
                let delay = policy.backoff(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "model call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_backoff_doubles_and_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);

        for attempt in 0..5 {
            let base = Duration::from_secs(1u64 << attempt);
            assert_eq!(policy.base_backoff(attempt), base);

            let delay = policy.backoff(attempt);
            assert!(delay >= base + Duration::from_millis(500));
            assert!(delay < base + Duration::from_millis(1_500));
        }
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(4), Duration::ZERO);
    }

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let calls = AtomicUsize::new(0);
        let outcome = run_with_retry(&RetryPolicy::immediate(5), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.ok(), Some(2));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let outcome: RetryOutcome<(), &str> = run_with_retry(&RetryPolicy::immediate(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_between_attempts_only() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        };
        let started = tokio::time::Instant::now();
        let outcome: RetryOutcome<(), &str> =
            run_with_retry(&policy, |_| async { Err("down") }).await;

        assert_eq!(outcome.attempts, 3);
        // 1s after attempt 0, 2s after attempt 1, nothing after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }
}
