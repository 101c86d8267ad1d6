use std::{
    fmt,
    future::Future,
    time::Duration,
};
use thiserror::Error;
use tokio::time::sleep;

/// How a failed external call should be treated by [`retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited { retry_after: Option<Duration> },
    Transient,
    Fatal,
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, never shorter than a server hint, capped at `max_delay`.
    pub fn rate_limit_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        hint.map_or(exponential, |hint| hint.max(exponential))
            .min(self.max_delay)
    }

    pub fn transient_delay(&self, attempt: u32) -> Duration {
        (self.base_delay / 2)
            .saturating_mul(attempt.saturating_add(1))
            .min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure: {0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(err) => err,
        }
    }
}

/// Runs `op` until it succeeds, fails fatally or runs out of attempts.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let delay = match err.class() {
            ErrorClass::Fatal => {
                tracing::warn!(label, %err, "non-retryable failure");
                return Err(RetryError::Fatal(err));
            }
            ErrorClass::RateLimited { retry_after } => {
                policy.rate_limit_delay(attempt, retry_after)
            }
            ErrorClass::Transient => policy.transient_delay(attempt),
        };
        attempt += 1;
        if attempt >= max_attempts {
            tracing::warn!(label, attempts = attempt, %err, "retries exhausted");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }
        tracing::debug!(
            label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            %err,
            "retrying after failure"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::sync::{
        Arc,
        Mutex,
    };
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    enum FakeError {
        #[error("rate limited")]
        RateLimited,
        #[error("flaky")]
        Flaky,
        #[error("broken")]
        Broken,
    }

    impl Classify for FakeError {
        fn class(&self) -> ErrorClass {
            match self {
                FakeError::RateLimited => ErrorClass::RateLimited { retry_after: None },
                FakeError::Flaky => ErrorClass::Transient,
                FakeError::Broken => ErrorClass::Fatal,
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn rate_limit_delay__doubles_per_attempt_and_caps() {
        let policy = policy();
        assert_eq!(policy.rate_limit_delay(0, None), Duration::from_secs(1));
        assert_eq!(policy.rate_limit_delay(2, None), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_delay(10, None), Duration::from_secs(60));
        assert_eq!(
            policy.rate_limit_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn transient_delay__grows_linearly_below_rate_limit_delay() {
        let policy = policy();
        assert_eq!(policy.transient_delay(0), Duration::from_millis(500));
        assert_eq!(policy.transient_delay(3), Duration::from_secs(2));
        assert!(policy.transient_delay(3) < policy.rate_limit_delay(3, None));
    }

    #[tokio::test(start_paused = true)]
    async fn retry__rate_limited_then_ok__waits_exponentially() {
        // given
        let calls = Arc::new(Mutex::new(0u32));
        let started = Instant::now();

        // when
        let result = retry(&policy(), "test", || {
            let calls = calls.clone();
            async move {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                if *calls < 3 {
                    Err(FakeError::RateLimited)
                } else {
                    Ok(*calls)
                }
            }
        })
        .await;

        // then
        assert_eq!(result.unwrap(), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry__always_flaky__surfaces_exhausted_after_max_attempts() {
        // given
        let calls = Arc::new(Mutex::new(0u32));

        // when
        let result: Result<(), _> = retry(&policy(), "test", || {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Err(FakeError::Flaky)
            }
        })
        .await;

        // then
        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 4,
                last: FakeError::Flaky
            })
        ));
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry__fatal_error__is_not_retried() {
        // given
        let calls = Arc::new(Mutex::new(0u32));

        // when
        let result: Result<(), _> = retry(&policy(), "test", || {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Err(FakeError::Broken)
            }
        })
        .await;

        // then
        assert!(matches!(result, Err(RetryError::Fatal(FakeError::Broken))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
