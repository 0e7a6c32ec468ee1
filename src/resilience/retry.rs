//! Bounded retry with exponential backoff.
//!
//! `max_attempts` counts the first attempt. The delay before attempt `n + 1`
//! is `min(base * 2^(n-1) + jitter, max_delay)` where jitter is drawn
//! uniformly from `[0, base)` when enabled.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Whether a failed attempt may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    Fatal,
}

/// Terminal outcome of a retried operation that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure<E> {
    /// The classifier marked the error fatal.
    Fatal { attempts: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryFailure<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Fatal { attempts, .. } | RetryFailure::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryFailure::Fatal { error, .. } | RetryFailure::Exhausted { error, .. } => error,
        }
    }

    /// The last error, unchanged.
    pub fn into_error(self) -> E {
        match self {
            RetryFailure::Fatal { error, .. } | RetryFailure::Exhausted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryFailure::Exhausted { .. })
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        let cap = self.config.max_delay;

        let exp = attempt.saturating_sub(1).min(31);
        let mut delay = base.saturating_mul(1u32 << exp);
        if self.config.jitter && !base.is_zero() {
            delay = delay.saturating_add(base.mul_f64(unit_random()));
        }
        delay.min(cap)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. On success the value is
    /// returned with the number of attempts used.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        mut op: F,
        classify: C,
    ) -> Result<(T, u32), RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Retryability,
        E: std::fmt::Display,
    {
        let max = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => {
                    if classify(&error) == Retryability::Fatal {
                        debug!(attempt, error = %error, "attempt failed with fatal error");
                        return Err(RetryFailure::Fatal {
                            attempts: attempt,
                            error,
                        });
                    }
                    if attempt >= max {
                        warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                        return Err(RetryFailure::Exhausted {
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = self.backoff(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after backoff"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

// Uniform in [0, 1), drawn from the random bits of a v4 uuid.
fn unit_random() -> f64 {
    let bits = uuid::Uuid::new_v4().as_u128() as u64;
    (bits >> 11) as f64 / (1u64 << 53) as f64
}
