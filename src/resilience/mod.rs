//! 弹性模块：熔断器、重试策略与并发池。
//!
//! # Resilience Primitives
//!
//! The three gates every dispatch passes through, outermost first:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-service CLOSED / OPEN / HALF_OPEN failure isolation |
//! | [`pool`] | Bounded concurrency with acquire timeout |
//! | [`retry`] | Bounded attempts with exponential backoff and jitter |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use callgate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_cooldown(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new("transcribe", config);
//!
//! if let Ok(permit) = breaker.try_acquire() {
//!     // call the library...
//!     permit.succeed();
//! };
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use callgate::resilience::retry::{RetryConfig, RetryPolicy, Retryability};
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(RetryConfig::new().with_max_attempts(2).with_jitter(false));
//! let out = policy
//!     .run(|_attempt| async { Ok::<_, String>(42) }, |_| Retryability::Retryable)
//!     .await;
//! assert_eq!(out, Ok((42, 1)));
//! # });
//! ```

pub mod circuit_breaker;
pub mod pool;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitOpen,
    CircuitState,
};
pub use pool::{ConcurrencyPool, PoolConfig, PoolExhausted, PoolScope, PoolSlot, PoolSnapshot};
pub use retry::{RetryConfig, RetryFailure, RetryPolicy, Retryability};
