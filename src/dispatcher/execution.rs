//! 单次调用执行：阻塞调用进入阻塞线程池，异步调用在可中止的任务中运行。
//!
//! Single-attempt execution of a bound library callable.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

use crate::config::ServicePolicy;
use crate::error_code::{DispatchError, ErrorKind};
use crate::introspect::{InvocationHandle, LibraryFailure};
use crate::resilience::{CircuitBreaker, ConcurrencyPool, PoolSlot, RetryPolicy, Retryability};
use crate::types::OrderedArgs;

/// Resilience state owned by one service.
pub(crate) struct ServiceState {
    pub(crate) breaker: CircuitBreaker,
    pub(crate) retry: RetryPolicy,
    /// Shared with every other service under the global pool scope.
    pub(crate) pool: Arc<ConcurrencyPool>,
    pub(crate) invocation_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
}

impl ServiceState {
    pub(crate) fn new(service: &str, policy: ServicePolicy, pool: Arc<ConcurrencyPool>) -> Self {
        Self {
            breaker: CircuitBreaker::new(service, policy.breaker),
            retry: RetryPolicy::new(policy.retry),
            pool,
            invocation_timeout: policy.invocation_timeout,
            request_timeout: policy.request_timeout,
        }
    }
}

/// Retry classifier for dispatch errors.
pub(crate) fn classify(err: &DispatchError) -> Retryability {
    match err.kind {
        ErrorKind::LibraryError if !err.client_input => Retryability::Retryable,
        ErrorKind::Timeout => Retryability::Retryable,
        _ => Retryability::Fatal,
    }
}

// Aborts the spawned task if the attempt future is dropped first.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the callable once, off the caller's task.
///
/// The pool slot goes in with the call and comes back once the call has
/// returned. A blocking job owns its slot: when the attempt is dropped
/// (invocation timeout, request deadline) the job keeps running and the
/// slot is released only when it finishes, so a retry has to acquire a
/// fresh one. An async call is aborted on drop and its slot freed with it.
///
/// `None` in place of the slot means the job took it down with a panic.
pub(crate) async fn invoke(
    handle: &InvocationHandle,
    args: OrderedArgs,
    slot: PoolSlot,
) -> (Result<Value, LibraryFailure>, Option<PoolSlot>) {
    match handle {
        InvocationHandle::Blocking(f) => {
            let f = Arc::clone(f);
            match tokio::task::spawn_blocking(move || (f.call(args), slot)).await {
                Ok((result, slot)) => (result, Some(slot)),
                Err(e) => (Err(join_failure(e)), None),
            }
        }
        InvocationHandle::Async(f) => {
            let f = Arc::clone(f);
            let mut task = AbortOnDrop(tokio::spawn(async move { f.call(args).await }));
            let result = (&mut task.0).await.unwrap_or_else(|e| Err(join_failure(e)));
            (result, Some(slot))
        }
    }
}

fn join_failure(err: JoinError) -> LibraryFailure {
    if !err.is_panic() {
        return LibraryFailure::new("library call was cancelled");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    LibraryFailure::new(format!("library call panicked: {}", detail))
}
