//! Dispatch error taxonomy.
//!
//! Every failed dispatch resolves to a [`DispatchError`] tagged with an
//! [`ErrorKind`]. Each kind carries a stable code string, a snake_case name and
//! a status hint so that a transport layer can render the failure without
//! knowing anything about the resilience stack.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category    | Description                              |
//! |--------|-------------|------------------------------------------|
//! | E1xxx  | client      | Unknown service, payload validation      |
//! | E2xxx  | capacity    | Local concurrency limits                 |
//! | E3xxx  | dependency  | Library failures and protective refusals |
//! | E4xxx  | operational | Request lifecycle (cancellation)         |
//!
//! ## Example
//!
//! ```rust
//! use callgate::error_code::ErrorKind;
//!
//! let kind = ErrorKind::CircuitOpen;
//! assert_eq!(kind.code(), "E3004");
//! assert_eq!(kind.status_hint(), 503);
//! assert!(kind.caller_may_retry());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coerce::ValidationError;

/// Kind of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// E1004: No service with that name in the current registry
    UnknownService,
    /// E1001: Payload did not match the service signature
    ValidationFailed,
    /// E2003: No pool slot became free before the acquire timeout
    PoolExhausted,
    /// E3001: The underlying callable raised or returned a failure
    LibraryError,
    /// E3003: A single attempt exceeded the invocation timeout
    Timeout,
    /// E3004: The service circuit is open; the library was not called
    CircuitOpen,
    /// E3005: Every retry attempt failed with a retryable error
    RetriesExhausted,
    /// E4002: The external deadline expired while the request was in flight
    Cancelled,
}

impl ErrorKind {
    /// Returns the canonical code string (e.g., `"E1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "E1001",
            Self::UnknownService => "E1004",
            Self::PoolExhausted => "E2003",
            Self::LibraryError => "E3001",
            Self::Timeout => "E3003",
            Self::CircuitOpen => "E3004",
            Self::RetriesExhausted => "E3005",
            Self::Cancelled => "E4002",
        }
    }

    /// Returns the snake_case name (e.g., `"circuit_open"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnknownService => "unknown_service",
            Self::ValidationFailed => "validation_failed",
            Self::PoolExhausted => "pool_exhausted",
            Self::LibraryError => "library_error",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns the category: `"client"`, `"capacity"`, `"dependency"` or `"operational"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownService | Self::ValidationFailed => "client",
            Self::PoolExhausted => "capacity",
            Self::LibraryError | Self::Timeout | Self::CircuitOpen | Self::RetriesExhausted => {
                "dependency"
            }
            Self::Cancelled => "operational",
        }
    }

    /// HTTP-style status a transport should use when rendering this failure.
    #[inline]
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::UnknownService => 404,
            Self::ValidationFailed => 422,
            Self::PoolExhausted | Self::CircuitOpen => 503,
            Self::LibraryError | Self::RetriesExhausted => 502,
            Self::Timeout => 504,
            Self::Cancelled => 499,
        }
    }

    /// Whether an external caller may reasonably retry the same request later.
    ///
    /// This is advice for callers above the dispatcher; it has no effect on the
    /// internal retry policy.
    #[inline]
    pub fn caller_may_retry(&self) -> bool {
        !matches!(self, Self::UnknownService | Self::ValidationFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Structured, response-ready dispatch failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Offending payload field for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The library rejected the input itself; never retried.
    #[serde(default, skip_serializing_if = "is_false")]
    pub client_input: bool,
    /// Attempts made against the library before this error was produced.
    #[serde(default)]
    pub attempts: u32,
    /// Verbatim final error of an exhausted retry sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Box<DispatchError>>,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            message: message.into(),
            service: None,
            field: None,
            client_input: false,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(
            ErrorKind::UnknownService,
            format!("no service named '{}' is registered", service),
        )
        .with_service(service)
    }

    pub fn validation(service: &str, err: &ValidationError) -> Self {
        let mut e = Self::new(ErrorKind::ValidationFailed, err.to_string()).with_service(service);
        e.field = Some(err.field().to_string());
        e
    }

    pub fn circuit_open(service: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit for '{}' is open", service),
        )
        .with_service(service)
    }

    pub fn pool_exhausted(service: &str, waited_ms: u128) -> Self {
        Self::new(
            ErrorKind::PoolExhausted,
            format!("no pool slot for '{}' became free within {}ms", service, waited_ms),
        )
        .with_service(service)
    }

    pub fn library(service: &str, message: impl Into<String>, client_input: bool) -> Self {
        let mut e = Self::new(ErrorKind::LibraryError, message).with_service(service);
        e.client_input = client_input;
        e
    }

    pub fn timeout(service: &str, after_ms: u128) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("invocation of '{}' timed out after {}ms", service, after_ms),
        )
        .with_service(service)
    }

    pub fn cancelled(service: &str, after_ms: u128) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            format!("request for '{}' cancelled after {}ms deadline", service, after_ms),
        )
        .with_service(service)
    }

    /// Wrap the last error of an exhausted retry sequence.
    pub fn retries_exhausted(service: &str, attempts: u32, last: DispatchError) -> Self {
        let mut e = Self::new(
            ErrorKind::RetriesExhausted,
            format!(
                "'{}' failed after {} attempts: {}",
                service, attempts, last.message
            ),
        )
        .with_service(service)
        .with_attempts(attempts);
        e.last_error = Some(Box::new(last));
        e
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// The innermost error: for `RetriesExhausted` this is the last attempt's error.
    pub fn root(&self) -> &DispatchError {
        match &self.last_error {
            Some(inner) => inner.root(),
            None => self,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.kind, self.message)
    }
}

impl std::error::Error for DispatchError {}
