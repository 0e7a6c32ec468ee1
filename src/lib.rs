//! # callgate
//!
//! 自动发现库的可调用能力，并以熔断、重试、并发池和健康统计保护每一次调用。
//!
//! Capability discovery and resilient dispatch for in-process libraries.
//!
//! ## Overview
//!
//! `callgate` scans a library through the [`Introspectable`] capability,
//! builds a [`ServiceRegistry`] of callable services with typed
//! [`SignatureModel`]s, and dispatches JSON payloads to them. Each call is
//! validated against its signature, then runs inside a bounded concurrency
//! pool, a retry loop and a per-service circuit breaker. Outcomes feed
//! per-service health counters.
//!
//! ## Key Features
//!
//! - **Discovery**: [`CapabilityScanner`] turns library members into services, degrading instead of dropping
//! - **Coercion**: payloads are checked and converted into [`OrderedArgs`] before any resource is taken
//! - **Resilience**: circuit breaker, retry with backoff and jitter, and a concurrency pool via [`resilience`]
//! - **Health**: lock-free per-service counters and a serializable [`HealthReport`]
//! - **Hot refresh**: [`Dispatcher::refresh_registry`] swaps the registry atomically
//!
//! ## Quick Start
//!
//! ```rust
//! use callgate::{DeclaredParam, Dispatcher, ErrorKind, FunctionDef, StaticLibrary};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let library = StaticLibrary::new("demo").function(
//!     FunctionDef::blocking("echo", |args| Ok(args.get("text").cloned().unwrap_or_default()))
//!         .param(DeclaredParam::new("text").annotated("str"))
//!         .doc("Echo the text back."),
//! );
//!
//! let dispatcher = Dispatcher::builder().library(library).build()?;
//!
//! let ok = dispatcher.dispatch("echo", json!({"text": "hi"})).await;
//! assert_eq!(ok.value(), Some(&json!("hi")));
//!
//! let bad = dispatcher.dispatch("echo", json!({})).await;
//! assert_eq!(bad.error_kind(), Some(ErrorKind::ValidationFailed));
//! # Ok::<(), callgate::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Signatures, coerced arguments, invocation results |
//! | [`introspect`] | Library capability and the in-process / manifest adapters |
//! | [`scanner`] | Capability scanner and scan report |
//! | [`registry`] | Immutable registry snapshots and the swap handle |
//! | [`coerce`] | Payload validation and coercion |
//! | [`resilience`] | Circuit breaker, retry policy, concurrency pool |
//! | [`health`] | Health accounting and the health-check surface |
//! | [`dispatcher`] | The dispatch pipeline |
//! | [`config`] | YAML configuration and environment overrides |

pub mod coerce;
pub mod config;
pub mod dispatcher;
pub mod error_code;
pub mod health;
pub mod introspect;
pub mod registry;
pub mod resilience;
pub mod scanner;
pub mod types;

// Re-export main types for convenience
pub use coerce::{coerce, ValidationError};
pub use config::{GatewayConfig, ResilienceConfig, ServiceOverrides};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error_code::{DispatchError, ErrorKind};
pub use health::{HealthReport, HealthStatus, ServiceHealth};
pub use introspect::{
    DeclaredParam, FunctionDef, InvocationHandle, Introspectable, LibraryFailure, LibraryManifest,
    Namespace, StaticLibrary,
};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use scanner::{CapabilityScanner, ScanError, ScanReport};
pub use types::{
    InvocationResult, OrderedArgs, ParameterSpec, Requirement, SignatureModel, TypeTag, UploadRef,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
