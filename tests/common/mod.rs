//! Shared fixtures for integration tests

#![allow(dead_code)]

use callgate::introspect::{IntrospectError, MemberEntry, MemberMetadata, MemberPath};
use callgate::{
    DeclaredParam, Dispatcher, FunctionDef, GatewayConfig, InvocationHandle, Introspectable,
    LibraryFailure, StaticLibrary,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Config with near-zero backoff so retry tests stay fast.
pub fn quick_config() -> GatewayConfig {
    GatewayConfig::default()
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_retry_jitter(false)
        .with_pool_size(8)
}

pub fn build(library: StaticLibrary, config: GatewayConfig) -> Dispatcher {
    Dispatcher::builder()
        .library(library)
        .config(config)
        .build()
        .expect("dispatcher builds")
}

pub fn echo() -> FunctionDef {
    FunctionDef::blocking("echo", |args| Ok(args.get("text").cloned().unwrap_or_default()))
        .param(DeclaredParam::new("text").annotated("str"))
        .doc("Echo the text back.")
}

/// Library call counter plus a switch to make the callable fail.
#[derive(Clone, Default)]
pub struct Probe {
    pub calls: Arc<AtomicU32>,
    pub failing: Arc<AtomicBool>,
}

impl Probe {
    pub fn failing() -> Self {
        let p = Self::default();
        p.set_failing(true);
        p
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Blocking callable that counts calls and fails while switched on.
    pub fn function(&self, name: &str) -> FunctionDef {
        let probe = self.clone();
        FunctionDef::blocking(name, move |_| {
            probe.calls.fetch_add(1, Ordering::SeqCst);
            if probe.failing.load(Ordering::SeqCst) {
                Err(LibraryFailure::new("backend unavailable"))
            } else {
                Ok(json!("ok"))
            }
        })
    }

    /// Async callable that counts calls and then sleeps for `delay`.
    pub fn slow_function(&self, name: &str, delay: Duration) -> FunctionDef {
        let probe = self.clone();
        FunctionDef::async_fn(name, move |_| {
            let probe = probe.clone();
            async move {
                probe.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                if probe.failing.load(Ordering::SeqCst) {
                    Err(LibraryFailure::new("backend unavailable"))
                } else {
                    Ok(Value::String("done".into()))
                }
            }
        })
    }
}

/// Library whose contents can be replaced between scans.
pub struct SwappableLibrary {
    name: String,
    inner: RwLock<StaticLibrary>,
}

impl SwappableLibrary {
    pub fn new(initial: StaticLibrary) -> Arc<Self> {
        Arc::new(Self {
            name: initial.name().to_string(),
            inner: RwLock::new(initial),
        })
    }

    pub fn replace(&self, next: StaticLibrary) {
        *self.inner.write().unwrap() = next;
    }
}

impl Introspectable for SwappableLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_members(&self, namespace: &MemberPath) -> Result<Vec<MemberEntry>, IntrospectError> {
        self.inner.read().unwrap().list_members(namespace)
    }

    fn metadata(&self, path: &MemberPath) -> Result<MemberMetadata, IntrospectError> {
        self.inner.read().unwrap().metadata(path)
    }

    fn bind(&self, path: &MemberPath) -> Result<InvocationHandle, IntrospectError> {
        self.inner.read().unwrap().bind(path)
    }
}
