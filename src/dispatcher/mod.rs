//! 调度器：查找 → 参数强制转换 → 并发池 → 重试(熔断(调用)) → 健康统计
//!
//! # Dispatcher
//!
//! Every dispatch runs the same pipeline, in this order:
//!
//! 1. look up the service in the current registry snapshot (`UnknownService`)
//! 2. coerce the payload against its signature (`ValidationFailed`)
//! 3. acquire one pool slot for the whole request (`PoolExhausted`); a
//!    blocking call abandoned by a timeout keeps the slot until it returns,
//!    and the next attempt waits for a fresh one
//! 4. retry loop, each attempt gated by the service's circuit (`CircuitOpen`)
//! 5. invoke the bound callable off the caller's task
//! 6. record outcome and latency
//!
//! Lookup and validation failures never touch a slot, a circuit or the
//! health counters. Every exit is a typed [`InvocationResult`].
//!
//! ```rust
//! use callgate::{Dispatcher, FunctionDef, DeclaredParam, StaticLibrary};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let library = StaticLibrary::new("demo").function(
//!     FunctionDef::blocking("echo", |args| Ok(args.get("text").cloned().unwrap_or_default()))
//!         .param(DeclaredParam::new("text").annotated("str")),
//! );
//! let dispatcher = Dispatcher::builder().library(library).build().unwrap();
//! let result = dispatcher.dispatch("echo", json!({"text": "hi"})).await;
//! assert_eq!(result.value(), Some(&json!("hi")));
//! # });
//! ```

mod builder;
mod execution;

pub use builder::DispatcherBuilder;

use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coerce::coerce;
use crate::config::GatewayConfig;
use crate::error_code::DispatchError;
use crate::health::{HealthAccountant, HealthRecord, HealthReport, ServiceHealth};
use crate::introspect::{InvocationHandle, Introspectable};
use crate::registry::{RegistryHandle, ServiceRegistry};
use crate::resilience::{
    CircuitBreakerSnapshot, CircuitState, ConcurrencyPool, PoolExhausted, PoolScope, PoolSlot,
    PoolSnapshot, RetryFailure,
};
use crate::scanner::CapabilityScanner;
use crate::types::{InvocationResult, OrderedArgs};
use crate::Result;
use execution::ServiceState;

pub struct Dispatcher {
    library: Arc<dyn Introspectable>,
    scanner: CapabilityScanner,
    config: GatewayConfig,
    registry: RegistryHandle,
    states: DashMap<String, Arc<ServiceState>>,
    global_pool: Arc<ConcurrencyPool>,
    health: HealthAccountant,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    fn assemble(
        library: Arc<dyn Introspectable>,
        scanner: CapabilityScanner,
        config: GatewayConfig,
        registry: RegistryHandle,
    ) -> Self {
        let global_pool = Arc::new(ConcurrencyPool::new(
            "global",
            config.resilience.policy().pool,
        ));
        Self {
            library,
            scanner,
            config,
            registry,
            states: DashMap::new(),
            global_pool,
            health: HealthAccountant::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.load()
    }

    /// Dispatch `payload` to `service`, bounded by the configured request timeout.
    pub async fn dispatch(&self, service: &str, payload: Value) -> InvocationResult {
        self.run(service, payload, None).await
    }

    /// Dispatch with an explicit deadline for the pool wait and all attempts.
    ///
    /// When the deadline expires the in-flight work is dropped and the
    /// result is `Cancelled`, counted as a failure.
    pub async fn dispatch_with_deadline(
        &self,
        service: &str,
        payload: Value,
        deadline: Duration,
    ) -> InvocationResult {
        self.run(service, payload, Some(deadline)).await
    }

    async fn run(&self, service: &str, payload: Value, deadline: Option<Duration>) -> InvocationResult {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let registry = self.registry.load();
        let Some(descriptor) = registry.get(service).cloned() else {
            debug!(
                service,
                request_id = request_id.as_str(),
                "dispatch to unknown service"
            );
            return InvocationResult::Failure(DispatchError::unknown_service(service));
        };

        let args = match coerce(&descriptor.signature, &payload) {
            Ok(args) => args,
            Err(e) => {
                debug!(
                    service,
                    request_id = request_id.as_str(),
                    field = e.field(),
                    error = %e,
                    "payload rejected"
                );
                return InvocationResult::Failure(DispatchError::validation(service, &e));
            }
        };

        let state = self.state_for(service);
        let deadline = deadline.or(state.request_timeout);
        let ticket = self.health.begin(service);

        let execution = self.execute(service, &descriptor.handle, &state, args);
        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::cancelled(service, limit.as_millis())),
            },
            None => execution.await,
        };

        let duration_ms = started.elapsed().as_millis();
        match outcome {
            Ok((value, attempts)) => {
                ticket.succeed();
                debug!(
                    service,
                    request_id = request_id.as_str(),
                    outcome = "success",
                    attempts,
                    duration_ms,
                    "dispatch completed"
                );
                InvocationResult::Success(value)
            }
            Err(err) => {
                ticket.fail();
                info!(
                    service,
                    request_id = request_id.as_str(),
                    outcome = err.kind.name(),
                    attempts = err.attempts,
                    duration_ms,
                    error = err.message.as_str(),
                    "dispatch failed"
                );
                InvocationResult::Failure(err)
            }
        }
    }

    async fn execute(
        &self,
        service: &str,
        handle: &InvocationHandle,
        state: &ServiceState,
        args: OrderedArgs,
    ) -> std::result::Result<(Value, u32), DispatchError> {
        let slot = state
            .pool
            .acquire()
            .await
            .map_err(|e| pool_exhausted(service, &state.pool, e))?;
        let held = Mutex::new(Some(slot));
        let held = &held;

        let outcome = state
            .retry
            .run(
                |_attempt| {
                    let args = args.clone();
                    async move { self.attempt(service, handle, state, held, args).await }
                },
                execution::classify,
            )
            .await;

        match outcome {
            Ok(done) => Ok(done),
            Err(RetryFailure::Exhausted { attempts, error }) if attempts > 1 => {
                Err(DispatchError::retries_exhausted(service, attempts, error))
            }
            Err(failure) => {
                let attempts = failure.attempts();
                Err(failure.into_error().with_attempts(attempts))
            }
        }
    }

    // One circuit-gated invocation. `held` carries the request's slot between
    // attempts; it is empty when an earlier call is still running with it.
    async fn attempt(
        &self,
        service: &str,
        handle: &InvocationHandle,
        state: &ServiceState,
        held: &Mutex<Option<PoolSlot>>,
        args: OrderedArgs,
    ) -> std::result::Result<Value, DispatchError> {
        let slot = match take_slot(held) {
            Some(slot) => slot,
            None => state
                .pool
                .acquire()
                .await
                .map_err(|e| pool_exhausted(service, &state.pool, e))?,
        };
        let permit = match state.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                put_slot(held, slot);
                return Err(DispatchError::circuit_open(service));
            }
        };

        let call = execution::invoke(handle, args, slot);
        let returned = match state.invocation_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DispatchError::timeout(service, limit.as_millis())),
            None => Ok(call.await),
        };
        let result = returned.and_then(|(result, slot)| {
            if let Some(slot) = slot {
                put_slot(held, slot);
            }
            result.map_err(|f| DispatchError::library(service, f.message, f.client_input))
        });

        match &result {
            // the dependency answered; bad input says nothing about its health
            Ok(_) => permit.succeed(),
            Err(e) if e.client_input => permit.succeed(),
            Err(_) => permit.fail(),
        }
        result
    }

    fn state_for(&self, service: &str) -> Arc<ServiceState> {
        if let Some(state) = self.states.get(service) {
            return Arc::clone(state.value());
        }
        let state = Arc::clone(
            self.states
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(self.new_state(service)))
                .value(),
        );
        // A refresh may have dropped the service while this dispatch was in
        // flight. Refresh installs before pruning, so checking after the
        // insert leaves no entry behind.
        if !self.registry.load().contains(service) {
            self.states.remove(service);
        }
        state
    }

    fn new_state(&self, service: &str) -> ServiceState {
        let policy = self.config.policy_for(service);
        let pool = match self.config.resilience.pool_scope {
            PoolScope::Global => Arc::clone(&self.global_pool),
            PoolScope::PerService => {
                Arc::new(ConcurrencyPool::new(service, policy.pool.clone()))
            }
        };
        ServiceState::new(service, policy, pool)
    }

    /// Re-scan the library and atomically replace the registry.
    ///
    /// On failure the current registry stays in place. Circuit and health
    /// state carry over for services that still exist.
    pub fn refresh_registry(&self) -> Result<Arc<ServiceRegistry>> {
        let next = match self.scanner.scan(&*self.library) {
            Ok(next) => next,
            Err(e) => {
                warn!(
                    library = self.library.name(),
                    error = %e,
                    "registry refresh failed; keeping current registry"
                );
                return Err(e.into());
            }
        };
        let installed = self.registry.install(next);
        self.states.retain(|name, _| installed.contains(name));
        self.health.retain(|name| installed.contains(name));
        Ok(installed)
    }

    /// Health-check surface over every registered service.
    pub fn health_report(&self) -> HealthReport {
        let registry = self.registry.load();
        let services = registry
            .names()
            .map(|name| self.row(name))
            .collect();
        HealthReport::new(services, self.config.health.error_rate_threshold)
    }

    pub fn service_health(&self, service: &str) -> Option<ServiceHealth> {
        self.registry
            .load()
            .contains(service)
            .then(|| self.row(service))
    }

    pub fn health_record(&self, service: &str) -> HealthRecord {
        self.health.snapshot(service)
    }

    fn row(&self, service: &str) -> ServiceHealth {
        let circuit = self
            .states
            .get(service)
            .map(|s| s.breaker.state())
            .unwrap_or(CircuitState::Closed);
        ServiceHealth::new(service, self.health.snapshot(service), circuit)
    }

    pub fn circuit_snapshot(&self, service: &str) -> Option<CircuitBreakerSnapshot> {
        if !self.registry.load().contains(service) {
            return None;
        }
        Some(self.state_for(service).breaker.snapshot())
    }

    pub fn pool_snapshot(&self, service: &str) -> Option<PoolSnapshot> {
        if !self.registry.load().contains(service) {
            return None;
        }
        Some(self.state_for(service).pool.snapshot())
    }

    /// Close the service's circuit and clear its health counters.
    pub fn reset_service(&self, service: &str) {
        if let Some(state) = self.states.get(service) {
            state.breaker.reset();
        }
        self.health.reset(service);
    }

    pub fn reset_health(&self) {
        self.health.reset_all();
    }
}

fn take_slot(held: &Mutex<Option<PoolSlot>>) -> Option<PoolSlot> {
    held.lock().unwrap_or_else(|e| e.into_inner()).take()
}

fn put_slot(held: &Mutex<Option<PoolSlot>>, slot: PoolSlot) {
    *held.lock().unwrap_or_else(|e| e.into_inner()) = Some(slot);
}

fn pool_exhausted(service: &str, pool: &ConcurrencyPool, e: PoolExhausted) -> DispatchError {
    warn!(
        service,
        pool = pool.name(),
        size = pool.size(),
        waited_ms = e.waited.as_millis() as u64,
        "pool exhausted"
    );
    DispatchError::pool_exhausted(service, e.waited.as_millis())
}
