//! 网关配置：YAML 文件 + 环境变量覆盖 + 按服务覆盖
//!
//! # Gateway Configuration
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `resilience` | Circuit breaker, retry, pool and timeout defaults |
//! | `services` | Per-service partial overrides of `resilience` |
//! | `health` | Threshold for the overall health status |
//! | `scanner` | Discovery depth, description length, exclusions |
//!
//! ```yaml
//! resilience:
//!   circuit_failure_threshold: 5
//!   circuit_cooldown_seconds: 30
//!   retry_max_attempts: 3
//!   pool_size: 8
//!   pool_scope: per_service
//! services:
//!   transcribe:
//!     pool_size: 1
//!     invocation_timeout_seconds: 120
//! scanner:
//!   exclude: ["^internal\\."]
//! ```
//!
//! Environment variables (`CALLGATE_*`) override the base `resilience`
//! section after the file is loaded; see [`GatewayConfig::apply_env_overrides`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::resilience::{CircuitBreakerConfig, PoolConfig, PoolScope, RetryConfig};
use crate::{Error, ErrorContext, Result};

const SOURCE: &str = "config_loader";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_seconds: f64,
    pub circuit_failure_window_seconds: f64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_seconds: f64,
    pub retry_max_delay_seconds: f64,
    pub retry_jitter: bool,
    pub pool_size: usize,
    pub pool_acquire_timeout_seconds: f64,
    pub pool_scope: PoolScope,
    /// Per attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_seconds: Option<f64>,
    /// Whole dispatch, including pool wait and backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<f64>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: 5,
            circuit_cooldown_seconds: 30.0,
            circuit_failure_window_seconds: 60.0,
            retry_max_attempts: 3,
            retry_base_delay_seconds: 0.1,
            retry_max_delay_seconds: 10.0,
            retry_jitter: true,
            pool_size: crate::resilience::pool::default_pool_size(),
            pool_acquire_timeout_seconds: 5.0,
            pool_scope: PoolScope::Global,
            invocation_timeout_seconds: None,
            request_timeout_seconds: None,
        }
    }
}

/// Partial override of [`ResilienceConfig`] for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_cooldown_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_failure_window_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_jitter: Option<bool>,
    /// Only honored with `pool_scope: per_service`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_acquire_timeout_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<f64>,
}

impl ServiceOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_circuit_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit_failure_threshold = Some(threshold);
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_invocation_timeout_seconds(mut self, secs: f64) -> Self {
        self.invocation_timeout_seconds = Some(secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Overall status is degraded when any service's error rate exceeds this.
    pub error_rate_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Nested namespace levels to descend below the root.
    pub max_depth: usize,
    pub max_description_len: usize,
    /// Regular expressions matched against qualified names.
    pub exclude: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_description_len: 500,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub resilience: ResilienceConfig,
    pub services: HashMap<String, ServiceOverrides>,
    pub health: HealthConfig,
    pub scanner: ScannerConfig,
}

/// Resolved policy for one service, durations converted.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePolicy {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub pool: PoolConfig,
    pub invocation_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl ResilienceConfig {
    /// Overlay `overrides` on this base.
    pub fn merged(&self, overrides: &ServiceOverrides) -> ResilienceConfig {
        let o = overrides;
        ResilienceConfig {
            circuit_failure_threshold: o
                .circuit_failure_threshold
                .unwrap_or(self.circuit_failure_threshold),
            circuit_cooldown_seconds: o
                .circuit_cooldown_seconds
                .unwrap_or(self.circuit_cooldown_seconds),
            circuit_failure_window_seconds: o
                .circuit_failure_window_seconds
                .unwrap_or(self.circuit_failure_window_seconds),
            retry_max_attempts: o.retry_max_attempts.unwrap_or(self.retry_max_attempts),
            retry_base_delay_seconds: o
                .retry_base_delay_seconds
                .unwrap_or(self.retry_base_delay_seconds),
            retry_max_delay_seconds: o
                .retry_max_delay_seconds
                .unwrap_or(self.retry_max_delay_seconds),
            retry_jitter: o.retry_jitter.unwrap_or(self.retry_jitter),
            pool_size: o.pool_size.unwrap_or(self.pool_size),
            pool_acquire_timeout_seconds: o
                .pool_acquire_timeout_seconds
                .unwrap_or(self.pool_acquire_timeout_seconds),
            pool_scope: self.pool_scope,
            invocation_timeout_seconds: o
                .invocation_timeout_seconds
                .or(self.invocation_timeout_seconds),
            request_timeout_seconds: o.request_timeout_seconds.or(self.request_timeout_seconds),
        }
    }

    pub fn policy(&self) -> ServicePolicy {
        ServicePolicy {
            breaker: CircuitBreakerConfig::new()
                .with_failure_threshold(self.circuit_failure_threshold)
                .with_cooldown(secs(self.circuit_cooldown_seconds))
                .with_failure_window(secs(self.circuit_failure_window_seconds)),
            retry: RetryConfig::new()
                .with_max_attempts(self.retry_max_attempts)
                .with_base_delay(secs(self.retry_base_delay_seconds))
                .with_max_delay(secs(self.retry_max_delay_seconds))
                .with_jitter(self.retry_jitter),
            pool: PoolConfig::default()
                .with_size(self.pool_size)
                .with_acquire_timeout(secs(self.pool_acquire_timeout_seconds)),
            invocation_timeout: self.invocation_timeout_seconds.map(secs),
            request_timeout: self.request_timeout_seconds.map(secs),
        }
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        positive(prefix, "circuit_failure_threshold", self.circuit_failure_threshold as u64)?;
        positive(prefix, "retry_max_attempts", self.retry_max_attempts as u64)?;
        positive(prefix, "pool_size", self.pool_size as u64)?;
        duration(prefix, "circuit_cooldown_seconds", self.circuit_cooldown_seconds)?;
        duration(
            prefix,
            "circuit_failure_window_seconds",
            self.circuit_failure_window_seconds,
        )?;
        duration(prefix, "retry_base_delay_seconds", self.retry_base_delay_seconds)?;
        duration(prefix, "retry_max_delay_seconds", self.retry_max_delay_seconds)?;
        duration(
            prefix,
            "pool_acquire_timeout_seconds",
            self.pool_acquire_timeout_seconds,
        )?;
        if let Some(t) = self.invocation_timeout_seconds {
            timeout(prefix, "invocation_timeout_seconds", t)?;
        }
        if let Some(t) = self.request_timeout_seconds {
            timeout(prefix, "request_timeout_seconds", t)?;
        }
        if self.retry_base_delay_seconds > self.retry_max_delay_seconds {
            return Err(invalid(
                format!("{}.retry_base_delay_seconds", prefix),
                "retry base delay exceeds max delay",
                format!(
                    "{} > {}",
                    self.retry_base_delay_seconds, self.retry_max_delay_seconds
                ),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: GatewayConfig = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_source(SOURCE),
            )
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Apply `CALLGATE_*` environment variables to the base resilience section.
    ///
    /// - `CALLGATE_CIRCUIT_FAILURE_THRESHOLD`
    /// - `CALLGATE_CIRCUIT_COOLDOWN_SECONDS`
    /// - `CALLGATE_RETRY_MAX_ATTEMPTS`
    /// - `CALLGATE_RETRY_BASE_DELAY_SECONDS`
    /// - `CALLGATE_RETRY_MAX_DELAY_SECONDS`
    /// - `CALLGATE_POOL_SIZE`
    /// - `CALLGATE_POOL_ACQUIRE_TIMEOUT_SECONDS`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) over an explicit variable set.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let r = &mut self.resilience;
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "CALLGATE_CIRCUIT_FAILURE_THRESHOLD" => {
                    r.circuit_failure_threshold = parse_env(key, value)?
                }
                "CALLGATE_CIRCUIT_COOLDOWN_SECONDS" => {
                    r.circuit_cooldown_seconds = parse_env(key, value)?
                }
                "CALLGATE_RETRY_MAX_ATTEMPTS" => r.retry_max_attempts = parse_env(key, value)?,
                "CALLGATE_RETRY_BASE_DELAY_SECONDS" => {
                    r.retry_base_delay_seconds = parse_env(key, value)?
                }
                "CALLGATE_RETRY_MAX_DELAY_SECONDS" => {
                    r.retry_max_delay_seconds = parse_env(key, value)?
                }
                "CALLGATE_POOL_SIZE" => r.pool_size = parse_env(key, value)?,
                "CALLGATE_POOL_ACQUIRE_TIMEOUT_SECONDS" => {
                    r.pool_acquire_timeout_seconds = parse_env(key, value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn with_circuit_failure_threshold(mut self, threshold: u32) -> Self {
        self.resilience.circuit_failure_threshold = threshold;
        self
    }

    pub fn with_circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.resilience.circuit_cooldown_seconds = cooldown.as_secs_f64();
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.resilience.retry_max_attempts = attempts;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.resilience.retry_base_delay_seconds = base.as_secs_f64();
        self.resilience.retry_max_delay_seconds = max.as_secs_f64();
        self
    }

    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.resilience.retry_jitter = jitter;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.resilience.pool_size = size;
        self
    }

    pub fn with_pool_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.resilience.pool_acquire_timeout_seconds = timeout.as_secs_f64();
        self
    }

    pub fn with_pool_scope(mut self, scope: PoolScope) -> Self {
        self.resilience.pool_scope = scope;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.resilience.invocation_timeout_seconds = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.resilience.request_timeout_seconds = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, overrides: ServiceOverrides) -> Self {
        self.services.insert(name.into(), overrides);
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// Resolved policy for `service`: base section merged with its overrides.
    pub fn policy_for(&self, service: &str) -> ServicePolicy {
        self.resolved(service).policy()
    }

    pub fn resolved(&self, service: &str) -> ResilienceConfig {
        match self.services.get(service) {
            Some(o) => self.resilience.merged(o),
            None => self.resilience.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.resilience.validate("resilience")?;
        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        for name in names {
            self.resolved(name)
                .validate(&format!("services.{}", name))?;
        }
        let t = self.health.error_rate_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(invalid(
                "health.error_rate_threshold".to_string(),
                "error rate threshold must be within [0, 1]",
                t.to_string(),
            ));
        }
        if self.scanner.max_description_len == 0 {
            return Err(invalid(
                "scanner.max_description_len".to_string(),
                "description length must be at least 1",
                "0".to_string(),
            ));
        }
        Ok(())
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn invalid(field: String, message: &str, details: String) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source(SOURCE),
    )
}

fn positive(prefix: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(invalid(
            format!("{}.{}", prefix, field),
            "value must be at least 1",
            "0".to_string(),
        ));
    }
    Ok(())
}

// Negative, non-finite and overflowing values all fail the conversion.
fn duration(prefix: &str, field: &str, value: f64) -> Result<()> {
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(invalid(
            format!("{}.{}", prefix, field),
            "duration must be a finite, non-negative number of seconds",
            value.to_string(),
        ));
    }
    Ok(())
}

fn timeout(prefix: &str, field: &str, value: f64) -> Result<()> {
    duration(prefix, field, value)?;
    if value == 0.0 {
        return Err(invalid(
            format!("{}.{}", prefix, field),
            "timeout must be greater than zero; omit it to disable",
            value.to_string(),
        ));
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        Error::configuration_with_context(
            format!("invalid environment override: {}", e),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(value.to_string())
                .with_source("env"),
        )
    })
}
