//! 健康统计：按服务记录调用次数、错误次数与累计延迟
//!
//! # Health Accounting
//!
//! Counters are lock-free atomics per service, so recording never blocks
//! dispatches to other services. Averages and error rates are derived on
//! read and report `None` when no call has been recorded.
//!
//! | Type | Role |
//! |------|------|
//! | [`HealthAccountant`] | Per-service counters, resets, drop-guarded tickets |
//! | [`HealthRecord`] | Point-in-time counters for one service |
//! | [`ServiceHealth`] | One row of the health-check surface |
//! | [`HealthReport`] | Every service plus the overall status |

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::resilience::CircuitState;

#[derive(Debug, Default)]
struct HealthCell {
    calls: AtomicU64,
    errors: AtomicU64,
    latency_ns: AtomicU64,
}

impl HealthCell {
    fn record(&self, success: bool, latency: Duration) {
        let ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(ns, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.calls.fetch_add(1, Ordering::Release);
    }

    fn to_record(&self) -> HealthRecord {
        let call_count = self.calls.load(Ordering::Acquire);
        let error_count = self.errors.load(Ordering::Relaxed).min(call_count);
        HealthRecord {
            call_count,
            error_count,
            total_latency: Duration::from_nanos(self.latency_ns.load(Ordering::Relaxed)),
        }
    }

    fn clear(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.latency_ns.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub call_count: u64,
    pub error_count: u64,
    #[serde(skip)]
    pub total_latency: Duration,
}

impl HealthRecord {
    pub fn avg_response_time(&self) -> Option<Duration> {
        if self.call_count == 0 {
            return None;
        }
        let avg_ns = self.total_latency.as_nanos() / self.call_count as u128;
        Some(Duration::from_nanos(u64::try_from(avg_ns).unwrap_or(u64::MAX)))
    }

    pub fn error_rate(&self) -> Option<f64> {
        if self.call_count == 0 {
            None
        } else {
            Some(self.error_count as f64 / self.call_count as f64)
        }
    }
}

/// Per-service health counters.
#[derive(Debug, Default)]
pub struct HealthAccountant {
    cells: DashMap<String, Arc<HealthCell>>,
}

impl HealthAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, service: &str) -> Arc<HealthCell> {
        if let Some(cell) = self.cells.get(service) {
            return Arc::clone(cell.value());
        }
        Arc::clone(
            self.cells
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(HealthCell::default()))
                .value(),
        )
    }

    pub fn record(&self, service: &str, success: bool, latency: Duration) {
        self.cell(service).record(success, latency);
    }

    /// Start timing one call. The ticket records a failure if dropped unsettled.
    pub fn begin(&self, service: &str) -> HealthTicket {
        HealthTicket {
            cell: self.cell(service),
            started: Instant::now(),
            settled: false,
        }
    }

    /// Counters for `service`; zeroes if nothing was recorded.
    pub fn snapshot(&self, service: &str) -> HealthRecord {
        self.cells
            .get(service)
            .map(|c| c.to_record())
            .unwrap_or_default()
    }

    pub fn reset(&self, service: &str) {
        if let Some(cell) = self.cells.get(service) {
            cell.clear();
        }
    }

    pub fn reset_all(&self) {
        for cell in self.cells.iter() {
            cell.clear();
        }
    }

    /// Drop counters for services no longer present.
    pub fn retain<F: Fn(&str) -> bool>(&self, keep: F) {
        self.cells.retain(|name, _| keep(name));
    }
}

/// In-flight call timing; settle with [`succeed`](Self::succeed) or [`fail`](Self::fail).
#[must_use]
pub struct HealthTicket {
    cell: Arc<HealthCell>,
    started: Instant,
    settled: bool,
}

impl HealthTicket {
    pub fn succeed(mut self) {
        self.settle(true);
    }

    pub fn fail(mut self) {
        self.settle(false);
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.cell.record(success, self.started.elapsed());
    }
}

impl Drop for HealthTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(false);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    /// False while the circuit is open.
    pub available: bool,
    pub circuit: CircuitState,
    pub call_count: u64,
    pub error_count: u64,
    pub avg_response_time_ms: Option<f64>,
    pub error_rate: Option<f64>,
}

impl ServiceHealth {
    pub fn new(service: impl Into<String>, record: HealthRecord, circuit: CircuitState) -> Self {
        Self {
            service: service.into(),
            available: circuit != CircuitState::Open,
            circuit,
            call_count: record.call_count,
            error_count: record.error_count,
            avg_response_time_ms: record
                .avg_response_time()
                .map(|d| d.as_secs_f64() * 1_000.0),
            error_rate: record.error_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub error_rate_threshold: f64,
    pub services: Vec<ServiceHealth>,
}

impl HealthReport {
    /// Degraded iff some service's error rate exceeds `threshold`.
    pub fn new(services: Vec<ServiceHealth>, threshold: f64) -> Self {
        let degraded = services
            .iter()
            .any(|s| s.error_rate.map_or(false, |rate| rate > threshold));
        Self {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            error_rate_threshold: threshold,
            services,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn service(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.service == name)
    }
}
