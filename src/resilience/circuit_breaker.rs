use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Time since the most recent failure, if any.
    pub last_failure_ago_ms: Option<u64>,
    pub since_transition_ms: u64,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Failures further apart than this do not accumulate.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the cooldown duration
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }
}

#[derive(Debug)]
struct State {
    circuit: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_transition: Instant,
    trial_in_flight: bool,
}

/// Per-service circuit breaker.
///
/// - CLOSED: calls pass; consecutive failures within the window trip it
/// - OPEN: calls are refused until the cooldown since opening has elapsed
/// - HALF_OPEN: a single trial call is admitted; its outcome closes or
///   re-opens the circuit
///
/// All transitions happen under the breaker's own mutex.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Refusal from an open circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Remaining cooldown; zero while a half-open trial is in flight.
    pub retry_in: Duration,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_transition: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned breaker still holds consistent counters
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, st: &mut State, to: CircuitState, now: Instant) {
        if st.circuit != to {
            info!(
                service = self.name.as_str(),
                from = ?st.circuit,
                to = ?to,
                consecutive_failures = st.consecutive_failures,
                "circuit state transition"
            );
        }
        st.circuit = to;
        st.last_transition = now;
    }

    /// Ask for admission of one call.
    ///
    /// The returned permit must be settled with [`BreakerPermit::succeed`] or
    /// [`BreakerPermit::fail`]; dropping it unsettled counts as a failure.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        let mut st = self.lock();
        let now = Instant::now();
        match st.circuit {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = now.duration_since(st.last_transition);
                if elapsed >= self.cfg.cooldown {
                    self.transition(&mut st, CircuitState::HalfOpen, now);
                    st.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(CircuitOpen {
                        retry_in: self.cfg.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if st.trial_in_flight {
                    Err(CircuitOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    st.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut st = self.lock();
        let now = Instant::now();
        if trial {
            st.trial_in_flight = false;
            st.consecutive_failures = 0;
            self.transition(&mut st, CircuitState::Closed, now);
        } else if st.circuit == CircuitState::Closed {
            st.consecutive_failures = 0;
        }
        // late successes from calls admitted before a trip leave OPEN/HALF_OPEN alone
    }

    fn on_failure(&self, trial: bool) {
        let mut st = self.lock();
        let now = Instant::now();
        let within_window = st
            .last_failure
            .map_or(false, |at| now.duration_since(at) <= self.cfg.failure_window);
        st.consecutive_failures = if within_window {
            st.consecutive_failures.saturating_add(1)
        } else {
            1
        };
        st.last_failure = Some(now);

        if trial {
            st.trial_in_flight = false;
            self.transition(&mut st, CircuitState::Open, now);
        } else if st.circuit == CircuitState::Closed
            && st.consecutive_failures >= self.cfg.failure_threshold
        {
            self.transition(&mut st, CircuitState::Open, now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().circuit
    }

    /// Force the circuit closed and clear counters.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.consecutive_failures = 0;
        st.last_failure = None;
        st.trial_in_flight = false;
        self.transition(&mut st, CircuitState::Closed, Instant::now());
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let since_transition = now.duration_since(st.last_transition);
        let open_remaining_ms = match st.circuit {
            CircuitState::Open if since_transition < self.cfg.cooldown => {
                Some((self.cfg.cooldown - since_transition).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.circuit,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            last_failure_ago_ms: st
                .last_failure
                .map(|at| now.duration_since(at).as_millis() as u64),
            since_transition_ms: since_transition.as_millis() as u64,
            open_remaining_ms,
        }
    }
}

/// Admission to call through a breaker.
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// This permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_millis(cooldown_ms)),
        )
    }

    fn fail_once(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().fail();
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.failure_window, Duration::from_secs(60));
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = breaker(5, 1000);
        assert_eq!(cb.state(), CircuitState::Closed);
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.open_remaining_ms.is_none());
        assert!(snapshot.last_failure_ago_ms.is_none());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(5, 1000);
        fail_once(&cb);
        fail_once(&cb);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_opens_at_exactly_threshold() {
        let cb = breaker(3, 10_000);
        fail_once(&cb);
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        let refused = cb.try_acquire().err().unwrap();
        assert!(refused.retry_in > Duration::ZERO);
        assert!(cb.snapshot().open_remaining_ms.is_some());
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let cb = breaker(1, 30);
        fail_once(&cb);
        thread::sleep(Duration::from_millis(40));

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());
        assert!(cb.try_acquire().is_err());

        trial.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_failed_trial_reopens_and_restarts_cooldown() {
        let cb = breaker(1, 30);
        fail_once(&cb);
        thread::sleep(Duration::from_millis(40));
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
        thread::sleep(Duration::from_millis(40));
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_dropped_trial_counts_as_failure() {
        let cb = breaker(1, 30);
        fail_once(&cb);
        thread::sleep(Duration::from_millis(40));
        {
            let _trial = cb.try_acquire().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let cb = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_failure_window(Duration::from_millis(20)),
        );
        fail_once(&cb);
        thread::sleep(Duration::from_millis(40));
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_late_success_does_not_close_open_circuit() {
        let cb = breaker(1, 10_000);
        let early = cb.try_acquire().unwrap();
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        early.succeed();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, 10_000);
        fail_once(&cb);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_no_lost_failure_counts_under_contention() {
        let cb = Arc::new(breaker(100, 10_000));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    cb.try_acquire().unwrap().fail();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().consecutive_failures, 50);
    }

    #[test]
    fn test_concurrent_half_open_single_winner() {
        let cb = Arc::new(breaker(1, 20));
        fail_once(&cb);
        thread::sleep(Duration::from_millis(30));

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match cb.try_acquire() {
                        Ok(permit) => {
                            // hold the trial until every thread has tried
                            thread::sleep(Duration::from_millis(50));
                            permit.succeed();
                            true
                        }
                        Err(_) => false,
                    }
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
