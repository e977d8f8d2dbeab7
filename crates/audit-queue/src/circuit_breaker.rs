//! Circuit Breaker (C5): CLOSED/OPEN/HALF_OPEN state machine that only
//! trips from CLOSED to OPEN once both a consecutive-failure threshold and
//! a minimum-throughput floor are crossed, so a handful of failures on a
//! cold breaker can't trip it prematurely.

use audit_core::error::Error;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub minimum_throughput: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_throughput: 10,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct CircuitState {
    state: BreakerState,
    consecutive_failures: u32,
    success_count: u64,
    failure_count: u64,
    total_requests: u64,
    opened_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    state_history: Vec<StateChange>,
    half_open_probes_in_flight: u32,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
            total_requests: 0,
            opened_at: None,
            last_state_change: Utc::now(),
            state_history: Vec::new(),
            half_open_probes_in_flight: 0,
        }
    }

    fn transition(&mut self, to: BreakerState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state_history.push(StateChange { from, to, at: Utc::now() });
        self.state = to;
        self.last_state_change = Utc::now();
        if to == BreakerState::Open {
            self.opened_at = Some(Utc::now());
        }
    }
}

/// A request-gating circuit breaker, shared across tasks via `Arc`.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, state: Arc::new(Mutex::new(CircuitState::new())) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call is currently permitted. Moves OPEN -> HALF_OPEN when
    /// `recoveryTimeout` has elapsed, admitting up to `half_open_max_probes`.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed_ready = state
                    .opened_at
                    .map(|opened| Utc::now() - opened >= chrono::Duration::from_std(self.config.recovery_timeout).unwrap_or_default())
                    .unwrap_or(false);

                if elapsed_ready {
                    state.transition(BreakerState::HalfOpen);
                    state.half_open_probes_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if state.half_open_probes_in_flight < self.config.half_open_max_probes {
                    state.half_open_probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.success_count += 1;
        state.consecutive_failures = 0;

        match state.state {
            BreakerState::HalfOpen => {
                state.half_open_probes_in_flight = 0;
                state.transition(BreakerState::Closed);
            }
            BreakerState::Open => {}
            BreakerState::Closed => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.failure_count += 1;
        state.consecutive_failures += 1;

        match state.state {
            BreakerState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold
                    && state.total_requests >= self.config.minimum_throughput as u64
                {
                    state.transition(BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                state.half_open_probes_in_flight = 0;
                state.transition(BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state.lock().state
    }

    pub fn failure_rate(&self) -> f64 {
        let state = self.state.lock();
        if state.total_requests == 0 {
            0.0
        } else {
            state.failure_count as f64 / state.total_requests as f64
        }
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let state = self.state.lock();
        CircuitMetrics {
            total_requests: state.total_requests,
            successes: state.success_count,
            failures: state.failure_count,
            failure_rate: if state.total_requests == 0 {
                0.0
            } else {
                state.failure_count as f64 / state.total_requests as f64
            },
            state: state.state,
            state_history: state.state_history.clone(),
        }
    }

    /// Gates `op` through the breaker: rejects with a non-retryable
    /// `Error::circuit_open` when the circuit is not allowing calls,
    /// otherwise records the outcome and propagates it.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.allow() {
            return Err(Error::circuit_open(self.name.clone()));
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_rate: f64,
    pub state: BreakerState,
    pub state_history: Vec<StateChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, min_throughput: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            minimum_throughput: min_throughput,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_probes: 1,
        }
    }

    #[test]
    fn minimum_throughput_guard_keeps_breaker_closed() {
        let breaker = CircuitBreaker::new("test", config(1, 5));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn consecutive_failures_past_threshold_and_throughput_opens_breaker() {
        let breaker = CircuitBreaker::new("test", config(3, 3));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn open_breaker_rejects_calls_immediately() {
        let breaker = CircuitBreaker::new("test", config(1, 1));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        let breaker = CircuitBreaker::new("test", config(1, 1));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_breaker() {
        let breaker = CircuitBreaker::new("test", config(1, 1));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn execute_returns_circuit_open_error_without_invoking_op() {
        let breaker = CircuitBreaker::new("test", config(1, 1));
        breaker.record_failure();

        let mut invoked = false;
        let result: Result<(), Error> = breaker
            .execute(|| async {
                invoked = true;
                Ok(())
            })
            .await;

        assert!(!invoked);
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_retryable());
    }
}
