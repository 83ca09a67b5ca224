//! Concrete circuit breaker implementation backing broker sends/receives
//! and dispatcher calls (C5/C6). Closed → Open on `failure_threshold`
//! consecutive failures; Open → HalfOpen once `open_timeout` elapses;
//! HalfOpen → Closed on `success_threshold` consecutive successes, or
//! back to Open on any failure while half-open.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU64,
    consecutive_successes: AtomicU64,
    half_open_calls: AtomicU64,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_micros: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU64::new(0),
            consecutive_successes: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_micros: AtomicU64::new(0),
        }
    }

    fn open(&self) {
        *self.state.lock().expect("circuit breaker state mutex poisoned") = CircuitState::Open;
        *self.opened_at.lock().expect("circuit breaker opened_at mutex poisoned") = Some(Instant::now());
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.half_open_calls.store(0, Ordering::SeqCst);
    }

    fn half_open(&self) {
        *self.state.lock().expect("circuit breaker state mutex poisoned") = CircuitState::HalfOpen;
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.half_open_calls.store(0, Ordering::SeqCst);
    }

    fn close(&self) {
        *self.state.lock().expect("circuit breaker state mutex poisoned") = CircuitState::Closed;
        *self.opened_at.lock().expect("circuit breaker opened_at mutex poisoned") = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        *self.state.lock().expect("circuit breaker state mutex poisoned")
    }

    fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .expect("circuit breaker opened_at mutex poisoned")
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.settings.open_timeout() {
                    self.half_open();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.success_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        if self.state() == CircuitState::HalfOpen {
            let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
            self.half_open_calls.fetch_add(1, Ordering::SeqCst);
            if successes >= self.settings.success_threshold as u64 {
                self.close();
            }
        }
    }

    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.failure_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);

        match self.state() {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.settings.failure_threshold as u64 {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn force_open(&self) {
        self.open();
    }

    fn force_closed(&self) {
        self.close();
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::SeqCst);
        let success_count = self.success_count.load(Ordering::SeqCst);
        let failure_count = self.failure_count.load(Ordering::SeqCst);
        let total_duration = Duration::from_micros(self.total_duration_micros.load(Ordering::SeqCst));

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            half_open_calls: self.half_open_calls.load(Ordering::SeqCst),
            total_duration,
            current_state: self.state(),
            failure_rate: if total_calls == 0 {
                0.0
            } else {
                failure_count as f64 / total_calls as f64
            },
            success_rate: if total_calls == 0 {
                0.0
            } else {
                success_count as f64 / total_calls as f64
            },
            average_duration: if total_calls == 0 {
                Duration::ZERO
            } else {
                total_duration / total_calls as u32
            },
        }
    }
}
