//! Circuit breaker resilience layer wrapping broker sends/receives (C5/C6).

mod backoff;
mod behavior;
mod circuit_breaker;
mod metrics;

pub use backoff::backoff_delay;
pub use behavior::CircuitBreakerBehavior;
pub use circuit_breaker::CircuitBreaker;
pub use metrics::CircuitBreakerMetrics;

use serde::{Deserialize, Serialize};

/// The three states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}
