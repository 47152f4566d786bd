//! Resilience patterns for service calls
//!
//! This module provides:
//! - A per-target circuit breaker
//! - A keyed registry so repeated calls to one target share a breaker
//!
//! No retry policy lives here: tripped breakers fail fast and retrying is
//! left to the caller.

mod circuit_breaker;
mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use registry::CircuitBreakerRegistry;

use serde::{Deserialize, Serialize};

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,

    /// Failing, requests rejected without being attempted
    Open,

    /// Testing recovery, a limited number of trial requests allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
