//! Circuit breaker implementation for preventing cascading failures
//!
//! One breaker guards one target (normally a `service_id`). The breaker
//! knows nothing about HTTP: it runs an async operation and inspects its
//! error.
//!
//! State reads for the fast path go through an atomic; every transition
//! and counter update happens under the breaker's mutex, which is never
//! held across an `.await`.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::CircuitState;
use crate::error::IntegrationError;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before trial calls are allowed
    #[serde(with = "duration_secs")]
    pub reset_timeout: Duration,

    /// Number of trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_call_count: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    /// Bumped on every entry into HALF_OPEN so late trial results from an
    /// earlier round are recognised
    half_open_epoch: u64,
}

/// Point-in-time view of a breaker, used for health reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_call_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub reset_timeout_secs: f64,
    pub half_open_max_calls: u32,
}

/// What the caller was admitted as; decides how the outcome is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    /// Trial call of the half-open round with this epoch
    Trial(u64),
}

/// Outcome recorder for one admitted call. A trial dropped before it
/// completes (caller timeout, cancelled task) is recorded as a failure so
/// its slot is never leaked.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.admission);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Admission::Trial(_) = self.admission {
            warn!(circuit = %self.breaker.name, "Trial call abandoned before completing");
            self.breaker.on_failure(self.admission);
        }
    }
}

/// Per-target failure isolation state machine
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    /// Mirror of `inner.state` for lock-free fast path reads
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_call_count: 0,
                opened_at: None,
                last_failure_time: None,
                half_open_epoch: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, read without taking the lock
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn half_open_call_count(&self) -> u32 {
        self.lock().half_open_call_count
    }

    /// Run `operation` through the breaker. Every error counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<IntegrationError>,
    {
        self.execute_with(operation, |_| true).await
    }

    /// Run `operation` through the breaker. Errors for which `is_failure`
    /// returns false are treated as proof the target is alive and recorded
    /// as successes.
    pub async fn execute_with<F, Fut, T, E, P>(&self, operation: F, is_failure: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<IntegrationError>,
        P: FnOnce(&E) -> bool,
    {
        let guard = AdmissionGuard {
            breaker: self,
            admission: self.try_acquire().map_err(E::from)?,
            settled: false,
        };

        let result = operation().await;
        match &result {
            Ok(_) => guard.success(),
            Err(err) if is_failure(err) => guard.failure(),
            Err(_) => guard.success(),
        }
        result
    }

    /// Force the breaker back to CLOSED
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        inner.failure_count = 0;
        inner.opened_at = None;
        self.transition(&mut inner, CircuitState::Closed);
        info!(circuit = %self.name, previous_state = %from, "Circuit manually reset to CLOSED");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_call_count: inner.half_open_call_count,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            reset_timeout_secs: self.config.reset_timeout.as_secs_f64(),
            half_open_max_calls: self.config.half_open_max_calls,
        }
    }

    /// Decide whether a call may proceed
    fn try_acquire(&self) -> Result<Admission, IntegrationError> {
        // Happy path: closed circuits never touch the lock on entry
        if self.state() == CircuitState::Closed {
            return Ok(Admission::Normal);
        }

        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed());
            match elapsed {
                Some(elapsed) if elapsed < self.config.reset_timeout => {
                    metrics::increment_counter!(
                        "integration_circuit_rejections_total",
                        "breaker" => self.name.clone()
                    );
                    debug!(
                        circuit = %self.name,
                        remaining_ms = %(self.config.reset_timeout - elapsed).as_millis(),
                        "Circuit open, request rejected"
                    );
                    return Err(IntegrationError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Some(self.config.reset_timeout - elapsed),
                    });
                }
                _ => {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    info!(
                        circuit = %self.name,
                        max_trial_calls = self.config.half_open_max_calls,
                        "Circuit HALF-OPEN: testing service recovery"
                    );
                }
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen if inner.half_open_call_count < self.config.half_open_max_calls => {
                inner.half_open_call_count += 1;
                Ok(Admission::Trial(inner.half_open_epoch))
            }
            _ => {
                metrics::increment_counter!(
                    "integration_circuit_rejections_total",
                    "breaker" => self.name.clone()
                );
                debug!(circuit = %self.name, "Half-open trial limit reached, request rejected");
                Err(IntegrationError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: None,
                })
            }
        }
    }

    /// Whether `admission` is a trial of the half-open round now in progress
    fn is_current_trial(inner: &BreakerInner, admission: Admission) -> bool {
        matches!(admission, Admission::Trial(epoch) if epoch == inner.half_open_epoch)
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if !Self::is_current_trial(&inner, admission) => {
                // Only the round's own trials decide the half-open outcome
                debug!(circuit = %self.name, ?admission, "Ignoring non-trial success while half-open");
            }
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
                info!(circuit = %self.name, "Circuit CLOSED: service recovered");
            }
            CircuitState::Open => {
                // A late result from a call admitted before the circuit reopened
                debug!(circuit = %self.name, ?admission, "Ignoring success while open");
            }
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Utc::now());
                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                    warn!(
                        circuit = %self.name,
                        failure_count = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit OPEN: failure threshold reached"
                    );
                }
            }
            CircuitState::HalfOpen if !Self::is_current_trial(&inner, admission) => {
                debug!(circuit = %self.name, ?admission, "Ignoring non-trial failure while half-open");
            }
            CircuitState::HalfOpen => {
                inner.last_failure_time = Some(Utc::now());
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
                warn!(circuit = %self.name, "Circuit REOPENED: trial call failed");
            }
            CircuitState::Open => {
                debug!(circuit = %self.name, ?admission, "Ignoring failure while open");
            }
        }
    }

    /// Apply a state change. Caller holds the lock.
    fn transition(&self, inner: &mut MutexGuard<'_, BreakerInner>, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        if from == CircuitState::HalfOpen || to == CircuitState::HalfOpen {
            inner.half_open_call_count = 0;
        }
        if to == CircuitState::HalfOpen {
            inner.half_open_epoch += 1;
        }
        if to == CircuitState::Closed {
            inner.failure_count = 0;
        }
        inner.state = to;
        self.state.store(to.as_u8(), Ordering::Release);

        metrics::increment_counter!(
            "integration_circuit_transitions_total",
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        );
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if secs.is_sign_negative() || !secs.is_finite() {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
