//! Per-dependency circuit breaker
//!
//! A three-state machine guarding calls to one external dependency:
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────▶ OPEN
//!     ▲                                        │ now >= next_attempt_at
//!     │ successes >= success_threshold         ▼ (on the next call)
//!     └────────────────────────────────── HALF_OPEN
//!                                              │ any failure
//!                                              └────────▶ OPEN
//! ```
//!
//! Every admitted call runs under the breaker's deadline (see
//! [`TimeoutWrapper`]); a timeout is a failure, an external cancellation is
//! neither success nor failure. While OPEN, calls are rejected with
//! [`ResilienceError::CircuitOpen`] without invoking the operation.
//!
//! All mutable state sits behind one `parking_lot::Mutex` per breaker, so
//! concurrent failures racing past the threshold open the circuit exactly
//! once. Each transition bumps a generation counter; outcomes of calls
//! admitted under an older generation update the cumulative totals but never
//! drive a transition.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::timeout::TimeoutWrapper;
use crate::utils::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// What a success does to the failure count while CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Decrement the failure count, floor 0
    #[default]
    Decay,
    /// Clear the failure count
    Reset,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of successes needed to close the circuit from half-open
    pub success_threshold: u32,
    /// Deadline applied to every admitted call
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,
    /// Maximum number of concurrent trial calls in half-open state
    pub half_open_max_calls: u32,
    pub success_policy: SuccessPolicy,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            success_policy: SuccessPolicy::Decay,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.config.reset_timeout = reset_timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn success_policy(mut self, policy: SuccessPolicy) -> Self {
        self.config.success_policy = policy;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker, safe to serialize
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Failures counted toward the threshold in the current state
    pub failure_count: u32,
    /// Successes counted toward closing from half-open
    pub success_count: u32,
    pub request_count: u64,
    pub rejected_count: u64,
    pub cancelled_count: u64,
    pub timeout_count: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Only set while OPEN
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    next_attempt_at: Option<Instant>,
    next_attempt_time: Option<DateTime<Utc>>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    request_count: u64,
    rejected_count: u64,
    cancelled_count: u64,
    timeout_count: u64,
    total_failures: u64,
    total_successes: u64,
    state_changed_at: DateTime<Utc>,
}

impl BreakerInner {
    fn new(generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            generation,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            next_attempt_at: None,
            next_attempt_time: None,
            last_failure_time: None,
            last_success_time: None,
            request_count: 0,
            rejected_count: 0,
            cancelled_count: 0,
            timeout_count: 0,
            total_failures: 0,
            total_successes: 0,
            state_changed_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Success,
    Failure { timed_out: bool },
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    half_open: bool,
}

/// Releases an admitted call; a guard dropped before completion counts as
/// cancelled so half-open trial slots are never leaked.
struct PermitGuard<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    permit: Option<Permit>,
}

impl<C: Clock> PermitGuard<'_, C> {
    fn complete(mut self, outcome: CallOutcome) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, outcome);
        }
    }
}

impl<C: Clock> Drop for PermitGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, CallOutcome::Cancelled);
        }
    }
}

/// Circuit breaker guarding one named dependency
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name, config, clock))
    }

    /// Construct from a configuration that already passed `validate()`
    pub(crate) fn from_validated(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        let inner = BreakerInner::new(0, clock.now_utc());
        Self { name: name.into(), config, inner: Mutex::new(inner), clock }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker with its configured deadline
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_within(self.config.timeout, None, operation).await
    }

    /// Like [`execute`](Self::execute), aborting when `cancel` fires
    pub async fn execute_with_cancel<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_within(self.config.timeout, Some(cancel), operation).await
    }

    /// Run `operation` under the breaker with an explicit deadline
    #[instrument(skip(self, cancel, operation), fields(breaker = %self.name))]
    pub async fn execute_within<F, Fut, T, E>(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                debug!(
                    breaker = %self.name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "circuit breaker rejecting call"
                );
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after,
                    at: self.clock.now_utc(),
                });
            }
        };
        let guard = PermitGuard { breaker: self, permit: Some(permit) };

        let result = TimeoutWrapper::new(self.name.as_str(), timeout)
            .cancel_on(cancel)
            .execute(operation())
            .await;

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) if e.is_cancelled() => CallOutcome::Cancelled,
            Err(e) => CallOutcome::Failure { timed_out: e.is_timeout() },
        };
        guard.complete(outcome);
        result
    }

    /// Admit or reject one call
    ///
    /// Returns the remaining wait on rejection.
    fn try_acquire(&self) -> Result<Permit, Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.request_count += 1;

        if inner.state == CircuitState::Open {
            match inner.next_attempt_at {
                Some(at) if now < at => {
                    inner.rejected_count += 1;
                    return Err(at - now);
                }
                _ => self.transition(&mut inner, CircuitState::HalfOpen),
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.rejected_count += 1;
                return Err(Duration::ZERO);
            }
            inner.half_open_in_flight += 1;
            return Ok(Permit { generation: inner.generation, half_open: true });
        }

        Ok(Permit { generation: inner.generation, half_open: false })
    }

    fn record(&self, permit: Permit, outcome: CallOutcome) {
        let now_utc = self.clock.now_utc();
        let mut inner = self.inner.lock();
        let current = permit.generation == inner.generation;

        if permit.half_open && current {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            CallOutcome::Cancelled => {
                inner.cancelled_count += 1;
            }
            CallOutcome::Success => {
                inner.total_successes += 1;
                inner.last_success_time = Some(now_utc);
                if !current {
                    return;
                }
                match inner.state {
                    CircuitState::Closed => match self.config.success_policy {
                        SuccessPolicy::Decay => {
                            inner.failure_count = inner.failure_count.saturating_sub(1);
                        }
                        SuccessPolicy::Reset => inner.failure_count = 0,
                    },
                    CircuitState::HalfOpen => {
                        inner.success_count += 1;
                        if inner.success_count >= self.config.success_threshold {
                            self.transition(&mut inner, CircuitState::Closed);
                        }
                    }
                    CircuitState::Open => {}
                }
            }
            CallOutcome::Failure { timed_out } => {
                inner.total_failures += 1;
                if timed_out {
                    inner.timeout_count += 1;
                }
                inner.last_failure_time = Some(now_utc);
                if !current {
                    return;
                }
                match inner.state {
                    CircuitState::Closed => {
                        inner.failure_count += 1;
                        if inner.failure_count >= self.config.failure_threshold {
                            self.transition(&mut inner, CircuitState::Open);
                        }
                    }
                    CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
                    // Already open; keep the scheduled retry time.
                    CircuitState::Open => {}
                }
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        let failures = inner.failure_count;
        let now_utc = self.clock.now_utc();

        inner.state = to;
        inner.generation += 1;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.state_changed_at = now_utc;

        if to == CircuitState::Open {
            let reset = self.config.reset_timeout;
            inner.next_attempt_at = Some(self.clock.now() + reset);
            inner.next_attempt_time = chrono::Duration::from_std(reset)
                .ok()
                .and_then(|reset| now_utc.checked_add_signed(reset));
            warn!(
                breaker = %self.name,
                from = %from,
                failures,
                reset_timeout_ms = reset.as_millis() as u64,
                "circuit breaker opened"
            );
        } else {
            inner.next_attempt_at = None;
            inner.next_attempt_time = None;
            info!(breaker = %self.name, from = %from, to = %to, "circuit breaker state changed");
        }
    }

    /// Current state, without triggering the OPEN to HALF_OPEN transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the breaker; has no side effects
    pub fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            request_count: inner.request_count,
            rejected_count: inner.rejected_count,
            cancelled_count: inner.cancelled_count,
            timeout_count: inner.timeout_count,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt_time: inner.next_attempt_time,
            state_changed_at: inner.state_changed_at,
        }
    }

    /// Return to a fresh CLOSED breaker, clearing every counter
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        *inner = BreakerInner::new(generation, self.clock.now_utc());
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Open the circuit now, scheduling the next attempt after `reset_timeout`
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
    }
}
