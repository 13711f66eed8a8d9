//! Graceful degradation coordinator
//!
//! [`DegradationCoordinator::execute_with_fallback`] walks a fixed chain and
//! stops at the first step that yields a value:
//!
//! 1. cache, when the request names a `cache_key` holding an unexpired entry
//! 2. primary, under the request timeout (optionally behind a circuit breaker
//!    and inside an adaptive retry loop); a success is cached when a key is set
//! 3. secondary, under a fraction of the primary timeout; never cached
//! 4. static fallback value
//!
//! Behind a breaker the primary deadline is the shorter of the request
//! timeout and the breaker's own `timeout`; the secondary deadline is always
//! derived from the request timeout.
//!
//! If nothing yields a value the primary's error is returned. The step that
//! answered is reported as [`ResponseSource`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::cache::{CacheStats, DegradationCache};
use super::circuit_breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::retry::AdaptiveRetryScheduler;
use super::timeout::TimeoutWrapper;
use crate::error::ErrorClassification;
use crate::utils::duration_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Primary deadline when the request sets none
    #[serde(with = "duration_millis")]
    pub default_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub default_cache_ttl: Duration,
    /// Secondary deadline as a fraction of the primary one
    pub secondary_timeout_factor: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_cache_ttl: Duration::from_secs(5 * 60),
            secondary_timeout_factor: 0.5,
        }
    }
}

impl DegradationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::invalid("default_timeout must be greater than 0"));
        }
        if self.default_cache_ttl.is_zero() {
            return Err(ConfigError::invalid("default_cache_ttl must be greater than 0"));
        }
        if !self.secondary_timeout_factor.is_finite()
            || self.secondary_timeout_factor <= 0.0
            || self.secondary_timeout_factor > 1.0
        {
            return Err(ConfigError::invalid("secondary_timeout_factor must be in (0, 1]"));
        }
        Ok(())
    }
}

/// Which step of the chain produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Primary,
    Secondary,
    Static,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradedResponse<V> {
    pub value: V,
    pub source: ResponseSource,
    /// Primary failure that forced a fallback
    pub primary_error: Option<String>,
}

impl<V> DegradedResponse<V> {
    /// Answered by a secondary or static fallback
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, ResponseSource::Secondary | ResponseSource::Static)
    }
}

type OperationFn<'a, V, E> = Box<dyn Fn() -> BoxFuture<'a, Result<V, E>> + Send + Sync + 'a>;

fn boxed_operation<'a, F, Fut, V, E>(operation: F) -> OperationFn<'a, V, E>
where
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<V, E>> + Send + 'a,
{
    Box::new(move || operation().boxed())
}

struct RetrySpec<C: Clock> {
    scheduler: Arc<AdaptiveRetryScheduler<C>>,
    operation: String,
    max_attempts: Option<u32>,
}

/// One call through the fallback chain
pub struct FallbackRequest<'a, V, E, C: Clock = SystemClock> {
    name: String,
    primary: OperationFn<'a, V, E>,
    secondary: Option<OperationFn<'a, V, E>>,
    static_fallback: Option<V>,
    timeout: Option<Duration>,
    cache_key: Option<String>,
    cache_ttl: Option<Duration>,
    cancel: Option<CancellationToken>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    retry: Option<RetrySpec<C>>,
}

impl<V, E, C: Clock> fmt::Debug for FallbackRequest<'_, V, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRequest")
            .field("name", &self.name)
            .field("secondary", &self.secondary.is_some())
            .field("static_fallback", &self.static_fallback.is_some())
            .field("timeout", &self.timeout)
            .field("cache_key", &self.cache_key)
            .field("cache_ttl", &self.cache_ttl)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .field("retry", &self.retry.as_ref().map(|r| r.operation.clone()))
            .finish()
    }
}

impl<'a, V, E, C: Clock> FallbackRequest<'a, V, E, C> {
    pub fn new<F, Fut>(name: impl Into<String>, primary: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<V, E>> + Send + 'a,
    {
        Self {
            name: name.into(),
            primary: boxed_operation(primary),
            secondary: None,
            static_fallback: None,
            timeout: None,
            cache_key: None,
            cache_ttl: None,
            cancel: None,
            breaker: None,
            retry: None,
        }
    }

    pub fn secondary<F, Fut>(mut self, secondary: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<V, E>> + Send + 'a,
    {
        self.secondary = Some(boxed_operation(secondary));
        self
    }

    pub fn static_fallback(mut self, value: V) -> Self {
        self.static_fallback = Some(value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serve from and store primary results under `key`
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Guard the primary with `breaker`
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker<C>>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Retry the primary through `scheduler`, learning under `operation`
    pub fn retry(
        mut self,
        scheduler: Arc<AdaptiveRetryScheduler<C>>,
        operation: impl Into<String>,
        max_attempts: Option<u32>,
    ) -> Self {
        self.retry = Some(RetrySpec { scheduler, operation: operation.into(), max_attempts });
        self
    }
}

/// Per-outcome counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DegradationStats {
    pub cache_hits: u64,
    pub primary_successes: u64,
    pub secondary_successes: u64,
    pub static_fallbacks: u64,
    pub failures: u64,
    pub cancelled: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    primary_successes: AtomicU64,
    secondary_successes: AtomicU64,
    static_fallbacks: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
}

pub struct DegradationCoordinator<V, C: Clock = SystemClock> {
    config: DegradationConfig,
    cache: DegradationCache<V, C>,
    counters: Counters,
}

impl<V, C: Clock> fmt::Debug for DegradationCoordinator<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationCoordinator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<V: Clone> DegradationCoordinator<V, SystemClock> {
    pub fn new(config: DegradationConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<V: Clone, C: Clock> DegradationCoordinator<V, C> {
    pub fn with_clock(config: DegradationConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config, clock))
    }

    pub(crate) fn from_validated(config: DegradationConfig, clock: C) -> Self {
        Self { config, cache: DegradationCache::with_clock(clock), counters: Counters::default() }
    }

    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    pub fn cache(&self) -> &DegradationCache<V, C> {
        &self.cache
    }

    pub fn invalidate(&self, key: &str) -> Option<V> {
        self.cache.remove(key)
    }

    /// Walk cache, primary, secondary and static fallback in that order
    ///
    /// Cancellation stops the chain: a cancelled primary returns
    /// [`ResilienceError::Cancelled`] without trying any fallback.
    #[instrument(skip(self, request), fields(operation = %request.name))]
    pub async fn execute_with_fallback<'a, E>(
        &self,
        request: FallbackRequest<'a, V, E, C>,
    ) -> Result<DegradedResponse<V>, ResilienceError<E>>
    where
        V: Send + 'a,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        if let Some(key) = request.cache_key.as_deref() {
            if let Some(value) = self.cache.get(key) {
                debug!(cache_key = key, "serving cached response");
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(DegradedResponse { value, source: ResponseSource::Cache, primary_error: None });
            }
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let primary_error = match self.run_primary(&request, timeout).await {
            Ok(value) => {
                if let Some(key) = request.cache_key.as_deref() {
                    let ttl = request.cache_ttl.unwrap_or(self.config.default_cache_ttl);
                    self.cache.insert(key, value.clone(), ttl);
                }
                self.counters.primary_successes.fetch_add(1, Ordering::Relaxed);
                return Ok(DegradedResponse { value, source: ResponseSource::Primary, primary_error: None });
            }
            Err(e) if e.is_cancelled() => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            Err(e) => e,
        };
        debug!(error = %primary_error, "primary failed, degrading");

        if let Some(secondary) = &request.secondary {
            let secondary_timeout = timeout.mul_f64(self.config.secondary_timeout_factor);
            let result = TimeoutWrapper::new(format!("{}.secondary", request.name), secondary_timeout)
                .cancel_on(request.cancel.as_ref())
                .execute(secondary())
                .await;
            match result {
                Ok(value) => {
                    info!(primary_error = %primary_error, "served by secondary");
                    self.counters.secondary_successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(DegradedResponse {
                        value,
                        source: ResponseSource::Secondary,
                        primary_error: Some(primary_error.to_string()),
                    });
                }
                Err(e) if e.is_cancelled() => {
                    self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => debug!(error = %e, "secondary failed"),
            }
        }

        if let Some(value) = request.static_fallback {
            warn!(primary_error = %primary_error, "serving static fallback, response degraded");
            self.counters.static_fallbacks.fetch_add(1, Ordering::Relaxed);
            return Ok(DegradedResponse {
                value,
                source: ResponseSource::Static,
                primary_error: Some(primary_error.to_string()),
            });
        }

        warn!(error = %primary_error, "all fallbacks exhausted");
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        Err(primary_error)
    }

    async fn run_primary<'a, E>(
        &self,
        request: &FallbackRequest<'a, V, E, C>,
        timeout: Duration,
    ) -> ResilienceResult<V, E>
    where
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let name = request.name.as_str();
        let primary = &request.primary;
        let cancel = request.cancel.as_ref();
        let breaker = request.breaker.as_deref();

        match &request.retry {
            Some(retry) => {
                retry
                    .scheduler
                    .execute(&retry.operation, retry.max_attempts, || {
                        primary_attempt(name, primary, timeout, cancel, breaker)
                    })
                    .await
            }
            None => primary_attempt(name, primary, timeout, cancel, breaker).await,
        }
    }

    pub fn stats(&self) -> DegradationStats {
        DegradationStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            primary_successes: self.counters.primary_successes.load(Ordering::Relaxed),
            secondary_successes: self.counters.secondary_successes.load(Ordering::Relaxed),
            static_fallbacks: self.counters.static_fallbacks.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }
}

async fn primary_attempt<V, E, C: Clock>(
    name: &str,
    primary: &OperationFn<'_, V, E>,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
    breaker: Option<&CircuitBreaker<C>>,
) -> ResilienceResult<V, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match breaker {
        Some(breaker) => {
            let deadline = timeout.min(breaker.config().timeout);
            breaker.execute_within(deadline, cancel, || primary()).await
        }
        None => TimeoutWrapper::new(name, timeout).cancel_on(cancel).execute(primary()).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::CommonError;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::resilience::clock::MockClock;
    use crate::resilience::retry::AdaptiveRetryConfig;

    type Request<'a> = FallbackRequest<'a, String, CommonError, MockClock>;
    type TestOp = Box<dyn Fn() -> BoxFuture<'static, Result<String, CommonError>> + Send + Sync>;

    fn coordinator() -> (DegradationCoordinator<String, MockClock>, MockClock) {
        let clock = MockClock::new();
        let coordinator = DegradationCoordinator::with_clock(DegradationConfig::default(), clock.clone())
            .expect("default config is valid");
        (coordinator, clock)
    }

    fn counting_ok(calls: &Arc<AtomicUsize>, value: &'static str) -> TestOp {
        let calls = calls.clone();
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value.to_string()) }.boxed()
        })
    }

    fn counting_err(calls: &Arc<AtomicUsize>, service: &'static str) -> TestOp {
        let calls = calls.clone();
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(CommonError::network(service, "connection reset")) }.boxed()
        })
    }

    #[test]
    fn test_config_validation() {
        assert!(DegradationConfig::default().validate().is_ok());
        let bad = DegradationConfig { secondary_timeout_factor: 1.5, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = DegradationConfig { default_timeout: Duration::ZERO, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    /// Validates that a cached entry short-circuits the chain.
    ///
    /// Assertions:
    /// - The first call runs the primary and caches its value.
    /// - The second call is served from cache without invoking the primary.
    /// - Once the TTL elapses the primary runs again.
    #[tokio::test]
    async fn test_cache_hit_skips_primary() {
        let (coordinator, clock) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let request = || {
            Request::new("quote", counting_ok(&calls, "fresh"))
                .cache_key("quote:42")
                .cache_ttl(Duration::from_secs(60))
        };

        let first = coordinator.execute_with_fallback(request()).await.unwrap();
        assert_eq!(first.source, ResponseSource::Primary);

        let second = coordinator.execute_with_fallback(request()).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.value, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        let third = coordinator.execute_with_fallback(request()).await.unwrap();
        assert_eq!(third.source, ResponseSource::Primary);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_secondary_result_not_cached() {
        let (coordinator, _clock) = coordinator();
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let secondary_calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .execute_with_fallback(
                Request::new("quote", counting_err(&primary_calls, "llm"))
                    .secondary(counting_ok(&secondary_calls, "backup"))
                    .cache_key("quote:7"),
            )
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Secondary);
        assert_eq!(response.value, "backup");
        assert!(response.is_degraded());
        assert!(response.primary_error.as_deref().unwrap().contains("connection reset"));
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_static_fallback() {
        let (coordinator, _clock) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .execute_with_fallback(
                Request::new("quote", counting_err(&calls, "llm"))
                    .secondary(counting_err(&calls, "backup"))
                    .static_fallback("default advice".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Static);
        assert_eq!(response.value, "default advice");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.stats().static_fallbacks, 1);
    }

    /// Validates that total failure surfaces the primary's error.
    ///
    /// Assertions:
    /// - The secondary's error is discarded.
    /// - The failure counter is incremented.
    #[tokio::test]
    async fn test_all_fail_returns_primary_error() {
        let (coordinator, _clock) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator
            .execute_with_fallback(
                Request::new("quote", counting_err(&calls, "primary-llm"))
                    .secondary(counting_err(&calls, "secondary-llm")),
            )
            .await
            .unwrap_err();

        match err.operation_error() {
            Some(CommonError::Network { service, .. }) => assert_eq!(service, "primary-llm"),
            other => panic!("expected primary network error, got {other:?}"),
        }
        assert_eq!(coordinator.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_timeout_then_secondary_deadline_halved() {
        let (coordinator, _clock) = coordinator();

        let response = coordinator
            .execute_with_fallback(
                Request::new("slow", || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, CommonError>("late".to_string())
                })
                .timeout(Duration::from_millis(1000))
                // Fits the 1000 ms primary deadline but not the 500 ms secondary one.
                .secondary(|| async {
                    tokio::time::sleep(Duration::from_millis(700)).await;
                    Ok::<_, CommonError>("secondary".to_string())
                })
                .static_fallback("static".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Static);
        assert!(response.primary_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_skips_fallbacks() {
        let (coordinator, _clock) = coordinator();
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator
            .execute_with_fallback(
                Request::new("quote", || std::future::pending::<Result<String, CommonError>>())
                    .secondary(counting_ok(&calls, "backup"))
                    .static_fallback("static".to_string())
                    .cancel_on(&token),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_degrades_without_calling_primary() {
        let (coordinator, clock) = coordinator();
        let config = CircuitBreakerConfig { failure_threshold: 1, ..Default::default() };
        let breaker = Arc::new(CircuitBreaker::with_clock("llm", config, clock.clone()).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coordinator
            .execute_with_fallback(
                Request::new("quote", counting_err(&calls, "llm"))
                    .breaker(breaker.clone())
                    .static_fallback("static".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(first.source, ResponseSource::Static);
        assert_eq!(breaker.state(), CircuitState::Open);

        let second = coordinator
            .execute_with_fallback(
                Request::new("quote", counting_err(&calls, "llm"))
                    .breaker(breaker.clone())
                    .static_fallback("static".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(second.source, ResponseSource::Static);
        assert!(second.primary_error.as_deref().unwrap().contains("open"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates the primary deadline behind a breaker.
    ///
    /// Assertions:
    /// - A breaker timeout shorter than the request timeout cuts the call.
    /// - A request timeout shorter than the breaker timeout still wins.
    #[tokio::test(start_paused = true)]
    async fn test_breaker_timeout_caps_primary_deadline() {
        let (coordinator, clock) = coordinator();
        let config = CircuitBreakerConfig {
            timeout: Duration::from_millis(100),
            failure_threshold: 10,
            ..Default::default()
        };
        let breaker = Arc::new(CircuitBreaker::with_clock("llm", config, clock).unwrap());
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, CommonError>("late".to_string())
        };

        let err = coordinator
            .execute_with_fallback(
                Request::new("quote", slow).breaker(breaker.clone()).timeout(Duration::from_secs(30)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { timeout, .. } if timeout == Duration::from_millis(100)));

        let err = coordinator
            .execute_with_fallback(
                Request::new("quote", slow).breaker(breaker).timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { timeout, .. } if timeout == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_retried_through_scheduler() {
        let (coordinator, clock) = coordinator();
        let scheduler = Arc::new(
            AdaptiveRetryScheduler::with_clock(
                AdaptiveRetryConfig { base_delay: Duration::from_millis(10), ..Default::default() },
                clock,
            )
            .unwrap(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let response = coordinator
            .execute_with_fallback(
                Request::new("quote", move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(CommonError::network("llm", "reset"))
                        } else {
                            Ok("third time".to_string())
                        }
                    }
                })
                .retry(scheduler.clone(), "llm.quote", Some(3)),
            )
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Primary);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.get_stats().total_attempts, 3);
    }
}
