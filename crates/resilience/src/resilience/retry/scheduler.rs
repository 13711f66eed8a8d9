//! Adaptive retry scheduler
//!
//! Runs an operation up to `max_retries` total attempts. Between attempts it
//! sleeps `base × multiplier^(n-1)` after the n-th failure, where `base` is the
//! configured default until the `(operation, category)` pattern has seen more
//! than `min_samples` attempts, and the pattern's learned best delay after
//! that. Rate-limit and timeout categories scale the delay; jitter and the
//! `max_delay` cap apply last.
//!
//! Every attempt is recorded. A failed attempt is filed under its own error
//! category; a success is filed under the category of the failure it
//! recovered from (`None` for a first-attempt success), which is how the
//! scheduler learns which delays actually work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backoff::ExponentialBackoff;
use super::pattern::{PatternEntry, PatternKey, RetryAttempt, RetryPattern};
use super::policy::{ClassifiedRetry, RetryDecision, RetryPolicy};
use crate::error::{ErrorCategory, ErrorClassification};
use crate::resilience::clock::{Clock, SystemClock};
use crate::resilience::error::{ConfigError, ConfigResult};
use crate::utils::duration_millis;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for [`AdaptiveRetryScheduler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveRetryConfig {
    /// Total attempts, the first call included
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub jitter: bool,
    /// Attempts a pattern needs before its learned delay replaces `base_delay`
    pub min_samples: u64,
    /// Attempt records kept per pattern
    pub history_capacity: usize,
    /// Patterns idle for longer than this are evicted by `cleanup()`
    #[serde(with = "duration_millis")]
    pub pattern_retention: Duration,
    pub rate_limit_multiplier: f64,
    pub timeout_multiplier: f64,
}

impl Default for AdaptiveRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            min_samples: 10,
            history_capacity: 100,
            pattern_retention: Duration::from_secs(7 * SECONDS_PER_DAY),
            rate_limit_multiplier: 2.0,
            timeout_multiplier: 0.5,
        }
    }
}

impl AdaptiveRetryConfig {
    pub fn builder() -> AdaptiveRetryConfigBuilder {
        AdaptiveRetryConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries must be at least 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be >= 1.0"));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay must not exceed max_delay"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid("history_capacity must be greater than 0"));
        }
        let positive = |m: f64| m.is_finite() && m > 0.0;
        if !positive(self.rate_limit_multiplier) || !positive(self.timeout_multiplier) {
            return Err(ConfigError::invalid("category multipliers must be positive"));
        }
        Ok(())
    }

    fn category_factor(&self, category: ErrorCategory) -> f64 {
        match category {
            ErrorCategory::RateLimit => self.rate_limit_multiplier,
            ErrorCategory::Timeout => self.timeout_multiplier,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct AdaptiveRetryConfigBuilder {
    config: AdaptiveRetryConfig,
}

impl AdaptiveRetryConfigBuilder {
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    pub fn min_samples(mut self, samples: u64) -> Self {
        self.config.min_samples = samples;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    pub fn pattern_retention(mut self, retention: Duration) -> Self {
        self.config.pattern_retention = retention;
        self
    }

    pub fn build(self) -> ConfigResult<AdaptiveRetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Outcome of a retry execution including result and summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
    /// Category of the last failure, `None` if no attempt failed
    pub last_category: ErrorCategory,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    /// Average delay between attempts
    pub fn average_delay(&self) -> Duration {
        if self.attempts <= 1 {
            return Duration::ZERO;
        }
        self.total_delay / (self.attempts - 1)
    }
}

/// Serializable snapshot of every learned pattern
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrySchedulerStats {
    pub pattern_count: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    /// Sorted by operation, then category
    pub patterns: Vec<RetryPattern>,
}

/// Suggested settings for one operation, weighted by attempts per pattern
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryRecommendation {
    pub operation: String,
    pub suggested_max_retries: u32,
    #[serde(with = "duration_millis")]
    pub suggested_base_delay: Duration,
    pub success_rate: f64,
    pub sample_size: u64,
}

pub struct AdaptiveRetryScheduler<C: Clock = SystemClock> {
    config: AdaptiveRetryConfig,
    patterns: DashMap<PatternKey, Arc<Mutex<PatternEntry>>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for AdaptiveRetryScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveRetryScheduler")
            .field("config", &self.config)
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

impl AdaptiveRetryScheduler<SystemClock> {
    pub fn new(config: AdaptiveRetryConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> AdaptiveRetryScheduler<C> {
    pub fn with_clock(config: AdaptiveRetryConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, patterns: DashMap::new(), clock })
    }

    pub fn config(&self) -> &AdaptiveRetryConfig {
        &self.config
    }

    /// Run `operation` with classified retries; returns the last error once
    /// attempts are exhausted
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        max_retries: Option<u32>,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        self.execute_with_outcome(operation_name, max_retries, operation).await.into_result()
    }

    /// Like [`execute`](Self::execute) with a caller-supplied policy
    pub async fn execute_with_policy<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        max_retries: Option<u32>,
        policy: &P,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
        P: RetryPolicy<E>,
    {
        self.run(operation_name, max_retries, policy, operation).await.into_result()
    }

    /// Like [`execute`](Self::execute), also reporting attempts and delays
    pub async fn execute_with_outcome<F, Fut, T, E>(
        &self,
        operation_name: &str,
        max_retries: Option<u32>,
        operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        self.run(operation_name, max_retries, &ClassifiedRetry, operation).await
    }

    #[instrument(skip(self, operation_name, policy, operation), fields(operation = %operation_name))]
    async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        max_retries: Option<u32>,
        policy: &P,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
        P: RetryPolicy<E>,
    {
        let max_attempts = max_retries.unwrap_or(self.config.max_retries).max(1);
        let mut attempt = 0;
        let mut delay_before = Duration::ZERO;
        let mut total_delay = Duration::ZERO;
        let mut last_category = ErrorCategory::None;

        loop {
            attempt += 1;
            debug!(operation = %operation_name, attempt, max_attempts, "executing attempt");

            let error = match operation().await {
                Ok(value) => {
                    self.record_attempt(operation_name, last_category, attempt, None, delay_before, true);
                    self.finish_sequence(operation_name, last_category, attempt);
                    if attempt > 1 {
                        info!(
                            operation = %operation_name,
                            attempts = attempt,
                            total_delay_ms = total_delay.as_millis() as u64,
                            "operation succeeded after retries"
                        );
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay, last_category };
                }
                Err(error) => error,
            };

            let category = error.category();
            last_category = category;
            self.record_attempt(
                operation_name,
                category,
                attempt,
                Some(error.to_string()),
                delay_before,
                false,
            );

            if attempt >= max_attempts {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    category = %category,
                    error = %error,
                    "retry attempts exhausted"
                );
                self.finish_sequence(operation_name, category, attempt);
                return RetryOutcome { result: Err(error), attempts: attempt, total_delay, last_category };
            }

            let delay = match policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(operation = %operation_name, attempt, error = %error, "error is not retryable");
                    self.finish_sequence(operation_name, category, attempt);
                    return RetryOutcome { result: Err(error), attempts: attempt, total_delay, last_category };
                }
                RetryDecision::Retry => self.compute_delay(operation_name, category, attempt),
                RetryDecision::RetryAfter(delay) => delay,
            };

            warn!(
                operation = %operation_name,
                attempt,
                category = %category,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;
            delay_before = delay;
        }
    }

    /// Delay to sleep after the `failed_attempt`-th failure in `category`
    pub fn compute_delay(&self, operation_name: &str, category: ErrorCategory, failed_attempt: u32) -> Duration {
        let key = PatternKey::new(operation_name, category);
        let entry = self.patterns.get(&key).map(|entry| Arc::clone(entry.value()));
        let learned = match entry {
            Some(entry) => {
                let learned = entry.lock().learned_delay(self.config.min_samples);
                learned
            }
            None => None,
        };

        let backoff = ExponentialBackoff {
            base_delay: learned.unwrap_or(self.config.base_delay),
            multiplier: self.config.backoff_multiplier,
            max_delay: self.config.max_delay,
            jitter: self.config.jitter,
        };
        backoff.delay(failed_attempt, self.config.category_factor(category))
    }

    fn entry(&self, operation_name: &str, category: ErrorCategory) -> Arc<Mutex<PatternEntry>> {
        let key = PatternKey::new(operation_name, category);
        if let Some(entry) = self.patterns.get(&key) {
            return Arc::clone(entry.value());
        }
        let fresh = PatternEntry::new(
            &key,
            self.config.history_capacity,
            self.clock.now(),
            self.clock.now_utc(),
        );
        self.patterns.entry(key).or_insert_with(|| Arc::new(Mutex::new(fresh))).value().clone()
    }

    fn record_attempt(
        &self,
        operation_name: &str,
        category: ErrorCategory,
        attempt: u32,
        error: Option<String>,
        delay: Duration,
        success: bool,
    ) {
        let record = RetryAttempt { attempt, timestamp: self.clock.now_utc(), error, delay, success };
        let entry = self.entry(operation_name, category);
        entry.lock().record(record, self.clock.now());
    }

    fn finish_sequence(&self, operation_name: &str, category: ErrorCategory, attempts: u32) {
        let entry = self.entry(operation_name, category);
        entry.lock().record_sequence(attempts.saturating_sub(1), self.clock.now());
    }

    /// Pattern for one `(operation, category)`, if any attempt was recorded
    pub fn get_pattern(&self, operation_name: &str, category: ErrorCategory) -> Option<RetryPattern> {
        let entry = self.patterns.get(&PatternKey::new(operation_name, category))?.value().clone();
        let pattern = entry.lock().pattern().clone();
        Some(pattern)
    }

    /// Attempt records currently held for one `(operation, category)`
    pub fn history(&self, operation_name: &str, category: ErrorCategory) -> Vec<RetryAttempt> {
        let Some(entry) =
            self.patterns.get(&PatternKey::new(operation_name, category)).map(|e| e.value().clone())
        else {
            return Vec::new();
        };
        let guard = entry.lock();
        let attempts = guard.history().cloned().collect();
        attempts
    }

    pub fn get_stats(&self) -> RetrySchedulerStats {
        let entries: Vec<_> = self.patterns.iter().map(|e| Arc::clone(e.value())).collect();
        let mut patterns: Vec<RetryPattern> =
            entries.iter().map(|entry| entry.lock().pattern().clone()).collect();
        patterns.sort_by(|a, b| {
            a.operation.cmp(&b.operation).then_with(|| a.category.cmp(&b.category))
        });

        RetrySchedulerStats {
            pattern_count: patterns.len(),
            total_attempts: patterns.iter().map(|p| p.total_attempts).sum(),
            total_successes: patterns.iter().map(|p| p.total_successes).sum(),
            patterns,
        }
    }

    /// Attempt-weighted suggestion across every category seen for `operation_name`
    pub fn get_recommendations(&self, operation_name: &str) -> Option<RetryRecommendation> {
        let patterns: Vec<RetryPattern> = self
            .get_stats()
            .patterns
            .into_iter()
            .filter(|p| p.operation == operation_name && p.total_attempts > 0)
            .collect();
        if patterns.is_empty() {
            return None;
        }

        let sample_size: u64 = patterns.iter().map(|p| p.total_attempts).sum();
        let weight = |p: &RetryPattern| p.total_attempts as f64 / sample_size as f64;

        let average_retries: f64 = patterns.iter().map(|p| p.average_retries * weight(p)).sum();
        let success_rate: f64 = patterns.iter().map(|p| p.success_rate * weight(p)).sum();

        let (delay_weight, delay_millis) = patterns
            .iter()
            .filter(|p| p.category != ErrorCategory::None)
            .filter_map(|p| p.best_delay.map(|d| (p.total_attempts as f64, d)))
            .fold((0.0, 0.0), |(w, sum), (pw, d)| (w + pw, sum + pw * d.as_millis() as f64));
        let suggested_base_delay = if delay_weight > 0.0 {
            Duration::from_millis((delay_millis / delay_weight).round() as u64)
        } else {
            self.config.base_delay
        };

        Some(RetryRecommendation {
            operation: operation_name.to_string(),
            suggested_max_retries: average_retries.ceil() as u32 + 1,
            suggested_base_delay,
            success_rate,
            sample_size,
        })
    }

    /// Evict patterns idle for longer than the retention window
    ///
    /// Returns the number of patterns removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.pattern_retention;
        let mut removed = 0;
        self.patterns.retain(|_, entry| {
            let keep = entry.lock().idle_for(now) <= retention;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            info!(removed, remaining = self.patterns.len(), "evicted stale retry patterns");
        }
        removed
    }

    /// Run `cleanup()` every `interval` on a tokio task until `cancel` fires
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("retry pattern cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.cleanup();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::CommonError;
    use crate::resilience::clock::MockClock;
    use crate::resilience::retry::policy::AlwaysRetry;

    fn config() -> AdaptiveRetryConfig {
        AdaptiveRetryConfig::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .jitter(false)
            .min_samples(3)
            .build()
            .unwrap()
    }

    fn scheduler() -> AdaptiveRetryScheduler<MockClock> {
        AdaptiveRetryScheduler::with_clock(config(), MockClock::new()).unwrap()
    }

    struct FixedDelay(Duration);

    impl RetryPolicy<CommonError> for FixedDelay {
        fn should_retry(&self, _error: &CommonError, _attempt: u32) -> RetryDecision {
            RetryDecision::RetryAfter(self.0)
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(AdaptiveRetryConfig::default().validate().is_ok());
        assert!(AdaptiveRetryConfig::builder().max_retries(0).build().is_err());
        assert!(AdaptiveRetryConfig::builder().backoff_multiplier(0.5).build().is_err());
        assert!(AdaptiveRetryConfig::builder().history_capacity(0).build().is_err());
        assert!(AdaptiveRetryConfig::builder()
            .base_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
    }

    /// Validates recovery after `k` failures.
    ///
    /// Assertions:
    /// - The success value is returned.
    /// - Exactly `k + 1` attempts are recorded across patterns.
    #[tokio::test(start_paused = true)]
    async fn test_fails_k_times_then_succeeds() {
        let s = scheduler();
        let calls = AtomicU32::new(0);
        let k = 2;

        let outcome = s
            .execute_with_outcome("llm.chat", Some(5), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= k {
                    Err(CommonError::network("llm", format!("failure {n}")))
                } else {
                    Ok("answer")
                }
            })
            .await;

        assert_eq!(outcome.attempts, k + 1);
        assert_eq!(outcome.total_delay, Duration::from_millis(300));
        assert_eq!(outcome.into_result().unwrap(), "answer");
        assert_eq!(s.get_stats().total_attempts, u64::from(k + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let s = scheduler();
        let calls = AtomicU32::new(0);

        let result: Result<(), CommonError> = s
            .execute("db.query", Some(4), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(CommonError::network("db", format!("failure {n}")))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(result.unwrap_err().to_string().contains("failure 4"));
        let pattern = s.get_pattern("db.query", ErrorCategory::Network).unwrap();
        assert_eq!(pattern.total_attempts, 4);
        assert_eq!(pattern.total_successes, 0);
        assert!((pattern.average_retries - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let s = scheduler();
        let calls = AtomicU32::new(0);

        let result: Result<(), CommonError> = s
            .execute("email.send", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CommonError::validation("to", "missing"))
            })
            .await;

        assert!(matches!(result, Err(CommonError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success_recorded_under_none() {
        let s = scheduler();
        let value: Result<u8, CommonError> = s.execute("ping", None, || async { Ok(1) }).await;

        assert_eq!(value.unwrap(), 1);
        let pattern = s.get_pattern("ping", ErrorCategory::None).unwrap();
        assert_eq!(pattern.total_successes, 1);
        assert_eq!(pattern.best_delay, Some(Duration::ZERO));
    }

    #[test]
    fn test_category_multipliers() {
        let s = scheduler();
        assert_eq!(s.compute_delay("op", ErrorCategory::Network, 1), Duration::from_millis(100));
        assert_eq!(s.compute_delay("op", ErrorCategory::RateLimit, 1), Duration::from_millis(200));
        assert_eq!(s.compute_delay("op", ErrorCategory::Timeout, 2), Duration::from_millis(100));
        assert_eq!(s.compute_delay("op", ErrorCategory::Server, 3), Duration::from_millis(400));
    }

    /// Validates that a pattern's learned delay replaces the default base.
    ///
    /// # Test Steps
    /// 1. Run two fail-then-succeed sequences with a fixed 40ms retry delay
    /// 2. The Network pattern now has 4 attempts, above `min_samples = 3`
    ///
    /// Assertions:
    /// - The backoff base becomes the 40ms median.
    #[tokio::test(start_paused = true)]
    async fn test_learned_delay_replaces_base() {
        let s = scheduler();
        let policy = FixedDelay(Duration::from_millis(40));

        for _ in 0..2 {
            let calls = AtomicU32::new(0);
            let result: Result<(), CommonError> = s
                .execute_with_policy("search", Some(3), &policy, || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CommonError::network("search", "reset"))
                    } else {
                        Ok(())
                    }
                })
                .await;
            assert!(result.is_ok());
        }

        let pattern = s.get_pattern("search", ErrorCategory::Network).unwrap();
        assert_eq!(pattern.best_delay, Some(Duration::from_millis(40)));
        assert_eq!(s.compute_delay("search", ErrorCategory::Network, 1), Duration::from_millis(40));
        assert_eq!(s.compute_delay("search", ErrorCategory::Network, 2), Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_capped_per_key() {
        let cfg = AdaptiveRetryConfig { history_capacity: 5, jitter: false, ..config() };
        let s = AdaptiveRetryScheduler::with_clock(cfg, MockClock::new()).unwrap();

        let _: Result<(), CommonError> = s
            .execute_with_policy("flaky", Some(12), &AlwaysRetry, || async {
                Err(CommonError::internal("nope"))
            })
            .await;

        let history = s.history("flaky", ErrorCategory::Unknown);
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().map(|a| a.attempt), Some(12));
        assert_eq!(s.get_pattern("flaky", ErrorCategory::Unknown).unwrap().total_attempts, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recommendations_weighted_by_attempts() {
        let s = scheduler();
        for _ in 0..3 {
            let calls = AtomicU32::new(0);
            let _: Result<(), CommonError> = s
                .execute("llm", Some(5), || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CommonError::network("llm", "reset"))
                    } else {
                        Ok(())
                    }
                })
                .await;
        }

        let rec = s.get_recommendations("llm").unwrap();
        assert_eq!(rec.sample_size, 9);
        assert_eq!(rec.suggested_max_retries, 3);
        assert!(s.get_recommendations("unknown-op").is_none());
    }

    #[tokio::test]
    async fn test_cleanup_evicts_idle_patterns() {
        let clock = MockClock::new();
        let s = AdaptiveRetryScheduler::with_clock(config(), clock.clone()).unwrap();
        let _: Result<(), CommonError> = s.execute("old", None, || async { Ok(()) }).await;

        clock.advance(Duration::from_secs(6 * SECONDS_PER_DAY));
        let _: Result<(), CommonError> = s.execute("fresh", None, || async { Ok(()) }).await;
        assert_eq!(s.cleanup(), 0);

        clock.advance(Duration::from_secs(2 * SECONDS_PER_DAY));
        assert_eq!(s.cleanup(), 1);
        assert!(s.get_pattern("old", ErrorCategory::None).is_none());
        assert!(s.get_pattern("fresh", ErrorCategory::None).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_cancel() {
        let s = Arc::new(scheduler());
        let token = CancellationToken::new();
        let handle = s.spawn_cleanup_task(Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(180)).await;
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_stats_is_idempotent() {
        let s = scheduler();
        let _: Result<(), CommonError> =
            s.execute("a", Some(2), || async { Err(CommonError::network("a", "x")) }).await;

        assert_eq!(s.get_stats(), s.get_stats());
        assert_eq!(s.get_stats().pattern_count, 1);
    }
}
