//! Resilience patterns for calls to unreliable dependencies
//!
//! Each component works on its own and they compose along one path:
//!
//! ```text
//! caller -> DegradationCoordinator -> cache
//!                                  -> AdaptiveRetryScheduler -> CircuitBreaker -> TimeoutWrapper -> primary
//!                                  -> TimeoutWrapper -> secondary
//!                                  -> static fallback
//! ```
//!
//! - **Timeout**: races one attempt against a deadline and a cancellation
//!   token ([`TimeoutWrapper`])
//! - **Circuit Breaker**: per-dependency CLOSED / OPEN / HALF_OPEN state
//!   machine ([`CircuitBreaker`], [`CircuitBreakerRegistry`])
//! - **Adaptive Retry**: bounded exponential backoff tuned by learned
//!   per-(operation, error category) patterns ([`AdaptiveRetryScheduler`])
//! - **Bulk**: batched, retried processing of collections with a failure
//!   threshold ([`BulkProcessor`])
//! - **Degradation**: cache, primary, secondary and static fallback behind one
//!   request ([`DegradationCoordinator`])
//!
//! [`ResilienceLayer`] bundles the shared pieces and produces the
//! [`HealthReport`]. Every time-based transition reads a [`Clock`], so tests
//! drive cooldowns and expiry with [`MockClock`].

pub mod bulk;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod degradation;
pub mod error;
pub mod health;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use bulk::{
    BulkAbort, BulkConfig, BulkFailure, BulkHooks, BulkOperationResult, BulkProcessor, BulkStatus,
};
pub use cache::{CacheStats, DegradationCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerStats,
    CircuitState, SuccessPolicy,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use degradation::{
    DegradationConfig, DegradationCoordinator, DegradationStats, DegradedResponse,
    FallbackRequest, ResponseSource,
};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceErrorKind, ResilienceResult};
pub use health::{HealthReport, HealthStatus, ResilienceLayer};
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    AdaptiveRetryConfig, AdaptiveRetryConfigBuilder, AdaptiveRetryScheduler, AlwaysRetry,
    ClassifiedRetry, ExponentialBackoff, NeverRetry, PatternKey, PredicateRetry, RetryAttempt,
    RetryDecision, RetryOutcome, RetryPattern, RetryPolicy, RetryRecommendation,
    RetrySchedulerStats,
};
pub use timeout::{with_timeout, TimeoutWrapper};
