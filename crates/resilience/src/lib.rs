//! Resilience layer for calls to unreliable external dependencies.
//!
//! Circuit breakers, adaptive retries, timeouts with cancellation, bulk
//! processing and graceful degradation, composable around any async
//! operation returning `Result`.
//!
//! # Modules
//!
//! - [`resilience`]: the resilience primitives and the [`ResilienceLayer`]
//!   facade
//! - [`config`]: serde configuration and its file/environment loader
//! - [`error`]: ambient error type and error classification
//! - [`observability`]: tracing subscriber setup
//! - [`utils`]: serde helpers

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use config::{CallOptions, ResilienceConfig};
pub use error::{CommonError, CommonResult, ErrorCategory, ErrorClassification, ErrorSeverity};
pub use observability::{init_tracing, LogFormat};
pub use resilience::{
    AdaptiveRetryConfig, AdaptiveRetryScheduler, BulkConfig, BulkOperationResult, BulkProcessor,
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Clock,
    DegradationConfig, DegradationCoordinator, FallbackRequest, HealthReport, MockClock,
    ResilienceError, ResilienceLayer, ResilienceResult, SystemClock, TimeoutWrapper,
};
pub use utils::duration_millis;
