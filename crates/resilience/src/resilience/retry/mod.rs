//! Adaptive retries
//!
//! - [`scheduler`]: the [`AdaptiveRetryScheduler`] and its configuration
//! - [`pattern`]: learned per-(operation, category) statistics and attempt history
//! - [`policy`]: retry decisions ([`ClassifiedRetry`] by default)
//! - [`backoff`]: exponential backoff with jitter, shared with the bulk processor
//!
//! # Example
//!
//! ```rust
//! use bulwark_resilience::error::CommonError;
//! use bulwark_resilience::resilience::{AdaptiveRetryConfig, AdaptiveRetryScheduler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = AdaptiveRetryScheduler::new(AdaptiveRetryConfig::default()).unwrap();
//! let answer: Result<u32, CommonError> =
//!     scheduler.execute("llm.chat", Some(3), || async { Ok(42) }).await;
//! assert_eq!(answer.unwrap(), 42);
//! # }
//! ```

pub mod backoff;
pub mod pattern;
pub mod policy;
pub mod scheduler;

pub use backoff::ExponentialBackoff;
pub use pattern::{PatternKey, RetryAttempt, RetryPattern};
pub use policy::{AlwaysRetry, ClassifiedRetry, NeverRetry, PredicateRetry, RetryDecision, RetryPolicy};
pub use scheduler::{
    AdaptiveRetryConfig, AdaptiveRetryConfigBuilder, AdaptiveRetryScheduler, RetryOutcome,
    RetryRecommendation, RetrySchedulerStats,
};
