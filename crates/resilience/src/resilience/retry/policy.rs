//! Retry decisions
//!
//! A [`RetryPolicy`] looks at a failed attempt and decides whether the
//! scheduler should try again, and optionally with which delay. The default
//! [`ClassifiedRetry`] defers to [`ErrorClassification`].

use std::time::Duration;

use crate::error::ErrorClassification;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// `attempt` is the 1-based number of the attempt that just failed
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with the computed backoff delay
    Retry,
    /// Retry after exactly this delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Retries retryable errors, honoring their `retry_after` hint
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifiedRetry;

impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
    fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Stop;
        }
        match error.retry_after() {
            Some(delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::Retry,
        }
    }
}

/// Always retry policy - retries on any error
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> RetryPolicy<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
        RetryDecision::Retry
    }
}

/// Never retry policy - never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E> RetryPolicy<E> for NeverRetry {
    fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
        RetryDecision::Stop
    }
}

/// Predicate-based retry policy
#[derive(Debug, Clone)]
pub struct PredicateRetry<F> {
    predicate: F,
}

impl<F> PredicateRetry<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F, E> RetryPolicy<E> for PredicateRetry<F>
where
    F: Fn(&E, u32) -> bool,
{
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
        if (self.predicate)(error, attempt) {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommonError;

    #[test]
    fn test_classified_retry_follows_classification() {
        let policy = ClassifiedRetry;

        assert_eq!(
            policy.should_retry(&CommonError::network("llm", "reset"), 1),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.should_retry(&CommonError::validation("prompt", "empty"), 1),
            RetryDecision::Stop
        );
    }

    #[test]
    fn test_classified_retry_honors_retry_after() {
        let err = CommonError::rate_limit_detailed(
            60,
            Duration::from_secs(60),
            Some(Duration::from_millis(750)),
        );
        assert_eq!(
            ClassifiedRetry.should_retry(&err, 2),
            RetryDecision::RetryAfter(Duration::from_millis(750))
        );
    }

    #[test]
    fn test_predicate_retry() {
        let policy = PredicateRetry::new(|_: &CommonError, attempt| attempt < 2);
        let err = CommonError::internal("x");

        assert_eq!(policy.should_retry(&err, 1), RetryDecision::Retry);
        assert_eq!(policy.should_retry(&err, 2), RetryDecision::Stop);
    }

    #[test]
    fn test_always_and_never() {
        let err = CommonError::internal("x");
        assert_eq!(AlwaysRetry.should_retry(&err, 9), RetryDecision::Retry);
        assert_eq!(NeverRetry.should_retry(&err, 1), RetryDecision::Stop);
    }
}
