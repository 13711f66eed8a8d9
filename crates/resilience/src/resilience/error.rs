//! Error taxonomy of the resilience primitives
//!
//! Synthesized failures (timeouts, cancellations, open circuits, bulk
//! threshold aborts) carry enough context to log or surface them without
//! consulting the component that produced them. Failures of the wrapped
//! operation pass through untouched inside [`ResilienceError::OperationFailed`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::{ErrorCategory, ErrorClassification, ErrorSeverity};

/// Simple configuration error for validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced by resilience operations
///
/// Generic over the wrapped operation's error type `E` so the original error
/// survives every layer it passes through.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The deadline fired before the operation settled
    #[error("Operation '{operation}' timed out after {elapsed:?} (limit {timeout:?}, attempt {attempt})")]
    Timeout {
        operation: String,
        timeout: Duration,
        elapsed: Duration,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// An external cancellation signal fired before the operation settled
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String, at: DateTime<Utc> },

    /// The breaker rejected the call without invoking the dependency
    #[error("Circuit '{name}' is open, retry in {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration, at: DateTime<Utc> },

    /// Bulk processing stopped because too many items failed
    #[error("Failure rate {failure_rate:.1}% exceeded threshold {threshold:.1}% after {processed} items")]
    ThresholdExceeded { failure_rate: f64, threshold: f64, processed: usize },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Discriminant of [`ResilienceError`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResilienceErrorKind {
    Timeout,
    Cancelled,
    CircuitOpen,
    ThresholdExceeded,
    OperationFailed,
    InvalidConfiguration,
}

impl ResilienceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::ThresholdExceeded => "THRESHOLD_EXCEEDED",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
        }
    }
}

impl fmt::Display for ResilienceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn kind(&self) -> ResilienceErrorKind {
        match self {
            Self::Timeout { .. } => ResilienceErrorKind::Timeout,
            Self::Cancelled { .. } => ResilienceErrorKind::Cancelled,
            Self::CircuitOpen { .. } => ResilienceErrorKind::CircuitOpen,
            Self::ThresholdExceeded { .. } => ResilienceErrorKind::ThresholdExceeded,
            Self::OperationFailed { .. } => ResilienceErrorKind::OperationFailed,
            Self::InvalidConfiguration { .. } => ResilienceErrorKind::InvalidConfiguration,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Borrow the wrapped operation error, if this is one
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Take the wrapped operation error, if this is one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn timeout(
        operation: &str,
        timeout: Duration,
        elapsed: Duration,
        attempt: u32,
    ) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout,
            elapsed,
            attempt,
            at: Utc::now(),
        }
    }

    pub(crate) fn cancelled(operation: &str) -> Self {
        Self::Cancelled { operation: operation.to_string(), at: Utc::now() }
    }
}

impl<E> From<ConfigError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { message } => Self::InvalidConfiguration { message },
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::OperationFailed { source } => source.is_retryable(),
            // An open circuit is retried by waiting out the cooldown, not by
            // hammering the breaker.
            Self::CircuitOpen { .. } => false,
            Self::Cancelled { .. }
            | Self::ThresholdExceeded { .. }
            | Self::InvalidConfiguration { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::ThresholdExceeded { .. } => ErrorSeverity::Error,
            Self::OperationFailed { source } => source.severity(),
            Self::InvalidConfiguration { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::OperationFailed { source } => source.is_critical(),
            Self::InvalidConfiguration { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            Self::OperationFailed { source } => source.retry_after(),
            _ => None,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::OperationFailed { source } => source.category(),
            Self::InvalidConfiguration { .. } => ErrorCategory::Validation,
            Self::Cancelled { .. } | Self::CircuitOpen { .. } | Self::ThresholdExceeded { .. } => {
                ErrorCategory::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommonError;

    type Error = ResilienceError<CommonError>;

    #[test]
    fn test_kind_strings() {
        let err: Error = ResilienceError::cancelled("fetch");
        assert_eq!(err.kind(), ResilienceErrorKind::Cancelled);
        assert_eq!(err.kind().to_string(), "CANCELLED");

        let err: Error = ResilienceError::timeout("fetch", Duration::from_secs(1), Duration::from_secs(1), 2);
        assert_eq!(err.kind().as_str(), "TIMEOUT");
        assert!(err.to_string().contains("attempt 2"));
    }

    /// Validates classification of synthesized errors.
    ///
    /// Assertions:
    /// - Timeouts are retryable with category `Timeout`.
    /// - Open circuits are not retryable but expose the remaining wait.
    /// - Cancellation is never retryable.
    #[test]
    fn test_synthesized_error_classification() {
        let timeout: Error =
            ResilienceError::timeout("db", Duration::from_millis(50), Duration::from_millis(51), 1);
        assert!(timeout.is_retryable());
        assert_eq!(timeout.category(), ErrorCategory::Timeout);

        let open: Error = ResilienceError::CircuitOpen {
            name: "llm".into(),
            retry_after: Duration::from_secs(4),
            at: Utc::now(),
        };
        assert!(!open.is_retryable());
        assert_eq!(open.retry_after(), Some(Duration::from_secs(4)));

        let cancelled: Error = ResilienceError::cancelled("db");
        assert!(!cancelled.is_retryable());
        assert_eq!(cancelled.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_operation_failed_delegates_to_source() {
        let err: Error = ResilienceError::OperationFailed {
            source: CommonError::rate_limit_detailed(10, Duration::from_secs(1), None),
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        assert!(err.operation_error().is_some());
        assert!(matches!(
            err.into_operation_error(),
            Some(CommonError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: Error = ConfigError::invalid("failure_threshold must be > 0").into();
        assert_eq!(err.kind(), ResilienceErrorKind::InvalidConfiguration);
        assert!(err.is_critical());
    }
}
