//! Common error types and classification for the resilience layer
//!
//! Two pieces make up the error handling infrastructure:
//!
//! 1. **`CommonError`**: ambient failures that show up around the resilience
//!    primitives (configuration, serialization, I/O, backend calls, rate
//!    limiting, timeouts). Call sites that have no error type of their own can
//!    return it directly from wrapped operations.
//!
//! 2. **`ErrorClassification`**: the trait every error flowing through the
//!    retry scheduler implements. It reports retryability, severity and an
//!    explicit [`ErrorCategory`] tag, which the scheduler uses to pick backoff
//!    heuristics and to key learned retry patterns.
//!
//! ## ErrorCategory
//!
//! | Category | Typical source | Backoff heuristic |
//! |----------|----------------|-------------------|
//! | `Network` | connection reset, DNS | default |
//! | `RateLimit` | HTTP 429, quota | longer delay |
//! | `Timeout` | deadline exceeded | shorter delay |
//! | `Server` | HTTP 5xx | default |
//! | `Validation` | bad request | not retried |
//! | `Authentication` | 401/403 | not retried |
//! | `Unknown` | anything unclassified | default |
//! | `None` | no error was observed | n/a |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_resilience::error::{CommonError, ErrorCategory, ErrorClassification};
//!
//! let err = CommonError::rate_limit_detailed(60, Duration::from_secs(60), None);
//! assert!(err.is_retryable());
//! assert_eq!(err.category(), ErrorCategory::RateLimit);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants shared by call sites and the ambient stack
#[derive(Debug, Clone)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// File I/O errors
    Io { message: String },

    /// Rate limiting errors reported by a dependency
    RateLimitExceeded {
        limit: Option<u32>,
        window: Option<Duration>,
        retry_after: Option<Duration>,
    },

    /// Timeout errors reported by a dependency client
    Timeout { operation: String, duration: Duration },

    /// Transport-level failure talking to a dependency
    Network { service: String, message: String },

    /// Dependency answered with a failure
    Backend { service: String, message: String, is_retryable: bool },

    /// Validation errors
    Validation { field: String, message: String },

    /// Permission or authorization errors
    Unauthorized { operation: String },

    /// Internal errors that shouldn't normally occur
    Internal { message: String, context: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Io { message } => write!(f, "I/O error: {}", message),
            Self::RateLimitExceeded { limit, window, retry_after } => {
                let mut msg = "Rate limit exceeded".to_string();
                if let (Some(limit), Some(window)) = (limit, window) {
                    msg.push_str(&format!(": {} requests per {:?}", limit, window));
                }
                if let Some(retry) = retry_after {
                    msg.push_str(&format!(" (retry in {:?})", retry));
                }
                write!(f, "{}", msg)
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Network { service, message } => {
                write!(f, "Network error reaching '{}': {}", service, message)
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::Unauthorized { operation } => {
                write!(f, "Unauthorized to perform '{}'", operation)
            }
            Self::Internal { message, context } => {
                if let Some(ctx) = context {
                    write!(f, "Internal error in '{}': {}", ctx, message)
                } else {
                    write!(f, "Internal error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Error,
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Io { .. } => ErrorSeverity::Error,
            Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Network { .. } => ErrorSeverity::Warning,
            Self::Backend { .. } => ErrorSeverity::Error,
            Self::Validation { .. } => ErrorSeverity::Error,
            Self::Unauthorized { .. } => ErrorSeverity::Warning,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Network { .. } => ErrorCategory::Network,
            Self::Backend { .. } => ErrorCategory::Server,
            Self::Validation { .. } | Self::Config { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a rate limit error with details
    pub fn rate_limit_detailed(
        limit: u32,
        window: Duration,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::RateLimitExceeded { limit: Some(limit), window: Some(window), retry_after }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a network error
    pub fn network<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Network { service: service.into(), message: message.into() }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an unauthorized error
    pub fn unauthorized<O: Into<String>>(operation: O) -> Self {
        Self::Unauthorized { operation: operation.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Create an internal error with context
    pub fn internal_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::Internal { message: message.into(), context: Some(context.into()) }
    }
}

/// Explicit error category attached to every classified error
///
/// The retry scheduler keys learned patterns by `(operation, category)` and
/// adjusts delays for `RateLimit` and `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    RateLimit,
    Timeout,
    Server,
    Validation,
    Authentication,
    Unknown,
    /// No error was observed (a first-attempt success)
    None,
}

impl ErrorCategory {
    /// Stable lowercase name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Unknown => "unknown",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error classification trait for consistent retry and reporting decisions
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use bulwark_resilience::error::{ErrorCategory, ErrorClassification, ErrorSeverity};
///
/// #[derive(Debug)]
/// enum LlmError {
///     Overloaded,
///     BadPrompt,
/// }
///
/// impl ErrorClassification for LlmError {
///     fn is_retryable(&self) -> bool {
///         matches!(self, Self::Overloaded)
///     }
///
///     fn severity(&self) -> ErrorSeverity {
///         ErrorSeverity::Warning
///     }
///
///     fn is_critical(&self) -> bool {
///         false
///     }
///
///     fn retry_after(&self) -> Option<Duration> {
///         None
///     }
///
///     fn category(&self) -> ErrorCategory {
///         match self {
///             Self::Overloaded => ErrorCategory::RateLimit,
///             Self::BadPrompt => ErrorCategory::Validation,
///         }
///     }
/// }
/// ```
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again: timeouts, rate limiting, temporary unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (e.g.
    /// from a Retry-After header).
    fn retry_after(&self) -> Option<Duration>;

    /// Category tag used for backoff heuristics and pattern learning
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Unknown
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

impl From<crate::resilience::ConfigError> for CommonError {
    fn from(err: crate::resilience::ConfigError) -> Self {
        match err {
            crate::resilience::ConfigError::Invalid { message } => Self::config(message),
        }
    }
}
