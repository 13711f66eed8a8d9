//! Configuration for the resilience layer
//!
//! [`ResilienceConfig`] gathers the settings of every component. All sections
//! default sensibly, so a config file only lists what it changes:
//!
//! ```toml
//! [breaker]
//! failure_threshold = 3
//! reset_timeout = 5000
//!
//! [dependencies.llm]
//! failure_threshold = 2
//! timeout = 20000
//!
//! [retry]
//! max_retries = 4
//! ```
//!
//! Durations are integers in milliseconds. See [`loader`] for the sources a
//! configuration can be read from.

pub mod loader;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{load, load_from_env, load_from_file, load_from_lookup, probe_config_paths};

use crate::resilience::{
    AdaptiveRetryConfig, BulkConfig, CircuitBreakerConfig, ConfigError, ConfigResult,
    DegradationConfig,
};
use crate::utils::{duration_millis, option_duration_millis};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Applied to every dependency without an override
    pub breaker: CircuitBreakerConfig,
    /// Per-dependency breaker overrides, keyed by dependency name
    pub dependencies: HashMap<String, CircuitBreakerConfig>,
    pub retry: AdaptiveRetryConfig,
    pub bulk: BulkConfig,
    pub degradation: DegradationConfig,
}

impl ResilienceConfig {
    /// Validate every section, naming the offending one on failure
    pub fn validate(&self) -> ConfigResult<()> {
        let prefixed = |section: &str, err: ConfigError| match err {
            ConfigError::Invalid { message } => ConfigError::invalid(format!("{section}: {message}")),
        };

        self.breaker.validate().map_err(|e| prefixed("breaker", e))?;
        for (name, config) in &self.dependencies {
            config.validate().map_err(|e| prefixed(&format!("dependencies.{name}"), e))?;
        }
        self.retry.validate().map_err(|e| prefixed("retry", e))?;
        self.bulk.validate().map_err(|e| prefixed("bulk", e))?;
        self.degradation.validate().map_err(|e| prefixed("degradation", e))?;
        Ok(())
    }

    /// Breaker configuration for `dependency`
    pub fn breaker_for(&self, dependency: &str) -> &CircuitBreakerConfig {
        self.dependencies.get(dependency).unwrap_or(&self.breaker)
    }
}

/// Per-call options supplied by call sites
///
/// Serialized in camelCase with millisecond durations, e.g.
/// `{"timeout": 5000, "maxRetries": 2, "cacheKey": "quote:42", "cacheTTL": 60000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallOptions {
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Total attempts, the first call included
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(
        rename = "cacheTTL",
        alias = "cacheTtl",
        with = "option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_ttl: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            cache_key: None,
            cache_ttl: None,
        }
    }
}

impl CallOptions {
    /// `base` with this call's thresholds and timeouts
    pub fn breaker_config(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: self.timeout,
            reset_timeout: self.reset_timeout,
            ..base.clone()
        }
    }

    /// `base` with this call's attempt budget and base delay
    pub fn retry_config(&self, base: &AdaptiveRetryConfig) -> AdaptiveRetryConfig {
        AdaptiveRetryConfig {
            max_retries: self.max_retries,
            base_delay: self.retry_delay,
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }

    /// Validates that section errors name their section.
    ///
    /// Assertions:
    /// - A bad dependency override is reported with its dependency name.
    #[test]
    fn test_validate_names_section() {
        let mut config = ResilienceConfig::default();
        config.dependencies.insert(
            "llm".to_string(),
            CircuitBreakerConfig { failure_threshold: 0, ..Default::default() },
        );

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dependencies.llm"));
    }

    #[test]
    fn test_breaker_for_prefers_override() {
        let mut config = ResilienceConfig::default();
        config.dependencies.insert(
            "db".to_string(),
            CircuitBreakerConfig { failure_threshold: 9, ..Default::default() },
        );

        assert_eq!(config.breaker_for("db").failure_threshold, 9);
        assert_eq!(config.breaker_for("email").failure_threshold, 5);
    }

    #[test]
    fn test_call_options_camel_case() {
        let json = r#"{"timeout":5000,"maxRetries":2,"retryDelay":250,"cacheKey":"quote:42","cacheTTL":60000}"#;
        let options: CallOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.retry_delay, Duration::from_millis(250));
        assert_eq!(options.cache_key.as_deref(), Some("quote:42"));
        assert_eq!(options.cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(options.failure_threshold, 5);

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["cacheTTL"], 60000);
        assert_eq!(value["resetTimeout"], 60000);
    }

    #[test]
    fn test_call_options_derive_component_configs() {
        let options = CallOptions {
            failure_threshold: 3,
            success_threshold: 3,
            reset_timeout: Duration::from_millis(5000),
            max_retries: 5,
            ..Default::default()
        };

        let breaker = options.breaker_config(&CircuitBreakerConfig::default());
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.reset_timeout, Duration::from_millis(5000));
        assert!(breaker.validate().is_ok());

        let retry = options.retry_config(&AdaptiveRetryConfig::default());
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.min_samples, AdaptiveRetryConfig::default().min_samples);
    }
}
