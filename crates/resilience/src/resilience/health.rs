//! Resilience layer facade and health reporting
//!
//! [`ResilienceLayer`] owns the process-wide pieces built from one
//! [`ResilienceConfig`]: the breaker registry and the shared retry scheduler.
//! Bulk processors and degradation coordinators are cheap and typed by their
//! item or value, so the layer hands out fresh ones configured from the same
//! source.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::bulk::BulkProcessor;
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
use super::clock::{Clock, SystemClock};
use super::degradation::DegradationCoordinator;
use super::error::ConfigResult;
use super::registry::CircuitBreakerRegistry;
use super::retry::{AdaptiveRetryScheduler, RetrySchedulerStats};
use crate::config::ResilienceConfig;

/// Overall status derived from breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every breaker is closed
    Healthy,
    /// Some breaker is probing in half-open
    Recovering,
    /// Some breaker is open
    Degraded,
}

/// Snapshot served by an external health-check endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub status: HealthStatus,
    pub healthy: bool,
    pub open_breakers: Vec<String>,
    pub breakers: Vec<CircuitBreakerStats>,
    pub retry: RetrySchedulerStats,
}

pub struct ResilienceLayer<C: Clock + Clone = SystemClock> {
    config: ResilienceConfig,
    registry: CircuitBreakerRegistry<C>,
    scheduler: Arc<AdaptiveRetryScheduler<C>>,
    clock: C,
}

impl<C: Clock + Clone> std::fmt::Debug for ResilienceLayer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceLayer")
            .field("breakers", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

impl ResilienceLayer<SystemClock> {
    pub fn new(config: ResilienceConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> ResilienceLayer<C> {
    pub fn with_clock(config: ResilienceConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let registry = CircuitBreakerRegistry::with_clock(
            config.breaker.clone(),
            config.dependencies.clone(),
            clock.clone(),
        )?;
        let scheduler = Arc::new(AdaptiveRetryScheduler::with_clock(config.retry.clone(), clock.clone())?);
        info!(dependencies = config.dependencies.len(), "resilience layer initialized");
        Ok(Self { config, registry, scheduler, clock })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Breaker guarding `dependency`, created on first use
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker<C>> {
        self.registry.get_or_create(dependency)
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry<C> {
        &self.registry
    }

    pub fn scheduler(&self) -> Arc<AdaptiveRetryScheduler<C>> {
        Arc::clone(&self.scheduler)
    }

    pub fn bulk_processor(&self) -> BulkProcessor {
        BulkProcessor::from_validated(self.config.bulk.clone())
    }

    pub fn degradation_coordinator<V: Clone>(&self) -> DegradationCoordinator<V, C> {
        DegradationCoordinator::from_validated(self.config.degradation.clone(), self.clock.clone())
    }

    /// Evict idle retry patterns every `interval` until `cancel` fires
    pub fn spawn_maintenance(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        self.scheduler.spawn_cleanup_task(interval, cancel)
    }

    pub fn health_report(&self) -> HealthReport {
        let breakers = self.registry.stats();
        let open_breakers: Vec<String> = breakers
            .iter()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.name.clone())
            .collect();

        let status = if !open_breakers.is_empty() {
            HealthStatus::Degraded
        } else if breakers.iter().any(|s| s.state == CircuitState::HalfOpen) {
            HealthStatus::Recovering
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            generated_at: self.clock.now_utc(),
            status,
            healthy: open_breakers.is_empty(),
            open_breakers,
            breakers,
            retry: self.scheduler.get_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommonError;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use crate::resilience::clock::MockClock;

    fn layer() -> (ResilienceLayer<MockClock>, MockClock) {
        let mut config = ResilienceConfig::default();
        config.dependencies.insert(
            "llm".to_string(),
            CircuitBreakerConfig { failure_threshold: 1, ..Default::default() },
        );
        let clock = MockClock::new();
        (ResilienceLayer::with_clock(config, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ResilienceConfig::default();
        config.retry.max_retries = 0;
        assert!(ResilienceLayer::new(config).is_err());
    }

    #[test]
    fn test_breaker_uses_dependency_override() {
        let (layer, _clock) = layer();
        assert_eq!(layer.breaker("llm").config().failure_threshold, 1);
        assert_eq!(layer.breaker("db").config().failure_threshold, 5);
        assert!(Arc::ptr_eq(&layer.breaker("llm"), &layer.breaker("llm")));
    }

    /// Validates health status across breaker states.
    ///
    /// Assertions:
    /// - A fresh layer is healthy.
    /// - An open breaker makes the report degraded and names it.
    /// - A probe succeeding short of the success threshold leaves it recovering.
    #[tokio::test]
    async fn test_health_report_tracks_breakers() {
        let (layer, clock) = layer();
        let llm = layer.breaker("llm");
        let _db = layer.breaker("db");

        let report = layer.health_report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.healthy);
        assert_eq!(report.breakers.len(), 2);

        let _ = llm.execute(|| async { Err::<(), _>(CommonError::network("llm", "reset")) }).await;
        let report = layer.health_report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.healthy);
        assert_eq!(report.open_breakers, vec!["llm".to_string()]);

        clock.advance(llm.config().reset_timeout);
        llm.execute(|| async { Ok::<_, CommonError>(()) }).await.unwrap();
        assert_eq!(llm.state(), CircuitState::HalfOpen);
        assert_eq!(layer.health_report().status, HealthStatus::Recovering);
    }

    #[test]
    fn test_health_report_serializes() {
        let (layer, _clock) = layer();
        let _ = layer.breaker("llm");

        let json = serde_json::to_value(layer.health_report()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["breakers"][0]["state"], "CLOSED");
        assert_eq!(json["retry"]["pattern_count"], 0);
    }
}
