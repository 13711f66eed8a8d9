//! Named breaker registry
//!
//! One breaker per dependency name, created lazily on first use from the
//! dependency's configured override or the registry default. The registry is
//! an ordinary value; callers own it (usually through
//! [`ResilienceLayer`](super::health::ResilienceLayer)) and share it by `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::clock::{Clock, SystemClock};
use super::error::ConfigResult;

pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(default_config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(default_config, HashMap::new(), SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Build a registry with per-dependency overrides
    ///
    /// Every configuration is validated up front so `get_or_create` cannot fail
    /// later.
    pub fn with_clock(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
        clock: C,
    ) -> ConfigResult<Self> {
        default_config.validate()?;
        for config in overrides.values() {
            config.validate()?;
        }
        Ok(Self { breakers: DashMap::new(), default_config, overrides, clock })
    }

    /// Configuration a breaker named `name` is (or would be) created with
    pub fn config_for(&self, name: &str) -> &CircuitBreakerConfig {
        self.overrides.get(name).unwrap_or(&self.default_config)
    }

    /// Breaker for `name`, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.config_for(name).clone();
                debug!(breaker = %name, "creating circuit breaker");
                Arc::new(CircuitBreaker::from_validated(name, config, self.clock.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Register an explicitly built breaker, replacing any existing one
    pub fn register(&self, breaker: CircuitBreaker<C>) -> Arc<CircuitBreaker<C>> {
        let breaker = Arc::new(breaker);
        self.breakers.insert(breaker.name().to_string(), breaker.clone());
        breaker
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stats of every breaker, sorted by name
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|e| e.value().get_stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "reset all circuit breakers");
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
