use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::circuit::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// Process-wide set of breakers, one per service, created on first use.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides: HashMap::new(),
        }
    }

    /// Use `config` instead of the default for `service`.
    pub fn with_override(mut self, service: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(service.into(), config);
        self
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, BreakerConfig>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    fn config_for(&self, service: &str) -> BreakerConfig {
        self.overrides
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// The breaker for `service`, creating it if needed.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }

        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config_for(service))))
            .clone()
    }

    /// State of every breaker created so far, sorted by service.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    /// Force a breaker closed. Returns false if no breaker exists for `service`.
    pub fn reset(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset();
                info!(service, "Circuit breaker manually reset");
                true
            }
            None => false,
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
