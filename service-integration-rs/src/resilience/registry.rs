//! Keyed circuit breaker registry
//!
//! Owned by the process composition root and passed down explicitly, so
//! every client call to the same target shares one breaker instance.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};

#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers all use `config`
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Fetch the breaker for `name`, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(circuit = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.config.clone()))
            });
        Arc::clone(breaker.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the breaker for one target
    pub fn remove(&self, name: &str) -> bool {
        self.breakers.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<CircuitBreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Forget every breaker. Test isolation and operator use only.
    pub fn reset_all(&self) {
        let count = self.breakers.len();
        self.breakers.clear();
        info!(count, "Circuit breaker registry reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrationError;
    use crate::resilience::CircuitState;

    #[tokio::test]
    async fn test_same_name_shares_breaker() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });

        let first = registry.get_or_create("planner-1");
        let second = registry.get_or_create("planner-1");
        assert!(Arc::ptr_eq(&first, &second));

        let _ = first
            .execute(|| async { Err::<(), _>(IntegrationError::connection("planner-1", "down")) })
            .await;
        assert_eq!(second.state(), CircuitState::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_listing_and_reset() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        registry.get_or_create("b");
        registry.get_or_create("a");

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        let snapshots = registry.snapshots();
        assert_eq!(snapshots[0].name, "a");
        assert_eq!(snapshots[1].state, CircuitState::Closed);

        assert!(registry.remove("a"));
        assert!(registry.get("a").is_none());

        registry.reset_all();
        assert!(registry.is_empty());
    }
}
