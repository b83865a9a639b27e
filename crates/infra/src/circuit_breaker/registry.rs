use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

/// Name-keyed breakers, built once at start-up and shared by handle.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Look up `name`, creating it with the registry defaults on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, None)
    }

    /// Like [`get_or_create`](Self::get_or_create); `config` only applies if
    /// the breaker does not exist yet.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    config.unwrap_or_else(|| self.default_config.clone()),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Stats of every breaker, sorted by name.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut stats: Vec<CircuitBreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::time::Duration;

    #[test]
    fn creation_is_idempotent() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("content_generation");
        let b = registry.get_or_create_with(
            "content_generation",
            Some(CircuitBreakerConfig::default().with_failure_threshold(1)),
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold, 5);
    }

    #[test]
    fn explicit_config_applies_on_first_lookup() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_recovery_timeout(Duration::from_secs(5)),
        );
        let custom = registry.get_or_create_with(
            "tts",
            Some(CircuitBreakerConfig::default().with_failure_threshold(2)),
        );
        assert_eq!(custom.config().failure_threshold, 2);
        assert_eq!(
            registry.get_or_create("llm").config().recovery_timeout,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn stats_and_reset_all_cover_every_breaker() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        for name in ["video", "llm"] {
            let b = registry.get_or_create(name);
            let _ = b.call(|| async { Err::<(), _>("down") }).await;
        }

        let stats = registry.stats();
        assert_eq!(stats.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["llm", "video"]);
        assert!(stats.iter().all(|s| s.state == CircuitState::Open));

        registry.reset_all();
        assert!(registry.stats().iter().all(|s| s.state == CircuitState::Closed));
    }
}
