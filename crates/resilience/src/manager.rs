//! Process-wide registry of circuit breakers.
//!
//! Breakers are created on first use and live for the lifetime of the
//! process: dropping one would forget the failures it is guarding against.
//! The map itself only hands out `Arc`s; every state change happens inside
//! the breaker's own lock.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use forgepilot_core::event::{DomainEvent, EventBus};

use crate::breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, TransitionCallback};

/// Breaker guarding the model backend.
pub const MODEL_BACKEND: &str = "model-backend";

/// Name of the breaker guarding tool `tool_name`.
pub fn tool_breaker_name(tool_name: &str) -> String {
    format!("tool:{tool_name}")
}

pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    on_transition: TransitionCallback,
}

impl BreakerManager {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            overrides: HashMap::new(),
            on_transition: Arc::new(log_transition),
        }
    }

    /// Per-name tuning, applied when the named breaker is first created.
    pub fn with_overrides(mut self, overrides: HashMap<String, BreakerConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Log transitions and publish them on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.on_transition = Arc::new(move |name, from, to| {
            log_transition(name, from, to);
            bus.publish(DomainEvent::BreakerStateChanged {
                breaker: name.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                timestamp: chrono::Utc::now(),
            });
        });
        self
    }

    /// The breaker for `name`, created with the configured tuning on first
    /// access.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self.overrides.get(name).copied().unwrap_or(self.defaults);
        self.get_or_create_with(name, config)
    }

    /// The breaker for `name`. `config` only applies if this call creates it.
    pub fn get_or_create_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        // The entry API holds the shard lock, so racing first accesses
        // still agree on one instance.
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = name, "Creating circuit breaker");
                Arc::new(
                    CircuitBreaker::new(name, config).with_callback(self.on_transition.clone()),
                )
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Stats of every breaker created so far, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerManager {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

fn log_transition(name: &str, from: BreakerState, to: BreakerState) {
    match to {
        BreakerState::Open => {
            tracing::warn!(breaker = name, %from, "Circuit breaker opened");
        }
        _ => {
            tracing::info!(breaker = name, %from, %to, "Circuit breaker state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_name_same_instance() {
        let manager = BreakerManager::default();
        let a = manager.get_or_create(MODEL_BACKEND);
        let b = manager.get_or_create(MODEL_BACKEND);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn breakers_are_isolated() {
        let manager = BreakerManager::new(BreakerConfig {
            max_failures: 1,
            ..BreakerConfig::default()
        });
        let write = manager.get_or_create(&tool_breaker_name("write_file"));
        let _ = write.call(|| async { Err::<(), _>("disk full") }).await;

        assert_eq!(write.state(), BreakerState::Open);
        assert_eq!(
            manager.get_or_create(MODEL_BACKEND).state(),
            BreakerState::Closed
        );
    }

    #[test]
    fn overrides_apply_on_creation() {
        let tuned = BreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(5),
            half_open_max: 1,
        };
        let manager = BreakerManager::default()
            .with_overrides(HashMap::from([(MODEL_BACKEND.to_string(), tuned)]));
        assert_eq!(manager.get_or_create(MODEL_BACKEND).config(), tuned);
        assert_eq!(
            manager.get_or_create("tool:list_repos").config(),
            BreakerConfig::default()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_yields_one_instance() {
        let manager = Arc::new(BreakerManager::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.get_or_create("tool:read_file") })
            })
            .collect();
        let mut breakers = Vec::new();
        for h in handles {
            breakers.push(h.await.unwrap());
        }
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let manager = BreakerManager::new(BreakerConfig {
            max_failures: 1,
            ..BreakerConfig::default()
        })
        .with_event_bus(bus.clone());

        let b = manager.get_or_create(MODEL_BACKEND);
        let _ = b.call(|| async { Err::<(), _>("refused") }).await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::BreakerStateChanged { breaker, to, .. } => {
                assert_eq!(breaker, MODEL_BACKEND);
                assert_eq!(to, "open");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(manager.stats()[0].state, BreakerState::Open);
    }
}
