// ============================================================================
// Load Balancer
// ============================================================================
//
// Picks one healthy instance per request. Unhealthy instances are never
// used as a fallback: no healthy instance is an error.
//
// Strategies (global default, overridable per service):
// - round_robin: per-service rotating index, persists across calls
// - least_connections: lowest in-flight count, ties go to the first seen
// - weighted: cumulative-weight random draw
// - random: uniform draw
//
// Every selection hands back a ConnectionGuard; the instance's in-flight
// count stays raised until the guard is dropped, whatever the outcome.
//
// ============================================================================

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{LoadBalancerConfig, LoadBalancingStrategy};
use crate::gateway::discovery::ServiceInstance;
use crate::metrics::GATEWAY_UPSTREAM_IN_FLIGHT;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadBalancerError {
    #[error("no healthy instances for service {0}")]
    NoHealthyInstances(String),
}

/// Source of randomness for the weighted and random strategies
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, bound)`; `bound` is never zero
    fn next_below(&self, bound: u64) -> u64;
}

/// Thread-local OS-seeded generator
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_below(&self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Reproducible generator for tests and replayable deployments
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_below(&self, bound: u64) -> u64 {
        self.rng.lock().gen_range(0..bound)
    }
}

/// Holds an instance's in-flight slot; released on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    service: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
        GATEWAY_UPSTREAM_IN_FLIGHT
            .with_label_values(&[self.service.as_str()])
            .dec();
    }
}

/// A chosen instance plus its in-flight slot
#[derive(Debug)]
pub struct Selection {
    pub instance: ServiceInstance,
    pub guard: ConnectionGuard,
}

pub struct LoadBalancer {
    default_strategy: LoadBalancingStrategy,
    service_strategies: HashMap<String, LoadBalancingStrategy>,
    /// Round-robin cursor per service
    cursors: DashMap<String, AtomicUsize>,
    /// In-flight calls per service, then per instance url
    in_flight: DashMap<String, HashMap<String, Arc<AtomicUsize>>>,
    random: Arc<dyn RandomSource>,
}

impl LoadBalancer {
    pub fn new(config: &LoadBalancerConfig) -> Self {
        let random: Arc<dyn RandomSource> = match config.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        };
        Self::with_random(config, random)
    }

    pub fn with_random(config: &LoadBalancerConfig, random: Arc<dyn RandomSource>) -> Self {
        Self {
            default_strategy: config.strategy,
            service_strategies: config.service_strategies.clone(),
            cursors: DashMap::new(),
            in_flight: DashMap::new(),
            random,
        }
    }

    pub fn strategy_for(&self, service: &str) -> LoadBalancingStrategy {
        self.service_strategies
            .get(service)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Current in-flight calls to one instance
    pub fn in_flight(&self, service: &str, url: &str) -> usize {
        self.in_flight
            .get(service)
            .and_then(|counters| counters.get(url).map(|c| c.load(Ordering::Acquire)))
            .unwrap_or(0)
    }

    /// Forget idle counters of instances that left the list
    fn prune(&self, service: &str, instances: &[ServiceInstance]) {
        if let Some(mut counters) = self.in_flight.get_mut(service)
            && counters.len() > instances.len()
        {
            counters.retain(|url, counter| {
                counter.load(Ordering::Acquire) > 0 || instances.iter().any(|i| i.url == *url)
            });
        }
    }

    /// Select a healthy instance of `service`
    pub fn select(
        &self,
        service: &str,
        instances: &[ServiceInstance],
    ) -> Result<Selection, LoadBalancerError> {
        self.prune(service, instances);

        let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.healthy).collect();
        if healthy.is_empty() {
            return Err(LoadBalancerError::NoHealthyInstances(service.to_string()));
        }

        let strategy = self.strategy_for(service);
        let chosen = match strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(service, &healthy),
            LoadBalancingStrategy::LeastConnections => self.least_connections(service, &healthy),
            LoadBalancingStrategy::Weighted => self.weighted(&healthy),
            LoadBalancingStrategy::Random => {
                healthy[self.random.next_below(healthy.len() as u64) as usize]
            }
        };

        tracing::trace!(
            service = %service,
            instance = %chosen.url,
            strategy = %strategy,
            "Selected instance"
        );

        let guard = self.acquire(service, &chosen.url);
        Ok(Selection {
            instance: chosen.clone(),
            guard,
        })
    }

    fn round_robin<'a>(&self, service: &str, healthy: &[&'a ServiceInstance]) -> &'a ServiceInstance {
        let index = match self.cursors.get(service) {
            Some(cursor) => cursor.fetch_add(1, Ordering::Relaxed),
            None => self
                .cursors
                .entry(service.to_string())
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed),
        };
        healthy[index % healthy.len()]
    }

    fn least_connections<'a>(
        &self,
        service: &str,
        healthy: &[&'a ServiceInstance],
    ) -> &'a ServiceInstance {
        // min_by_key keeps the first of equal minima
        healthy
            .iter()
            .copied()
            .min_by_key(|i| self.in_flight(service, &i.url))
            .unwrap_or(healthy[0])
    }

    fn weighted<'a>(&self, healthy: &[&'a ServiceInstance]) -> &'a ServiceInstance {
        let total: u64 = healthy.iter().map(|i| u64::from(i.weight.max(1))).sum();
        let mut draw = self.random.next_below(total);
        for instance in healthy {
            let weight = u64::from(instance.weight.max(1));
            if draw < weight {
                return instance;
            }
            draw -= weight;
        }
        healthy[healthy.len() - 1]
    }

    fn acquire(&self, service: &str, url: &str) -> ConnectionGuard {
        // Raise the count under the service's lock so prune never drops a
        // counter that is about to be used
        let counter = {
            let mut counters = self.in_flight.entry(service.to_string()).or_default();
            let counter = counters.entry(url.to_string()).or_default().clone();
            counter.fetch_add(1, Ordering::AcqRel);
            counter
        };
        GATEWAY_UPSTREAM_IN_FLIGHT.with_label_values(&[service]).inc();

        ConnectionGuard {
            counter,
            service: service.to_string(),
        }
    }
}
