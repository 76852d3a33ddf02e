// ============================================================================
// Load Balancer Configuration
// ============================================================================

use anyhow::{Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Instance selection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
    Random,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::Weighted => "weighted",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "least_connections" | "least_conn" => Ok(Self::LeastConnections),
            "weighted" | "weighted_random" => Ok(Self::Weighted),
            "random" => Ok(Self::Random),
            other => bail!("unknown load balancing strategy '{}'", other),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadBalancerConfig {
    /// Strategy used for every service without an override
    pub strategy: LoadBalancingStrategy,
    /// Per-service overrides
    pub service_strategies: HashMap<String, LoadBalancingStrategy>,
    /// Seed for the weighted/random strategies; unset means OS entropy
    pub seed: Option<u64>,
}

impl LoadBalancerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let strategy = match std::env::var("LB_STRATEGY") {
            Ok(v) => v.parse()?,
            Err(_) => LoadBalancingStrategy::default(),
        };

        // LB_SERVICE_STRATEGIES="user-service=least_connections,media-service=weighted"
        let mut service_strategies = HashMap::new();
        if let Ok(raw) = std::env::var("LB_SERVICE_STRATEGIES") {
            service_strategies = parse_service_strategies(&raw)?;
        }

        Ok(Self {
            strategy,
            service_strategies,
            seed: std::env::var("LB_SEED").ok().and_then(|s| s.parse().ok()),
        })
    }
}

fn parse_service_strategies(raw: &str) -> Result<HashMap<String, LoadBalancingStrategy>> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((service, strategy)) = pair.split_once('=') else {
            bail!("invalid LB_SERVICE_STRATEGIES entry '{}', expected service=strategy", pair);
        };
        map.insert(service.trim().to_string(), strategy.parse()?);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "least-connections".parse::<LoadBalancingStrategy>().unwrap(),
            LoadBalancingStrategy::LeastConnections
        );
        assert_eq!(
            "ROUND_ROBIN".parse::<LoadBalancingStrategy>().unwrap(),
            LoadBalancingStrategy::RoundRobin
        );
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
    }

    #[test]
    fn test_service_overrides() {
        let map = parse_service_strategies("a=weighted, b = random").unwrap();
        assert_eq!(map.get("a"), Some(&LoadBalancingStrategy::Weighted));
        assert_eq!(map.get("b"), Some(&LoadBalancingStrategy::Random));
        assert!(parse_service_strategies("a:weighted").is_err());
    }
}
