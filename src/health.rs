// ============================================================================
// Health and readiness checks
// ============================================================================
//
// Liveness never touches dependencies. Readiness pings the discovery
// backend and the rate-limit counter store.
//
// ============================================================================

use serde::Serialize;
use std::collections::BTreeMap;

use crate::gateway::discovery::ServiceDiscovery;
use crate::gateway::rate_limit::RateLimitStore;

pub const SERVICE_NAME: &str = "api-gateway";

#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub status: &'static str,
    pub service: &'static str,
}

pub fn liveness() -> LivenessReport {
    LivenessReport {
        status: "healthy",
        service: SERVICE_NAME,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub service: &'static str,
    /// Dependency name -> "ok" or the failure reason
    pub checks: BTreeMap<String, String>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

pub async fn readiness(
    discovery: &dyn ServiceDiscovery,
    rate_limit_store: Option<&dyn RateLimitStore>,
) -> ReadinessReport {
    let mut checks = BTreeMap::new();
    let mut ready = true;

    match discovery.ping().await {
        Ok(()) => {
            checks.insert(format!("discovery:{}", discovery.kind()), "ok".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: discovery backend unreachable");
            checks.insert(format!("discovery:{}", discovery.kind()), e.to_string());
            ready = false;
        }
    }

    if let Some(store) = rate_limit_store {
        match store.ping().await {
            Ok(()) => {
                checks.insert(format!("rate_limit:{}", store.kind()), "ok".to_string());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Readiness: rate limit store unreachable");
                checks.insert(format!("rate_limit:{}", store.kind()), e.to_string());
                ready = false;
            }
        }
    }

    ReadinessReport {
        status: if ready { "ready" } else { "not_ready" },
        service: SERVICE_NAME,
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::discovery::{
        DiscoveryError, InstanceList, StaticServiceDiscovery,
    };
    use crate::gateway::rate_limit::InMemoryRateLimitStore;
    use async_trait::async_trait;

    struct DownRegistry;

    #[async_trait]
    impl ServiceDiscovery for DownRegistry {
        async fn get_instances(&self, _: &str) -> Result<InstanceList, DiscoveryError> {
            Err(DiscoveryError::Unavailable("down".into()))
        }

        fn report_health(&self, _: &str, _: &str, _: bool) {}

        fn known_services(&self) -> Vec<String> {
            Vec::new()
        }

        async fn ping(&self) -> Result<(), DiscoveryError> {
            Err(DiscoveryError::Unavailable("registry down".into()))
        }

        fn kind(&self) -> &'static str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_ready_with_static_and_memory() {
        let discovery = StaticServiceDiscovery::from_instances(Vec::new());
        let store = InMemoryRateLimitStore::new();
        let report = readiness(&discovery, Some(&store)).await;
        assert!(report.is_ready());
        assert_eq!(report.checks.len(), 2);
    }

    #[tokio::test]
    async fn test_not_ready_when_registry_down() {
        let report = readiness(&DownRegistry, None).await;
        assert!(!report.is_ready());
        assert_eq!(report.status, "not_ready");
    }

    #[test]
    fn test_liveness() {
        let report = liveness();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.service, "api-gateway");
    }
}
