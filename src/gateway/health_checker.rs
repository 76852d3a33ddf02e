// ============================================================================
// Active health checking
// ============================================================================
//
// Probes every known instance's health path on a fixed interval and feeds
// the verdict back into discovery, so the load balancer skips instances
// that stopped answering and picks them up again once they recover.
//
// ============================================================================

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::HealthCheckConfig;
use crate::gateway::discovery::ServiceDiscovery;
use crate::gateway::service_client::ServiceClient;
use crate::metrics::GATEWAY_SERVICE_HEALTH;

pub struct HealthChecker {
    discovery: Arc<dyn ServiceDiscovery>,
    client: ServiceClient,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        client: ServiceClient,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            discovery,
            client,
            config,
        }
    }

    /// Probe every instance once. Returns the number of instances probed.
    pub async fn check_once(&self) -> usize {
        let mut probed = 0;

        for service in self.discovery.known_services() {
            let instances = match self.discovery.get_instances(&service).await {
                Ok(instances) => instances,
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "Health check could not list instances");
                    continue;
                }
            };

            let probes = instances.iter().map(|instance| async move {
                let healthy = self
                    .client
                    .check_health(&instance.url, &self.config.path, self.config.timeout())
                    .await;
                (instance, healthy)
            });

            for (instance, healthy) in join_all(probes).await {
                probed += 1;
                if healthy != instance.healthy {
                    if healthy {
                        tracing::info!(service = %service, instance = %instance.url, "Instance recovered");
                    } else {
                        tracing::warn!(service = %service, instance = %instance.url, "Instance failed health check");
                    }
                }
                self.discovery.report_health(&service, &instance.url, healthy);
                GATEWAY_SERVICE_HEALTH
                    .with_label_values(&[service.as_str(), instance.url.as_str()])
                    .set(if healthy { 1.0 } else { 0.0 });
            }
        }

        probed
    }

    /// Check on every interval tick until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval_secs,
            path = %self.config.path,
            "Health checker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let probed = self.check_once().await;
                    tracing::debug!(instances = probed, "Health check round complete");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Health checker stopped");
    }
}
