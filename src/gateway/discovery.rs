// ============================================================================
// Service Discovery
// ============================================================================
//
// Resolves a service name to its candidate instances. Backends:
// - Static: fixed mapping from the services file, swapped on reload
// - Dynamic: external registry (Nacos HTTP API), cached per service
//
// An unknown service resolves to an empty list. Callers treat empty as
// "service not available"; only an unreachable registry is an error.
//
// ============================================================================

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::config::{DiscoveryConfig, DiscoveryMode, ServicesFile};

/// One network-addressable backend process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service: String,
    /// Base URL, e.g. "http://10.0.0.5:8080"
    pub url: String,
    /// Relative selection weight (>= 1)
    pub weight: u32,
    pub healthy: bool,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            url: url.into().trim_end_matches('/').to_string(),
            weight: 1,
            healthy: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}

pub type InstanceList = Arc<Vec<ServiceInstance>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("service registry unavailable: {0}")]
    Unavailable(String),

    #[error("service registry rejected the request: {0}")]
    Rejected(String),
}

/// Service discovery abstraction
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Instances of `service`; empty when the service is unknown
    async fn get_instances(&self, service: &str) -> Result<InstanceList, DiscoveryError>;

    /// Register an instance. Backends without registration return `false`.
    async fn register(&self, _instance: &ServiceInstance) -> Result<bool, DiscoveryError> {
        Ok(false)
    }

    /// Deregister an instance. Backends without registration return `false`.
    async fn deregister(&self, _service: &str, _url: &str) -> Result<bool, DiscoveryError> {
        Ok(false)
    }

    /// Health-check feedback for one instance
    fn report_health(&self, service: &str, url: &str, healthy: bool);

    /// Services this backend currently knows about
    fn known_services(&self) -> Vec<String>;

    /// Reachability of the backend itself (readiness)
    async fn ping(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    fn kind(&self) -> &'static str;
}

// ============================================================================
// Static discovery
// ============================================================================

type ServiceMap = HashMap<String, InstanceList>;

/// Static service discovery (from the services file)
pub struct StaticServiceDiscovery {
    services: ArcSwap<ServiceMap>,
}

impl StaticServiceDiscovery {
    pub fn new(file: &ServicesFile) -> Self {
        Self {
            services: ArcSwap::from_pointee(build_service_map(file)),
        }
    }

    pub fn from_instances(instances: Vec<ServiceInstance>) -> Self {
        let mut map: HashMap<String, Vec<ServiceInstance>> = HashMap::new();
        for instance in instances {
            map.entry(instance.service.clone()).or_default().push(instance);
        }
        Self {
            services: ArcSwap::from_pointee(
                map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            ),
        }
    }

    /// Swap in a freshly loaded services file
    pub fn reload(&self, file: &ServicesFile) {
        let map = build_service_map(file);
        let count = map.len();
        self.services.store(Arc::new(map));
        tracing::info!(services = count, "Static service registry reloaded");
    }
}

fn build_service_map(file: &ServicesFile) -> ServiceMap {
    file.services
        .iter()
        .map(|(name, config)| {
            let instances = config
                .instances
                .iter()
                .map(|i| ServiceInstance {
                    service: name.clone(),
                    url: i.url.trim_end_matches('/').to_string(),
                    weight: i.weight.max(1),
                    healthy: i.healthy,
                    metadata: i.metadata.clone(),
                })
                .collect();
            (name.clone(), Arc::new(instances))
        })
        .collect()
}

#[async_trait]
impl ServiceDiscovery for StaticServiceDiscovery {
    async fn get_instances(&self, service: &str) -> Result<InstanceList, DiscoveryError> {
        Ok(self
            .services
            .load()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    fn report_health(&self, service: &str, url: &str, healthy: bool) {
        // Copy-on-write: only the affected service's list is rebuilt
        self.services.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(list) = current.get(service)
                && list.iter().any(|i| i.url == url && i.healthy != healthy)
            {
                let updated = list
                    .iter()
                    .map(|i| {
                        if i.url == url {
                            i.clone().with_health(healthy)
                        } else {
                            i.clone()
                        }
                    })
                    .collect();
                next.insert(service.to_string(), Arc::new(updated));
            }
            next
        });
    }

    fn known_services(&self) -> Vec<String> {
        self.services.load().keys().cloned().collect()
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

// ============================================================================
// Registry client (Nacos HTTP API)
// ============================================================================

/// Raw access to an external service registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Provider-specific instance listing, normalized by the caller
    async fn list_instances(&self, service: &str) -> Result<Value, DiscoveryError>;
    async fn register_instance(&self, instance: &ServiceInstance) -> Result<bool, DiscoveryError>;
    async fn deregister_instance(&self, service: &str, url: &str) -> Result<bool, DiscoveryError>;
    async fn ping(&self) -> Result<(), DiscoveryError>;
}

pub struct HttpRegistryClient {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    group: String,
}

impl HttpRegistryClient {
    pub fn new(config: &DiscoveryConfig) -> anyhow::Result<Self> {
        let base_url = config
            .registry_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("registry URL is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            group: config.group.clone(),
        })
    }

    fn instance_endpoint(&self) -> String {
        format!("{}/nacos/v1/ns/instance", self.base_url)
    }

    fn common_params(&self, service: &str) -> Vec<(&'static str, String)> {
        vec![
            ("serviceName", service.to_string()),
            ("groupName", self.group.clone()),
            ("namespaceId", self.namespace.clone()),
        ]
    }
}

fn unavailable(e: reqwest::Error) -> DiscoveryError {
    DiscoveryError::Unavailable(e.to_string())
}

/// Split an instance URL into (ip, port) for the registry API
fn host_port(url: &str) -> Result<(String, u16), DiscoveryError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| DiscoveryError::Rejected(format!("invalid instance url {}: {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DiscoveryError::Rejected(format!("instance url {} has no host", url)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| DiscoveryError::Rejected(format!("instance url {} has no port", url)))?;
    Ok((host, port))
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_instances(&self, service: &str) -> Result<Value, DiscoveryError> {
        let url = format!("{}/list", self.instance_endpoint());
        let response = self
            .client
            .get(&url)
            .query(&self.common_params(service))
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Array(Vec::new()));
        }
        if !status.is_success() {
            return Err(DiscoveryError::Unavailable(format!(
                "registry answered {} for {}",
                status, service
            )));
        }
        response.json::<Value>().await.map_err(unavailable)
    }

    async fn register_instance(&self, instance: &ServiceInstance) -> Result<bool, DiscoveryError> {
        let (ip, port) = host_port(&instance.url)?;
        let mut params = self.common_params(&instance.service);
        params.extend([
            ("ip", ip),
            ("port", port.to_string()),
            ("weight", instance.weight.to_string()),
            ("healthy", instance.healthy.to_string()),
            ("enabled", "true".to_string()),
            ("ephemeral", "true".to_string()),
        ]);
        if !instance.metadata.is_empty() {
            let metadata = serde_json::to_string(&instance.metadata)
                .map_err(|e| DiscoveryError::Rejected(e.to_string()))?;
            params.push(("metadata", metadata));
        }

        let response = self
            .client
            .post(self.instance_endpoint())
            .query(&params)
            .send()
            .await
            .map_err(unavailable)?;
        Ok(response.status().is_success())
    }

    async fn deregister_instance(&self, service: &str, url: &str) -> Result<bool, DiscoveryError> {
        let (ip, port) = host_port(url)?;
        let mut params = self.common_params(service);
        params.extend([("ip", ip), ("port", port.to_string()), ("ephemeral", "true".to_string())]);

        let response = self
            .client
            .delete(self.instance_endpoint())
            .query(&params)
            .send()
            .await
            .map_err(unavailable)?;
        Ok(response.status().is_success())
    }

    async fn ping(&self) -> Result<(), DiscoveryError> {
        let url = format!("{}/nacos/v1/console/health/liveness", self.base_url);
        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DiscoveryError::Unavailable(format!(
                "registry liveness answered {}",
                response.status()
            )))
        }
    }
}

/// Normalize a registry response into instances.
///
/// Accepts `{"hosts": [...]}`, `{"instances": [...]}` or a bare list. Each
/// entry needs either `url` or `ip` + `port`; malformed and disabled
/// entries are skipped.
pub fn normalize_instances(service: &str, response: &Value) -> Vec<ServiceInstance> {
    let entries: &[Value] = match response {
        Value::Array(list) => list.as_slice(),
        Value::Object(obj) => match obj.get("hosts").or_else(|| obj.get("instances")) {
            Some(Value::Array(list)) => list.as_slice(),
            Some(Value::Null) | None => &[],
            Some(other) => {
                tracing::warn!(service = %service, shape = %type_name(other), "Unexpected instance list shape");
                &[]
            }
        },
        Value::Null => &[],
        other => {
            tracing::warn!(service = %service, shape = %type_name(other), "Unexpected registry response shape");
            &[]
        }
    };

    entries
        .iter()
        .filter_map(|entry| match normalize_entry(service, entry) {
            Ok(instance) => instance,
            Err(reason) => {
                tracing::warn!(service = %service, reason = %reason, "Skipping malformed instance entry");
                None
            }
        })
        .collect()
}

fn normalize_entry(service: &str, entry: &Value) -> Result<Option<ServiceInstance>, String> {
    let obj = entry.as_object().ok_or_else(|| format!("expected object, got {}", type_name(entry)))?;

    if obj.get("enabled").and_then(Value::as_bool) == Some(false) {
        return Ok(None);
    }

    let metadata: HashMap<String, String> = match obj.get("metadata") {
        Some(Value::Object(m)) => m
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => HashMap::new(),
    };

    let url = if let Some(url) = obj.get("url").and_then(Value::as_str) {
        url.trim_end_matches('/').to_string()
    } else {
        let ip = obj
            .get("ip")
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
            .ok_or("missing url and ip")?;
        let port = match obj.get("port") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .filter(|p| *p > 0 && *p <= u16::MAX as u64)
        .ok_or("missing or invalid port")?;
        let scheme = metadata.get("scheme").map(String::as_str).unwrap_or("http");
        if ip.contains(':') {
            format!("{}://[{}]:{}", scheme, ip, port)
        } else {
            format!("{}://{}:{}", scheme, ip, port)
        }
    };

    let weight = match obj.get("weight") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(Value::String(s)) => s.parse().unwrap_or(1.0),
        _ => 1.0,
    };
    let weight = if weight.is_finite() { weight.round().max(1.0) as u32 } else { 1 };

    let healthy = obj.get("healthy").and_then(Value::as_bool).unwrap_or(true);

    Ok(Some(ServiceInstance {
        service: service.to_string(),
        url,
        weight,
        healthy,
        metadata,
    }))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Dynamic discovery
// ============================================================================

/// How long a stale list is served after a failed refresh before the
/// registry is tried again. Capped at the cache TTL.
const STALE_RETRY_BACKOFF: Duration = Duration::from_secs(5);

struct CacheEntry {
    instances: InstanceList,
    fetched_at: Instant,
    expires_at: Instant,
}

/// Registry-backed discovery with a per-service TTL cache.
///
/// A fresh cache entry is returned without suspending. Refreshes are
/// single-flight per service: while one task refreshes, others holding a
/// stale entry get it immediately instead of queueing. An unreachable
/// registry falls back to the last known list, which is then served from
/// cache for a short backoff before the registry is tried again.
pub struct DynamicServiceDiscovery {
    client: Arc<dyn RegistryClient>,
    ttl: Duration,
    retry_backoff: Duration,
    cache: DashMap<String, CacheEntry>,
    refresh_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    /// Health checker verdicts, applied on top of what the registry says
    health_overrides: DashMap<String, HashMap<String, bool>>,
}

impl DynamicServiceDiscovery {
    pub fn new(client: Arc<dyn RegistryClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            retry_backoff: STALE_RETRY_BACKOFF.min(ttl),
            cache: DashMap::new(),
            refresh_locks: DashMap::new(),
            health_overrides: DashMap::new(),
        }
    }

    fn fresh(&self, service: &str) -> Option<InstanceList> {
        self.cache
            .get(service)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.instances.clone())
    }

    fn stale(&self, service: &str) -> Option<InstanceList> {
        self.cache.get(service).map(|entry| entry.instances.clone())
    }

    fn apply_overrides(&self, service: &str, instances: &mut [ServiceInstance]) {
        if let Some(overrides) = self.health_overrides.get(service) {
            for instance in instances.iter_mut() {
                if let Some(healthy) = overrides.get(&instance.url) {
                    instance.healthy = instance.healthy && *healthy;
                }
            }
        }
    }

    fn invalidate(&self, service: &str) {
        self.cache.remove(service);
    }

    async fn refresh(&self, service: &str) -> Result<InstanceList, DiscoveryError> {
        match self.client.list_instances(service).await {
            Ok(response) => {
                let mut instances = normalize_instances(service, &response);
                self.apply_overrides(service, &mut instances);
                let instances = Arc::new(instances);
                tracing::debug!(service = %service, instances = instances.len(), "Refreshed service instances");
                let now = Instant::now();
                self.cache.insert(
                    service.to_string(),
                    CacheEntry {
                        instances: instances.clone(),
                        fetched_at: now,
                        expires_at: now + self.ttl,
                    },
                );
                Ok(instances)
            }
            Err(e) => {
                if let Some(mut entry) = self.cache.get_mut(service) {
                    tracing::warn!(
                        service = %service,
                        error = %e,
                        age_secs = entry.fetched_at.elapsed().as_secs(),
                        "Service registry unreachable, serving stale instances"
                    );
                    entry.expires_at = Instant::now() + self.retry_backoff;
                    return Ok(entry.instances.clone());
                }
                tracing::error!(service = %service, error = %e, "Service registry unreachable");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ServiceDiscovery for DynamicServiceDiscovery {
    async fn get_instances(&self, service: &str) -> Result<InstanceList, DiscoveryError> {
        if let Some(instances) = self.fresh(service) {
            return Ok(instances);
        }

        let lock = self
            .refresh_locks
            .entry(service.to_string())
            .or_default()
            .clone();

        // A refresh is already running; callers with a known list don't wait for it
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(instances) = self.stale(service) {
                    return Ok(instances);
                }
                lock.lock().await
            }
        };

        // Another task may have refreshed while we waited
        if let Some(instances) = self.fresh(service) {
            return Ok(instances);
        }

        self.refresh(service).await
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<bool, DiscoveryError> {
        let ok = self.client.register_instance(instance).await?;
        if ok {
            self.invalidate(&instance.service);
            tracing::info!(service = %instance.service, url = %instance.url, "Registered instance");
        }
        Ok(ok)
    }

    async fn deregister(&self, service: &str, url: &str) -> Result<bool, DiscoveryError> {
        let ok = self.client.deregister_instance(service, url).await?;
        if ok {
            self.invalidate(service);
            tracing::info!(service = %service, url = %url, "Deregistered instance");
        }
        Ok(ok)
    }

    fn report_health(&self, service: &str, url: &str, healthy: bool) {
        self.health_overrides
            .entry(service.to_string())
            .or_default()
            .insert(url.to_string(), healthy);

        if let Some(mut entry) = self.cache.get_mut(service)
            && entry.instances.iter().any(|i| i.url == url)
        {
            let updated: Vec<ServiceInstance> = entry
                .instances
                .iter()
                .map(|i| {
                    if i.url == url {
                        i.clone().with_health(healthy)
                    } else {
                        i.clone()
                    }
                })
                .collect();
            entry.instances = Arc::new(updated);
        }
    }

    fn known_services(&self) -> Vec<String> {
        self.cache.iter().map(|e| e.key().clone()).collect()
    }

    async fn ping(&self) -> Result<(), DiscoveryError> {
        self.client.ping().await
    }

    fn kind(&self) -> &'static str {
        "dynamic"
    }
}

/// Create service discovery based on config
pub fn create_service_discovery(
    config: &DiscoveryConfig,
    services: &ServicesFile,
) -> Arc<dyn ServiceDiscovery> {
    match config.mode {
        DiscoveryMode::Static => Arc::new(StaticServiceDiscovery::new(services)),
        DiscoveryMode::Dynamic => match HttpRegistryClient::new(config) {
            Ok(client) => {
                tracing::info!(
                    registry = config.registry_url.as_deref().unwrap_or_default(),
                    ttl_secs = config.cache_ttl_secs,
                    "Using dynamic service discovery"
                );
                Arc::new(DynamicServiceDiscovery::new(
                    Arc::new(client),
                    Duration::from_secs(config.cache_ttl_secs),
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create registry client, falling back to static");
                Arc::new(StaticServiceDiscovery::new(services))
            }
        },
    }
}
