// ============================================================================
// Gateway Config - configuration for the API gateway process
// ============================================================================
//
// Everything the gateway core needs arrives as plain structs built here,
// once, at process start. Values come from environment variables (with an
// optional `.env` file) and from the route/service YAML files.
//
// ============================================================================

mod auth;
mod constants;
mod discovery;
mod load_balancer;
mod logging;
mod proxy;
mod rate_limit;
mod resilience;
mod routes;

pub use auth::AuthConfig;
pub use constants::{
    MAX_REQUEST_BODY_SIZE, SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE,
};
pub use discovery::{DiscoveryConfig, DiscoveryMode};
pub use load_balancer::{LoadBalancerConfig, LoadBalancingStrategy};
pub use logging::LoggingConfig;
pub use proxy::{HealthCheckConfig, ProxyConfig};
pub use rate_limit::{AuditMode, RateLimitBackend, RateLimitConfig};
pub use resilience::{CircuitBreakerConfig, RetryConfig};
pub use routes::{
    RouteConfig, RoutesFile, ServiceConfig, ServiceInstanceConfig, ServicesFile, load_routes,
    load_services,
};

use anyhow::{Result, bail};
use constants::*;
use std::str::FromStr;

/// Top-level gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind_address: String,
    pub rust_log: String,

    /// Path of the YAML route table
    pub routes_file: String,
    /// Path of the YAML static service registry
    pub services_file: String,

    /// How long shutdown waits for in-flight background work
    pub shutdown_grace_secs: u64,

    // Sub-configurations
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub discovery: DiscoveryConfig,
    pub load_balancer: LoadBalancerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub health_check: HealthCheckConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: format!("{}:{}", DEFAULT_BIND_HOST, DEFAULT_PORT),
            rust_log: "info".to_string(),
            routes_file: DEFAULT_ROUTES_FILE.to_string(),
            services_file: DEFAULT_SERVICES_FILE.to_string(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            discovery: DiscoveryConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let host = std::env::var("BIND_HOST").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());

        let config = Self {
            port,
            bind_address: format!("{}:{}", host, port),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            routes_file: std::env::var("ROUTES_FILE")
                .unwrap_or_else(|_| DEFAULT_ROUTES_FILE.to_string()),
            services_file: std::env::var("SERVICES_FILE")
                .unwrap_or_else(|_| DEFAULT_SERVICES_FILE.to_string()),
            shutdown_grace_secs: env_parse("SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS),
            logging: LoggingConfig::from_env(),
            auth: AuthConfig::from_env(),
            discovery: DiscoveryConfig::from_env()?,
            load_balancer: LoadBalancerConfig::from_env()?,
            circuit_breaker: CircuitBreakerConfig::from_env(),
            retry: RetryConfig::from_env(),
            rate_limit: RateLimitConfig::from_env()?,
            proxy: ProxyConfig::from_env(),
            health_check: HealthCheckConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            bail!("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be at least 1");
        }
        if cb.success_threshold == 0 {
            bail!("CIRCUIT_BREAKER_SUCCESS_THRESHOLD must be at least 1");
        }
        if cb.half_open_max_calls == 0 {
            bail!("CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS must be at least 1");
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            bail!(
                "RETRY_MULTIPLIER must be a finite value >= 1.0 (got {})",
                retry.multiplier
            );
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            bail!(
                "RETRY_MAX_DELAY_MS ({}) must not be below RETRY_BASE_DELAY_MS ({})",
                retry.max_delay_ms,
                retry.base_delay_ms
            );
        }

        if self.rate_limit.enabled && self.rate_limit.per_minute == 0 {
            bail!("RATE_LIMIT_PER_MINUTE must be at least 1 when rate limiting is enabled");
        }
        if self.rate_limit.backend == RateLimitBackend::Redis && self.rate_limit.redis_url.is_none()
        {
            bail!("REDIS_URL is required when RATE_LIMIT_BACKEND=redis");
        }

        if self.discovery.mode == DiscoveryMode::Dynamic && self.discovery.registry_url.is_none() {
            bail!("SERVICE_REGISTRY_URL is required when SERVICE_DISCOVERY_MODE=dynamic");
        }

        if self.health_check.enabled && self.health_check.interval_secs == 0 {
            bail!("HEALTH_CHECK_INTERVAL_SECS must be at least 1");
        }

        Ok(())
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or malformed.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flag: "true"/"1"/"yes" (any case) enable, anything else disables.
pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

/// Comma separated list, empty items dropped
pub(crate) fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
