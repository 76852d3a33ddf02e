// ============================================================================
// Proxy & Health Check Configuration
// ============================================================================

use std::time::Duration;

use crate::constants::*;
use crate::env_flag;
use crate::env_parse;

/// Outbound HTTP client settings
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Per-attempt timeout for routes that do not set one
    pub default_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    /// Larger request bodies are rejected with 413
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_ROUTE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            pool_idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            max_body_bytes: MAX_REQUEST_BODY_SIZE,
        }
    }
}

impl ProxyConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout_secs: env_parse("SERVICE_TIMEOUT_SECS", defaults.default_timeout_secs),
            connect_timeout_secs: env_parse(
                "SERVICE_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            pool_idle_timeout_secs: env_parse(
                "POOL_IDLE_TIMEOUT_SECS",
                defaults.pool_idle_timeout_secs,
            ),
            pool_max_idle_per_host: env_parse(
                "POOL_MAX_IDLE_PER_HOST",
                defaults.pool_max_idle_per_host,
            ),
            max_body_bytes: env_parse("MAX_REQUEST_BODY_BYTES", defaults.max_body_bytes),
        }
    }
}

/// Active health probing of known instances
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Path probed on every instance
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            path: "/health".to_string(),
            timeout_secs: 5,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("HEALTH_CHECK_ENABLED", defaults.enabled),
            interval_secs: env_parse("HEALTH_CHECK_INTERVAL_SECS", defaults.interval_secs),
            path: std::env::var("HEALTH_CHECK_PATH").unwrap_or(defaults.path),
            timeout_secs: env_parse("HEALTH_CHECK_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }
}
