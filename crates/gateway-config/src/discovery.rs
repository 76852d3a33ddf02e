// ============================================================================
// Service Discovery Configuration
// ============================================================================

use anyhow::{Result, bail};
use serde::Deserialize;
use std::str::FromStr;

use crate::env_parse;

/// Where service instances come from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Fixed mapping loaded from the services file
    #[default]
    Static,
    /// External registry queried over HTTP
    Dynamic,
}

impl FromStr for DiscoveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "dynamic" | "nacos" | "registry" => Ok(Self::Dynamic),
            other => bail!("unknown service discovery mode '{}'", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    /// Registry base URL, e.g. "http://nacos:8848" (dynamic mode only)
    pub registry_url: Option<String>,
    pub namespace: String,
    pub group: String,
    /// How long a resolved instance list is served from cache
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Static,
            registry_url: None,
            namespace: "public".to_string(),
            group: "DEFAULT_GROUP".to_string(),
            cache_ttl_secs: 30,
            request_timeout_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mode = match std::env::var("SERVICE_DISCOVERY_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.mode,
        };

        Ok(Self {
            mode,
            registry_url: std::env::var("SERVICE_REGISTRY_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            namespace: std::env::var("SERVICE_REGISTRY_NAMESPACE").unwrap_or(defaults.namespace),
            group: std::env::var("SERVICE_REGISTRY_GROUP").unwrap_or(defaults.group),
            cache_ttl_secs: env_parse("DISCOVERY_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            request_timeout_secs: env_parse(
                "DISCOVERY_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
        })
    }
}
