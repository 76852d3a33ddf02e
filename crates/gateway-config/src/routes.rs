// ============================================================================
// Route & Service Files
// ============================================================================
//
// routes.yaml:
//
//   routes:
//     - path: /api/v1/users/{id}
//       service: user-service
//       methods: [GET, PUT]
//       auth_required: true
//       rate_limit: 100
//       timeout: 30
//
// services.yaml:
//
//   services:
//     user-service:
//       instances:
//         - url: http://user-1:8080
//           weight: 2
//
// ============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::constants::DEFAULT_RATE_LIMIT_PER_MINUTE;

/// One route entry as written in the route file
#[derive(Clone, Debug, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub service: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_true")]
    pub auth_required: bool,
    /// Requests per minute per identifier
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Per-attempt upstream timeout in seconds; unset uses the proxy default
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    /// Drop the pattern's literal prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Replacement path, may reference `{param}` captures
    #[serde(default)]
    pub rewrite_path: Option<String>,
    /// Extra headers added to the forwarded request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RouteConfig {
    pub fn new(path: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            methods: default_methods(),
            auth_required: true,
            rate_limit: DEFAULT_RATE_LIMIT_PER_MINUTE,
            timeout: None,
            priority: 0,
            strip_prefix: false,
            rewrite_path: None,
            headers: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RoutesFile {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One backend instance in the services file
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceInstanceConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub instances: Vec<ServiceInstanceConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}

fn default_weight() -> u32 {
    1
}

/// Load the route table file
pub fn load_routes(path: impl AsRef<Path>) -> Result<RoutesFile> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read routes file {}", path.display()))?;
    let file: RoutesFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse routes file {}", path.display()))?;
    tracing::info!(path = %path.display(), routes = file.routes.len(), "Loaded routes");
    Ok(file)
}

/// Load the static service registry file
pub fn load_services(path: impl AsRef<Path>) -> Result<ServicesFile> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read services file {}", path.display()))?;
    let file: ServicesFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse services file {}", path.display()))?;
    tracing::info!(path = %path.display(), services = file.services.len(), "Loaded services");
    Ok(file)
}
