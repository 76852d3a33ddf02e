// ============================================================================
// Rate Limiting Configuration
// ============================================================================

use anyhow::{Result, bail};
use std::str::FromStr;

use crate::constants::DEFAULT_RATE_LIMIT_PER_MINUTE;
use crate::{env_flag, env_list, env_parse};

/// Counter store backing the fixed windows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateLimitBackend {
    /// Process-local counters; each gateway replica counts on its own
    #[default]
    Memory,
    /// Shared counters in Redis
    Redis,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in_memory" | "local" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => bail!("unknown rate limit backend '{}'", other),
        }
    }
}

/// How rate-limit audit records are written
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuditMode {
    /// Tracked background task, awaited at shutdown
    #[default]
    Deferred,
    /// Awaited inline before the response is returned
    Synchronous,
}

impl FromStr for AuditMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "deferred" | "background" => Ok(Self::Deferred),
            "synchronous" | "sync" => Ok(Self::Synchronous),
            other => bail!("unknown audit mode '{}'", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: RateLimitBackend,
    pub redis_url: Option<String>,
    /// Per-route minute limit used when a route does not set its own
    pub per_minute: u32,
    /// Optional global hourly limit per identifier
    pub per_hour: Option<u32>,
    /// Optional global daily limit per identifier
    pub per_day: Option<u32>,
    /// Let requests through when the counter store errors
    pub fail_open: bool,
    /// Paths whose JSON body may carry a pre-auth login identifier
    pub login_paths: Vec<String>,
    pub audit_enabled: bool,
    pub audit_mode: AuditMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RateLimitBackend::Memory,
            redis_url: None,
            per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            per_hour: None,
            per_day: None,
            fail_open: true,
            login_paths: vec![
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/api/v1/auth/login".to_string(),
                "/api/v1/auth/register".to_string(),
            ],
            audit_enabled: true,
            audit_mode: AuditMode::Deferred,
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("RATE_LIMIT_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.backend,
        };
        let audit_mode = match std::env::var("RATE_LIMIT_AUDIT_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.audit_mode,
        };

        Ok(Self {
            enabled: env_flag("RATE_LIMIT_ENABLED", defaults.enabled),
            backend,
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.per_minute),
            per_hour: std::env::var("RATE_LIMIT_PER_HOUR")
                .ok()
                .and_then(|s| s.parse().ok()),
            per_day: std::env::var("RATE_LIMIT_PER_DAY")
                .ok()
                .and_then(|s| s.parse().ok()),
            fail_open: env_flag("RATE_LIMIT_FAIL_OPEN", defaults.fail_open),
            login_paths: env_list("RATE_LIMIT_LOGIN_PATHS").unwrap_or(defaults.login_paths),
            audit_enabled: env_flag("RATE_LIMIT_AUDIT_ENABLED", defaults.audit_enabled),
            audit_mode,
        })
    }
}
