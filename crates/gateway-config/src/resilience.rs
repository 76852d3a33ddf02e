// ============================================================================
// Resilience Configuration (circuit breaker + retry)
// ============================================================================

use std::time::Duration;

use crate::{env_flag, env_parse};

/// Circuit breaker configuration for service resilience
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Failure threshold before opening circuit (default: 5)
    pub failure_threshold: u32,
    /// Success threshold to close circuit (default: 2)
    pub success_threshold: u32,
    /// Timeout in seconds before attempting to close circuit (default: 60)
    pub timeout_secs: u64,
    /// Trial calls admitted concurrently while half-open (default: 3)
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("CIRCUIT_BREAKER_ENABLED", defaults.enabled),
            failure_threshold: std::env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            success_threshold: std::env::var("CIRCUIT_BREAKER_SUCCESS_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.success_threshold),
            timeout_secs: std::env::var("CIRCUIT_BREAKER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            half_open_max_calls: env_parse(
                "CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS",
                defaults.half_open_max_calls,
            ),
        }
    }
}

/// Retry policy parameters for upstream calls
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Full jitter: each delay drawn uniformly from [0, delay]
    pub jitter: bool,
    pub retry_on_connect: bool,
    pub retry_on_timeout: bool,
    pub retry_on_server_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
            retry_on_connect: true,
            retry_on_timeout: true,
            retry_on_server_error: true,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("RETRY_ENABLED", defaults.enabled),
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.max_attempts),
            base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
            multiplier: env_parse("RETRY_MULTIPLIER", defaults.multiplier),
            max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
            jitter: env_flag("RETRY_JITTER", defaults.jitter),
            retry_on_connect: env_flag("RETRY_ON_CONNECT", defaults.retry_on_connect),
            retry_on_timeout: env_flag("RETRY_ON_TIMEOUT", defaults.retry_on_timeout),
            retry_on_server_error: env_flag(
                "RETRY_ON_SERVER_ERROR",
                defaults.retry_on_server_error,
            ),
        }
    }
}
