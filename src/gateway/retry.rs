// ============================================================================
// Retry Executor
// ============================================================================
//
// Re-runs an operation while its failure is classified retryable.
//
// Delay before attempt n+1 = min(base * multiplier^(n-1), max), with full
// jitter (uniform in [0, delay]) when enabled.
//
// Circuit-open rejections, client errors and unclassified failures are
// terminal: they return after the attempt that produced them.
//
// ============================================================================

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::gateway::circuit_breaker::CircuitBreakerError;
use crate::metrics::GATEWAY_UPSTREAM_RETRIES_TOTAL;

/// Failure kinds the retry predicate decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection refused / reset before a response
    Connect,
    /// Attempt deadline elapsed
    Timeout,
    /// Backend answered 5xx
    ServerError,
    /// Caller's fault, never retried
    ClientError,
    /// Breaker rejected the call
    CircuitOpen,
    Other,
}

/// Errors that can be sorted into a [`FailureClass`]
pub trait Classify {
    fn classify(&self) -> FailureClass;
}

impl<E: Classify> Classify for CircuitBreakerError<E> {
    fn classify(&self) -> FailureClass {
        match self {
            CircuitBreakerError::Open(_) => FailureClass::CircuitOpen,
            CircuitBreakerError::Inner(e) => e.classify(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("non-retryable failure after {attempts} attempt(s): {error}")]
    NotRetryable { attempts: u32, error: E },
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NotRetryable { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::NotRetryable { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::NotRetryable { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
    retry_on_connect: bool,
    retry_on_timeout: bool,
    retry_on_server_error: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled {
                config.max_attempts.max(1)
            } else {
                1
            },
            base_delay: config.base_delay(),
            multiplier: config.multiplier,
            max_delay: config.max_delay(),
            jitter: config.jitter,
            retry_on_connect: config.retry_on_connect,
            retry_on_timeout: config.retry_on_timeout,
            retry_on_server_error: config.retry_on_server_error,
        }
    }

    /// Single attempt, nothing retried
    pub fn disabled() -> Self {
        Self::from_config(&RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, class: FailureClass) -> bool {
        match class {
            FailureClass::Connect => self.retry_on_connect,
            FailureClass::Timeout => self.retry_on_timeout,
            FailureClass::ServerError => self.retry_on_server_error,
            FailureClass::ClientError | FailureClass::CircuitOpen | FailureClass::Other => false,
        }
    }

    /// Un-jittered delay after the 1-indexed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Run `operation` (given the 1-indexed attempt number) until it
    /// succeeds, fails terminally, or runs out of attempts.
    pub async fn execute<T, E, F, Fut>(&self, service: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let class = error.classify();
            if !self.is_retryable(class) {
                return Err(RetryError::NotRetryable {
                    attempts: attempt,
                    error,
                });
            }
            if attempt >= self.max_attempts {
                tracing::warn!(
                    service = %service,
                    attempts = attempt,
                    error = %error,
                    "Upstream retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.sleep_for(attempt);
            tracing::debug!(
                service = %service,
                attempt = attempt,
                failure = ?class,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying upstream call"
            );
            GATEWAY_UPSTREAM_RETRIES_TOTAL
                .with_label_values(&[service])
                .inc();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
