// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Per-service failure guard. Prevents cascading failures by rejecting calls
// to a backend that keeps failing.
//
// States:
// - Closed: calls pass; consecutive failures are counted, any success
//   resets the count; reaching failure_threshold opens the circuit
// - Open: calls are rejected until the retry-after deadline
// - Half-Open: up to half_open_max_calls concurrent trial calls; any failure
//   reopens, success_threshold consecutive successes close
//
// All transitions for one service happen under that breaker's own mutex.
// Each transition bumps a generation counter; outcomes reported by permits
// from an older generation are ignored.
//
// ============================================================================

use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::metrics::GATEWAY_CIRCUIT_BREAKER_STATE;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Closed: Normal operation
    Closed,
    /// Open: Service is failing, reject requests
    Open,
    /// Half-Open: Testing recovery
    HalfOpen,
}

impl CircuitState {
    /// Gauge value (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { successes: u32, in_flight: u32 },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    generation: u64,
    last_failure: Option<Instant>,
    last_transition: Instant,
}

/// Rejection issued while the circuit is open
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit open for service {service}")]
pub struct CircuitOpenError {
    pub service: String,
    /// Time until the next trial call may be admitted
    pub retry_after: Duration,
}

/// Circuit breaker error, distinguishable from the wrapped operation's own
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    #[error(transparent)]
    Inner(E),
}

/// Circuit breaker for a service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let breaker = Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed { failures: 0 },
                generation: 0,
                last_failure: None,
                last_transition: Instant::now(),
            }),
        };
        breaker.publish(CircuitState::Closed);
        breaker
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Get current state (for metrics)
    pub fn state(&self) -> CircuitState {
        self.inner.lock().phase.state()
    }

    /// Consecutive failures counted while closed
    pub fn failure_count(&self) -> u32 {
        match self.inner.lock().phase {
            Phase::Closed { failures } => failures,
            _ => 0,
        }
    }

    /// Remaining open time, if open
    pub fn retry_after(&self) -> Option<Duration> {
        match self.inner.lock().phase {
            Phase::Open { until } => Some(until.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.lock().last_failure
    }

    pub fn last_transition(&self) -> Instant {
        self.inner.lock().last_transition
    }

    /// Ask to make one call. The permit must be resolved with `success` or
    /// `failure`; dropping it unresolved counts as a failure.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.phase {
            Phase::Closed { .. } => {}
            Phase::Open { until } => {
                if now < until {
                    return Err(self.open_error(until - now));
                }
                self.transition(&mut inner, Phase::HalfOpen { successes: 0, in_flight: 0 });
                tracing::info!(service = %self.service, "Circuit breaker transitioning to half-open");
            }
            Phase::HalfOpen { .. } => {}
        }

        let half_open = match &mut inner.phase {
            Phase::HalfOpen { in_flight, .. } => {
                if *in_flight >= self.config.half_open_max_calls {
                    return Err(self.open_error(Duration::ZERO));
                }
                *in_flight += 1;
                true
            }
            _ => false,
        };

        Ok(CallPermit {
            breaker: self.clone(),
            generation: inner.generation,
            half_open,
            resolved: false,
        })
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            service: self.service.clone(),
            retry_after,
        }
    }

    fn record(&self, generation: u64, half_open: bool, success: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // The circuit moved on since this call was admitted
            return;
        }

        let now = Instant::now();
        if !success {
            inner.last_failure = Some(now);
        }

        match &mut inner.phase {
            Phase::Closed { failures } => {
                if success {
                    *failures = 0;
                    return;
                }
                *failures += 1;
                let count = *failures;
                if count >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                    tracing::warn!(
                        service = %self.service,
                        failure_count = count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            Phase::HalfOpen {
                successes,
                in_flight,
            } => {
                if half_open {
                    *in_flight = in_flight.saturating_sub(1);
                }
                if !success {
                    self.trip(&mut inner, now);
                    tracing::warn!(
                        service = %self.service,
                        "Circuit breaker reopened after failure in half-open state"
                    );
                    return;
                }
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    self.transition(&mut inner, Phase::Closed { failures: 0 });
                    tracing::info!(
                        service = %self.service,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            Phase::Open { .. } => {}
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        let until = now + self.config.open_timeout();
        self.transition(inner, Phase::Open { until });
    }

    fn transition(&self, inner: &mut Inner, phase: Phase) {
        let state = phase.state();
        inner.phase = phase;
        inner.generation += 1;
        inner.last_transition = Instant::now();
        self.publish(state);
    }

    fn publish(&self, state: CircuitState) {
        GATEWAY_CIRCUIT_BREAKER_STATE
            .with_label_values(&[self.service.as_str()])
            .set(state.as_gauge());
    }

    /// Run an async operation through the breaker. `Err` counts as failure.
    pub async fn call<T, E, Fut>(self: &Arc<Self>, operation: Fut) -> Result<T, CircuitBreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match operation.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Run a blocking operation through the breaker. `Err` counts as failure.
    pub fn call_sync<T, E, F>(self: &Arc<Self>, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;
        match operation() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }
}

/// Admission to make one call through a breaker
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    half_open: bool,
    resolved: bool,
}

impl CallPermit {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record(self.generation, self.half_open, true);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record(self.generation, self.half_open, false);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            // Cancelled mid-call (client gone, deadline hit)
            self.breaker.record(self.generation, self.half_open, false);
        }
    }
}

/// Breakers per service, created on first use
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Breaker for `service`, created on first use; `None` when disabled
    pub fn breaker_for(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        if !self.config.enabled {
            return None;
        }
        if let Some(breaker) = self.breakers.get(service) {
            return Some(breaker.clone());
        }
        Some(
            self.breakers
                .entry(service.to_string())
                .or_insert_with(|| {
                    tracing::debug!(service = %service, "Creating circuit breaker");
                    Arc::new(CircuitBreaker::new(service, self.config.clone()))
                })
                .clone(),
        )
    }

    /// Existing breaker only
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| b.clone())
    }

    pub fn contains(&self, service: &str) -> bool {
        self.breakers.contains_key(service)
    }

    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect()
    }
}
