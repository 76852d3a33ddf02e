// ============================================================================
// API Gateway core
// ============================================================================
//
// The gateway acts as a single entry point for all client requests.
// It handles:
// - Route matching (method + path pattern, priority ordered)
// - Service discovery (static file or Nacos-style registry)
// - Load balancing between service instances
// - Circuit breaking and retries per service
// - Rate limiting per identifier
// - Trust-header injection and streaming relay
//
// Architecture:
// - Stateless apart from counters (can scale horizontally with the Redis
//   rate-limit store)
// - Route table and static registry are swapped atomically on reload
//
// ============================================================================

pub mod circuit_breaker;
pub mod discovery;
pub mod dispatcher;
pub mod health_checker;
pub mod load_balancer;
pub mod middleware;
pub mod rate_limit;
pub mod retry;
pub mod route_table;
pub mod router;
pub mod service_client;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use discovery::{ServiceDiscovery, ServiceInstance, StaticServiceDiscovery};
pub use dispatcher::Dispatcher;
pub use load_balancer::LoadBalancer;
pub use rate_limit::{RateLimitStore, RateLimiter};
pub use retry::RetryPolicy;
pub use route_table::RouteTable;
pub use router::{GatewayRouter, GatewayState, router};
pub use service_client::ServiceClient;
