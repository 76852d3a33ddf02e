// ============================================================================
// API Gateway
// ============================================================================
//
// Single entry point in front of backend microservices:
// route table -> discovery -> load balancer -> circuit breaker -> retry
// -> streaming proxy, with per-identifier rate limiting and trust-header
// injection.
//
// ============================================================================

pub mod audit;
pub mod auth;
pub mod context;
pub mod gateway;
pub mod health;
pub mod tasks;
pub mod utils;

pub use gateway_config as config;
pub use gateway_error as error;
pub use gateway_metrics as metrics;
