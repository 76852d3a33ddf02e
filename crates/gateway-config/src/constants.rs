// ============================================================================
// Configuration Constants
// ============================================================================

// Listener
pub(crate) const DEFAULT_PORT: u16 = 8000;
pub(crate) const DEFAULT_BIND_HOST: &str = "0.0.0.0";

// Configuration sources handed to the gateway at startup
pub(crate) const DEFAULT_ROUTES_FILE: &str = "config/routes.yaml";
pub(crate) const DEFAULT_SERVICES_FILE: &str = "config/services.yaml";

// Upstream calls
pub(crate) const DEFAULT_ROUTE_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;
pub(crate) const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;

// Rate limiting
pub(crate) const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

// Graceful shutdown
pub(crate) const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

// Time conversion constants
pub const SECONDS_PER_MINUTE: u64 = 60;
pub const SECONDS_PER_HOUR: u64 = 3600;
pub const SECONDS_PER_DAY: u64 = 86400;

/// Largest request body the gateway buffers for forwarding (10 MB)
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;
