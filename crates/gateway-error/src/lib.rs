use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every way a proxied request can fail before or while reaching a backend.
///
/// The dispatcher is the only place these are turned into HTTP responses;
/// components return their own typed errors and the dispatcher maps them here.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Client Errors =====
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // ===== Authentication & Authorization =====
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    // ===== Rate Limiting =====
    #[error("rate limit exceeded for {identifier} ({limit} per window)")]
    RateLimited {
        identifier: String,
        limit: u32,
        retry_after_secs: u64,
    },

    // ===== Discovery =====
    #[error("service {service} not available")]
    ServiceNotAvailable { service: String },

    #[error("no healthy instances for service {service}")]
    NoHealthyInstances { service: String },

    #[error("service registry unavailable for {service}: {reason}")]
    DiscoveryUnavailable { service: String, reason: String },

    // ===== Upstream =====
    #[error("circuit open for service {service}")]
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
    },

    #[error("upstream {service} timed out after {attempts} attempt(s)")]
    UpstreamTimeout { service: String, attempts: u32 },

    #[error("upstream {service} failed after {attempts} attempt(s): {reason}")]
    UpstreamFailure {
        service: String,
        attempts: u32,
        reason: String,
    },

    // ===== Gateway Dependencies =====
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceNotAvailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::NoHealthyInstances { .. }
            | GatewayError::DiscoveryUnavailable { .. }
            | GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CircuitOpen { .. } | GatewayError::UpstreamFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without internal details)
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::RouteNotFound { method, path } => {
                format!("No route matches {} {}", method, path)
            }
            GatewayError::BadRequest(msg) => format!("Bad request: {}", msg),
            GatewayError::PayloadTooLarge { limit } => {
                format!("Request body too large (limit {} bytes)", limit)
            }
            GatewayError::Unauthorized(msg) => format!("Authentication failed: {}", msg),
            GatewayError::Forbidden(msg) => format!("Access denied: {}", msg),
            GatewayError::RateLimited { .. } => "Rate limit exceeded".to_string(),
            GatewayError::ServiceNotAvailable { service } => {
                format!("Service {} not available", service)
            }
            GatewayError::NoHealthyInstances { service } => {
                format!("No healthy instances of {}", service)
            }
            GatewayError::DiscoveryUnavailable { .. } => {
                "Service registry unavailable".to_string()
            }
            GatewayError::CircuitOpen { service, .. } => {
                format!("Service {} is temporarily unavailable (circuit open)", service)
            }
            GatewayError::UpstreamTimeout { service, .. } => {
                format!("Service {} did not respond in time", service)
            }
            GatewayError::UpstreamFailure { service, .. } => {
                format!("Service {} request failed", service)
            }
            GatewayError::Unavailable(_) => "Gateway dependency unavailable".to_string(),
            GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::ServiceNotAvailable { .. } => "SERVICE_NOT_AVAILABLE",
            GatewayError::NoHealthyInstances { .. } => "NO_HEALTHY_INSTANCES",
            GatewayError::DiscoveryUnavailable { .. } => "DISCOVERY_UNAVAILABLE",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamFailure { .. } => "UPSTREAM_ERROR",
            GatewayError::Unavailable(_) => "DEPENDENCY_UNAVAILABLE",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Seconds a client should wait before retrying, when known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited {
                retry_after_secs, ..
            }
            | GatewayError::CircuitOpen {
                retry_after_secs, ..
            } => Some((*retry_after_secs).max(1)),
            _ => None,
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Gateway error"
            );
        } else if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            tracing::warn!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Request rejected"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // Internal faults never leak their details
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.user_message()
        };

        let body = json!({
            "error": message,
            "error_code": error_code,
            "status": status.as_u16(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        let headers = response.headers_mut();

        if let Some(secs) = self.retry_after_secs() {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if let GatewayError::RateLimited { limit, .. } = &self {
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl GatewayError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        GatewayError::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }

    pub fn service_not_available(service: impl Into<String>) -> Self {
        GatewayError::ServiceNotAvailable {
            service: service.into(),
        }
    }
}
