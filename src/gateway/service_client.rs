// ============================================================================
// Service Client
// ============================================================================
//
// HTTP client for communicating with backend instances.
// Handles:
// - Sending one forwarded request (one attempt) under a deadline
// - Classifying failures for the retry policy and circuit breaker
// - Relaying the backend response as a stream
// - Instance health probes
//
// The attempt deadline covers connect + response headers. The body is
// streamed afterwards without a deadline so large downloads are not cut.
//
// ============================================================================

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::context::strip_hop_by_hop;
use crate::gateway::retry::{Classify, FailureClass};
use crate::utils::join_url;

/// One forwarded request, reusable across attempts
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("no response from {url} within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} answered {status}")]
    ServerError { url: String, status: StatusCode },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }
}

impl Classify for UpstreamError {
    fn classify(&self) -> FailureClass {
        match self {
            UpstreamError::Connect { .. } => FailureClass::Connect,
            UpstreamError::Timeout { .. } => FailureClass::Timeout,
            UpstreamError::ServerError { .. } => FailureClass::ServerError,
            UpstreamError::Request { .. } => FailureClass::Other,
        }
    }
}

/// HTTP client for forwarding requests to backend instances
#[derive(Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
}

impl ServiceClient {
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        // Connection pooling and keep-alive; redirects are relayed, not followed
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// Make one attempt. A 5xx answer is reported as `ServerError`; any
    /// other status is returned for relaying.
    pub async fn send(&self, request: &UpstreamRequest) -> Result<reqwest::Response, UpstreamError> {
        let builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone());

        let response = match tokio::time::timeout(request.timeout, builder.send()).await {
            Err(_) => {
                return Err(UpstreamError::Timeout {
                    url: request.url.clone(),
                    timeout: request.timeout,
                });
            }
            Ok(Err(e)) => return Err(classify_reqwest(&request.url, request.timeout, e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(UpstreamError::ServerError {
                url: request.url.clone(),
                status,
            });
        }
        Ok(response)
    }

    /// GET `{base_url}{path}`; healthy when it answers 2xx within `timeout`
    pub async fn check_health(&self, base_url: &str, path: &str, timeout: Duration) -> bool {
        let health_url = join_url(base_url, path);
        match self.client.get(&health_url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %health_url, error = %e, "Service health check failed");
                false
            }
        }
    }
}

fn classify_reqwest(url: &str, timeout: Duration, e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else if e.is_connect() {
        UpstreamError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        UpstreamError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Convert a backend response into an axum response without buffering.
/// `guard` is held until the body has been fully streamed or dropped.
pub fn relay_response<G>(upstream: reqwest::Response, guard: G) -> Response<Body>
where
    G: Send + 'static,
{
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let stream = upstream.bytes_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
