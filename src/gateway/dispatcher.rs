// ============================================================================
// Dispatcher - per-request pipeline
// ============================================================================
//
// MatchRoute -> Authenticate -> RateLimit -> Resolve -> Select
//   -> Retry(CircuitBreaker(HTTP call)) -> Relay
//
// Every stage returns a typed error; this is the only place those errors
// become HTTP responses. The instance is selected once per request and all
// retries go to it. The breaker for a service is created only once an
// instance has been selected.
//
// ============================================================================

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use axum::response::IntoResponse;
use bytes::Bytes;
use std::sync::Arc;

use crate::auth::{AuthError, Authenticator};
use crate::context::{RequestContext, RequestIds, sanitize_inbound};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::gateway::discovery::{DiscoveryError, ServiceDiscovery};
use crate::gateway::load_balancer::{LoadBalancer, LoadBalancerError, Selection};
use crate::gateway::rate_limit::{
    RateLimitDecision, RateLimiter, extract_login_identifier, resolve_identifier,
};
use crate::gateway::retry::{RetryError, RetryPolicy};
use crate::gateway::route_table::{RouteMatch, RouteTable};
use crate::gateway::service_client::{ServiceClient, UpstreamError, UpstreamRequest, relay_response};
use crate::metrics::{GATEWAY_REQUEST_DURATION_SECONDS, GATEWAY_REQUESTS_TOTAL};
use crate::utils::join_url;

const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Label for requests that never reached a service
const UNROUTED: &str = "unrouted";

type CallError = CircuitBreakerError<UpstreamError>;

pub struct Dispatcher {
    pub(crate) routes: Arc<RouteTable>,
    pub(crate) discovery: Arc<dyn ServiceDiscovery>,
    pub(crate) load_balancer: Arc<LoadBalancer>,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) retry: RetryPolicy,
    pub(crate) client: ServiceClient,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) api_key_header: HeaderName,
    pub(crate) max_body_bytes: usize,
}

impl Dispatcher {
    /// Run one request through the pipeline. Never fails: errors are
    /// rendered as responses.
    pub async fn dispatch(
        &self,
        ids: RequestIds,
        client_ip: String,
        request: Request<Body>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext::new(
            ids,
            parts.method.clone(),
            parts.uri.path(),
            parts.uri.query().map(str::to_string),
            client_ip,
        );

        let response = match self.run(&mut ctx, parts.headers, body).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        };

        let service = ctx.service.as_deref().unwrap_or(UNROUTED);
        GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[service, response.status().as_str()])
            .inc();
        GATEWAY_REQUEST_DURATION_SECONDS
            .with_label_values(&[service])
            .observe(ctx.started_at.elapsed().as_secs_f64());

        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            service = %service,
            status = response.status().as_u16(),
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            "Request dispatched"
        );

        response
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        headers: HeaderMap,
        body: Body,
    ) -> GatewayResult<Response<Body>> {
        let RouteMatch { route, params } = self
            .routes
            .match_route(&ctx.method, &ctx.path)
            .ok_or_else(|| GatewayError::RouteNotFound {
                method: ctx.method.to_string(),
                path: ctx.path.clone(),
            })?;
        ctx.service = Some(route.service.clone());
        ctx.path_params = params;

        ctx.identity = self.authenticate(&headers, route.auth_required).await?;

        let body = self.read_body(&headers, body).await?;

        let decision = match &self.rate_limiter {
            Some(limiter) => Some(
                self.check_rate_limit(limiter, ctx, &headers, &body, route.path(), route.rate_limit)
                    .await?,
            ),
            None => None,
        };

        let service = route.service.as_str();
        let instances = self
            .discovery
            .get_instances(service)
            .await
            .map_err(|e| match e {
                DiscoveryError::Unavailable(reason) | DiscoveryError::Rejected(reason) => {
                    GatewayError::DiscoveryUnavailable {
                        service: service.to_string(),
                        reason,
                    }
                }
            })?;
        if instances.is_empty() {
            return Err(GatewayError::service_not_available(service));
        }

        let Selection { instance, guard } = self
            .load_balancer
            .select(service, &instances)
            .map_err(|LoadBalancerError::NoHealthyInstances(service)| {
                GatewayError::NoHealthyInstances { service }
            })?;

        let upstream = self.upstream_request(ctx, &route, headers, body, &instance.url);
        let breaker = self.breakers.breaker_for(service);
        let client = &self.client;
        let request = &upstream;

        let result = self
            .retry
            .execute(service, |attempt| {
                let breaker = breaker.clone();
                async move {
                    tracing::trace!(instance = %request.url, attempt = attempt, "Calling upstream");
                    match breaker {
                        Some(breaker) => breaker.call(client.send(request)).await,
                        None => client.send(request).await.map_err(CircuitBreakerError::Inner),
                    }
                }
            })
            .await;

        let upstream_response = result.map_err(|e| upstream_error(service, e))?;
        let mut response = relay_response(upstream_response, guard);

        if let Some(decision) = decision.filter(RateLimitDecision::is_limited) {
            let headers = response.headers_mut();
            headers.insert(HEADER_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
            headers.insert(HEADER_RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
        }

        Ok(response)
    }

    /// Identity for the request. Required routes reject missing or bad
    /// credentials; other routes use them when they verify.
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        required: bool,
    ) -> GatewayResult<Option<crate::auth::Identity>> {
        let Some(authenticator) = &self.authenticator else {
            if required {
                return Err(GatewayError::unauthorized("authentication is not configured"));
            }
            return Ok(None);
        };

        match authenticator.authenticate(headers).await {
            Ok(identity) => Ok(Some(identity)),
            Err(e) if required => Err(e.into()),
            Err(AuthError::MissingCredentials) => Ok(None),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid credentials on public route");
                Ok(None)
            }
        }
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> GatewayResult<Bytes> {
        let limit = self.max_body_bytes;
        let declared = headers
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(GatewayError::PayloadTooLarge { limit });
        }

        axum::body::to_bytes(body, limit).await.map_err(|e| {
            let too_large = e
                .into_inner()
                .downcast_ref::<http_body_util::LengthLimitError>()
                .is_some();
            if too_large {
                GatewayError::PayloadTooLarge { limit }
            } else {
                GatewayError::bad_request("failed to read request body")
            }
        })
    }

    async fn check_rate_limit(
        &self,
        limiter: &RateLimiter,
        ctx: &RequestContext,
        headers: &HeaderMap,
        body: &Bytes,
        route_path: &str,
        route_limit: u32,
    ) -> GatewayResult<RateLimitDecision> {
        let login = if ctx.identity.is_none() && limiter.is_login_path(&ctx.path) {
            extract_login_identifier(body)
        } else {
            None
        };
        let api_key = headers
            .get(&self.api_key_header)
            .and_then(|v| v.to_str().ok());

        let identifier = resolve_identifier(ctx.user_id(), login.as_deref(), api_key, &ctx.client_ip);
        let decision = limiter.check(&identifier, route_path, route_limit).await?;

        if !decision.allowed {
            return Err(GatewayError::RateLimited {
                identifier: identifier.to_string(),
                limit: decision.limit,
                retry_after_secs: decision.reset_after.as_secs().max(1),
            });
        }
        Ok(decision)
    }

    fn upstream_request(
        &self,
        ctx: &RequestContext,
        route: &crate::gateway::route_table::RouteDefinition,
        mut headers: HeaderMap,
        body: Bytes,
        instance_url: &str,
    ) -> UpstreamRequest {
        sanitize_inbound(&mut headers);
        headers.extend(ctx.forward_headers());
        for (name, value) in &route.headers {
            headers.insert(name.clone(), value.clone());
        }

        let path = route.forwarded_path(&ctx.path, &ctx.path_params);
        let mut url = join_url(instance_url, &path);
        if let Some(query) = &ctx.query {
            url.push('?');
            url.push_str(query);
        }

        UpstreamRequest {
            method: ctx.method.clone(),
            url,
            headers,
            body,
            timeout: route.timeout,
        }
    }
}

fn upstream_error(service: &str, err: RetryError<CallError>) -> GatewayError {
    let attempts = err.attempts();
    match err.into_inner() {
        CircuitBreakerError::Open(open) => GatewayError::CircuitOpen {
            service: service.to_string(),
            retry_after_secs: open.retry_after.as_secs(),
        },
        CircuitBreakerError::Inner(e) if e.is_timeout() => GatewayError::UpstreamTimeout {
            service: service.to_string(),
            attempts,
        },
        CircuitBreakerError::Inner(e) => GatewayError::UpstreamFailure {
            service: service.to_string(),
            attempts,
            reason: e.to_string(),
        },
    }
}
