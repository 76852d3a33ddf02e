// ============================================================================
// Gateway Router
// ============================================================================
//
// Builds the gateway state from configuration and exposes it as an axum
// Router:
// - GET /health  -> liveness
// - GET /ready   -> readiness (discovery + rate-limit store)
// - GET /metrics -> Prometheus scrape
// - anything else -> dispatcher (route table decides)
//
// Collaborators (discovery, authenticator, counter store, audit sink,
// random source) can be injected through the builder; otherwise they are
// created from configuration.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditWriter, RecordSink, TracingRecordSink};
use crate::auth::{Authenticator, JwtAuthenticator};
use crate::config::{
    DiscoveryMode, GatewayConfig, RateLimitBackend, RouteConfig, ServicesFile,
};
use crate::context::RequestIds;
use crate::gateway::circuit_breaker::CircuitBreakerRegistry;
use crate::gateway::discovery::{
    ServiceDiscovery, StaticServiceDiscovery, create_service_discovery,
};
use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::health_checker::HealthChecker;
use crate::gateway::load_balancer::{LoadBalancer, RandomSource};
use crate::gateway::middleware::request_context;
use crate::gateway::rate_limit::{
    InMemoryRateLimitStore, RateLimitStore, RateLimiter, RedisRateLimitStore,
};
use crate::gateway::retry::RetryPolicy;
use crate::gateway::route_table::RouteTable;
use crate::gateway::service_client::ServiceClient;
use crate::health;
use crate::metrics::{METRICS_CONTENT_TYPE, gather_metrics};
use crate::tasks::BackgroundTasks;
use crate::utils::extract_client_ip;

/// Gateway router state
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub dispatcher: Dispatcher,
    pub routes: Arc<RouteTable>,
    pub discovery: Arc<dyn ServiceDiscovery>,
    /// Present when the static registry is in use; target of reloads
    pub static_discovery: Option<Arc<StaticServiceDiscovery>>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub load_balancer: Arc<LoadBalancer>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub client: ServiceClient,
    pub tasks: Arc<BackgroundTasks>,
}

impl GatewayState {
    /// Swap in freshly loaded routes and services. On error the previous
    /// route table stays active.
    pub fn reload(&self, routes: &[RouteConfig], services: &ServicesFile) -> Result<usize> {
        let count = self
            .routes
            .reload(routes)
            .context("Route table reload rejected")?;

        match &self.static_discovery {
            Some(discovery) => discovery.reload(services),
            None => tracing::debug!("Dynamic discovery in use, services file not reloaded"),
        }

        tracing::info!(routes = count, "Gateway configuration reloaded");
        Ok(count)
    }

    /// Start active health checking as a tracked background task
    pub fn spawn_health_checker(&self, shutdown: watch::Receiver<bool>) {
        if !self.config.health_check.enabled {
            tracing::info!("Active health checking disabled");
            return;
        }
        let checker = HealthChecker::new(
            self.discovery.clone(),
            self.client.clone(),
            self.config.health_check.clone(),
        );
        self.tasks.spawn("health_checker", checker.run(shutdown));
    }
}

/// Gateway router builder
pub struct GatewayRouter {
    config: GatewayConfig,
    routes: Vec<RouteConfig>,
    services: ServicesFile,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    static_discovery: Option<Arc<StaticServiceDiscovery>>,
    authenticator: Option<Option<Arc<dyn Authenticator>>>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    record_sink: Option<Arc<dyn RecordSink>>,
    random: Option<Arc<dyn RandomSource>>,
    tasks: Option<Arc<BackgroundTasks>>,
}

impl GatewayRouter {
    pub fn builder(config: GatewayConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            services: ServicesFile::default(),
            discovery: None,
            static_discovery: None,
            authenticator: None,
            rate_limit_store: None,
            record_sink: None,
            random: None,
            tasks: None,
        }
    }

    pub fn routes(mut self, routes: Vec<RouteConfig>) -> Self {
        self.routes = routes;
        self
    }

    pub fn services(mut self, services: ServicesFile) -> Self {
        self.services = services;
        self
    }

    /// Use this discovery backend instead of building one from config
    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self.static_discovery = None;
        self
    }

    /// Use a static registry that the caller keeps a handle to
    pub fn static_discovery(mut self, discovery: Arc<StaticServiceDiscovery>) -> Self {
        self.discovery = Some(discovery.clone());
        self.static_discovery = Some(discovery);
        self
    }

    /// `None` disables authentication (auth-required routes answer 401)
    pub fn authenticator(mut self, authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = Some(store);
        self
    }

    pub fn record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.record_sink = Some(sink);
        self
    }

    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn background_tasks(mut self, tasks: Arc<BackgroundTasks>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Create gateway state
    pub async fn build(self) -> Result<Arc<GatewayState>> {
        let config = Arc::new(self.config);

        let routes = Arc::new(
            RouteTable::from_configs(&self.routes, config.proxy.default_timeout())
                .context("Invalid route table")?,
        );
        tracing::info!(routes = routes.len(), "Route table loaded");

        let (discovery, static_discovery) = match (self.discovery, config.discovery.mode) {
            (Some(discovery), _) => (discovery, self.static_discovery),
            (None, DiscoveryMode::Static) => {
                let discovery = Arc::new(StaticServiceDiscovery::new(&self.services));
                (discovery.clone() as Arc<dyn ServiceDiscovery>, Some(discovery))
            }
            (None, DiscoveryMode::Dynamic) => {
                (create_service_discovery(&config.discovery, &self.services), None)
            }
        };
        tracing::info!(discovery = discovery.kind(), "Service discovery ready");

        let load_balancer = Arc::new(match self.random {
            Some(random) => LoadBalancer::with_random(&config.load_balancer, random),
            None => LoadBalancer::new(&config.load_balancer),
        });
        tracing::info!(strategy = %config.load_balancer.strategy, "Load balancer ready");

        let authenticator: Option<Arc<dyn Authenticator>> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => JwtAuthenticator::from_config(&config.auth)?
                .map(|a| Arc::new(a) as Arc<dyn Authenticator>),
        };
        if authenticator.is_none() {
            tracing::warn!("No JWT secret configured: auth-required routes will answer 401");
        }

        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(BackgroundTasks::new()));

        let rate_limiter = if config.rate_limit.enabled {
            let store: Arc<dyn RateLimitStore> = match self.rate_limit_store {
                Some(store) => store,
                None => match config.rate_limit.backend {
                    RateLimitBackend::Memory => Arc::new(InMemoryRateLimitStore::new()),
                    RateLimitBackend::Redis => {
                        let url = config
                            .rate_limit
                            .redis_url
                            .as_deref()
                            .context("REDIS_URL is required for the redis rate limit backend")?;
                        Arc::new(RedisRateLimitStore::connect(url).await?)
                    }
                },
            };
            let audit = config.rate_limit.audit_enabled.then(|| {
                let sink = self
                    .record_sink
                    .unwrap_or_else(|| Arc::new(TracingRecordSink));
                Arc::new(AuditWriter::new(sink, config.rate_limit.audit_mode, tasks.clone()))
            });
            tracing::info!(store = store.kind(), per_minute = config.rate_limit.per_minute, "Rate limiting enabled");
            Some(Arc::new(RateLimiter::new(config.rate_limit.clone(), store, audit)))
        } else {
            tracing::info!("Rate limiting disabled");
            None
        };

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let client = ServiceClient::new(&config.proxy).context("Failed to create HTTP client")?;
        let api_key_header = HeaderName::try_from(config.auth.api_key_header.as_str())
            .context("Invalid API key header name")?;

        let dispatcher = Dispatcher {
            routes: routes.clone(),
            discovery: discovery.clone(),
            load_balancer: load_balancer.clone(),
            breakers: breakers.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            client: client.clone(),
            rate_limiter: rate_limiter.clone(),
            authenticator,
            api_key_header,
            max_body_bytes: config.proxy.max_body_bytes,
        };

        Ok(Arc::new(GatewayState {
            config,
            dispatcher,
            routes,
            discovery,
            static_discovery,
            breakers,
            load_balancer,
            rate_limiter,
            client,
            tasks,
        }))
    }
}

/// Assemble the axum application
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Gateway's own endpoints (never proxied)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .fallback(proxy)
        .layer(
            // request_context runs first so the access span can carry the ids
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_context))
                .layer(TraceLayer::new_for_http().make_span_with(access_span))
                .into_inner(),
        )
        .with_state(state)
}

fn access_span(request: &Request<Body>) -> tracing::Span {
    let ids = request.extensions().get::<RequestIds>();
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
        request_id = %ids.map(|ids| ids.request_id.as_str()).unwrap_or_default(),
        trace_id = %ids.map(|ids| ids.trace_id.as_str()).unwrap_or_default(),
    )
}

/// Route request to the backend chosen by the route table
pub async fn proxy(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> Response {
    let ids = request
        .extensions()
        .get::<RequestIds>()
        .cloned()
        .unwrap_or_else(|| RequestIds::from_headers(request.headers()));
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = extract_client_ip(request.headers(), peer);

    state.dispatcher.dispatch(ids, client_ip, request).await
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(health::liveness())
}

/// GET /ready
async fn readiness_check(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let store = state.rate_limiter.as_ref().map(|l| l.store().as_ref());
    let report = health::readiness(state.discovery.as_ref(), store).await;
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /metrics
async fn metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(metrics_data) => (
            StatusCode::OK,
            [("Content-Type", METRICS_CONTENT_TYPE)],
            metrics_data,
        ),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                "Internal Server Error".to_string(),
            )
        }
    }
}
