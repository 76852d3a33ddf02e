// ============================================================================
// Test Utilities for the API gateway
// ============================================================================
//
// Spawns mock backend services on 127.0.0.1:0 and builds gateway routers
// wired to them. Gateway requests are driven with tower's `oneshot`, so no
// gateway listener is needed.
//
// ============================================================================

#![allow(dead_code)]

use api_gateway::auth::{Authenticator, JwtAuthenticator};
use api_gateway::config::{GatewayConfig, RouteConfig};
use api_gateway::gateway::discovery::{ServiceInstance, StaticServiceDiscovery};
use api_gateway::gateway::{GatewayRouter, GatewayState, router};
use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use jsonwebtoken::{EncodingKey, Header, encode};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

pub const JWT_SECRET: &str = "test-secret-for-gateway";

/// A running mock backend
#[derive(Clone)]
pub struct MockBackend {
    pub url: String,
    hits: Arc<AtomicUsize>,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Headers of the most recent request the backend saw
    pub fn last_headers(&self) -> HeaderMap {
        self.last_headers.lock().clone().unwrap_or_default()
    }
}

/// Serve `router` on an ephemeral port
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Backend whose handler is `respond(hit_number, request_parts_as_json)`.
/// Every request is counted and its headers recorded before responding.
pub async fn spawn_backend<F, Fut>(respond: F) -> MockBackend
where
    F: Fn(usize, Value) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response<Body>> + Send + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let last_headers = Arc::new(Mutex::new(None));

    let handler = {
        let hits = hits.clone();
        let last_headers = last_headers.clone();
        move |request: Request| {
            let hits = hits.clone();
            let last_headers = last_headers.clone();
            let respond = respond.clone();
            async move {
                let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
                *last_headers.lock() = Some(request.headers().clone());
                let echo = echo_json(request).await;
                respond(hit, echo).await
            }
        }
    };

    let addr = spawn_router(Router::new().fallback(handler)).await;
    MockBackend {
        url: format!("http://{}", addr),
        hits,
        last_headers,
    }
}

/// Backend that answers `status` with a JSON echo of the request
pub async fn spawn_echo_backend(status: StatusCode) -> MockBackend {
    spawn_backend(move |_, echo| async move { (status, axum::Json(echo)).into_response() }).await
}

/// Backend that sleeps `delay` before answering 200
pub async fn spawn_slow_backend(delay: Duration) -> MockBackend {
    spawn_backend(move |_, _| async move {
        tokio::time::sleep(delay).await;
        "late".into_response()
    })
    .await
}

/// Address nobody listens on
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

async fn echo_json(request: Request) -> Value {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&bytes),
    })
}

/// Gateway config with deterministic resilience settings for tests
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.retry.enabled = false;
    config.health_check.enabled = false;
    config.rate_limit.audit_enabled = false;
    config.auth.jwt_secret = Some(JWT_SECRET.to_string());
    config
}

/// Public route for any method
pub fn public_route(path: &str, service: &str) -> RouteConfig {
    RouteConfig {
        methods: vec!["*".to_string()],
        auth_required: false,
        ..RouteConfig::new(path, service)
    }
}

pub fn instance(service: &str, url: &str) -> ServiceInstance {
    ServiceInstance::new(service, url)
}

/// A built gateway plus the handles tests poke at
pub struct TestGateway {
    pub state: Arc<GatewayState>,
    pub app: Router,
    pub discovery: Arc<StaticServiceDiscovery>,
}

pub async fn spawn_gateway(
    config: GatewayConfig,
    routes: Vec<RouteConfig>,
    instances: Vec<ServiceInstance>,
) -> TestGateway {
    let discovery = Arc::new(StaticServiceDiscovery::from_instances(instances));
    let authenticator = config.auth.jwt_secret.as_deref().map(|secret| {
        Arc::new(JwtAuthenticator::new(secret, "HS256").unwrap()) as Arc<dyn Authenticator>
    });

    let state = GatewayRouter::builder(config)
        .routes(routes)
        .static_discovery(discovery.clone())
        .authenticator(authenticator)
        .build()
        .await
        .expect("Failed to build gateway");

    TestGateway {
        app: router(state.clone()),
        state,
        discovery,
    }
}

/// Signed access token for `sub`
pub fn token(sub: &str, roles: &[&str]) -> String {
    let claims = json!({
        "sub": sub,
        "exp": chrono::Utc::now().timestamp() + 3600,
        "roles": roles,
        "permissions": ["read"],
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
