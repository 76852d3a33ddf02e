// ============================================================================
// Gateway Pipeline Tests
// ============================================================================
//
// End-to-end behaviour of the dispatcher against mock backends:
// - Login passthrough, missing services, circuit opening on timeouts
// - Route matching errors, authentication, rate limiting
// - Trust headers and request/trace ids
// - Retries, streaming relay, reload
// - Health, readiness and metrics endpoints
//
// ============================================================================

use api_gateway::config::{RouteConfig, ServicesFile};
use api_gateway::gateway::CircuitState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

mod test_utils;
use test_utils::*;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_login_request_relayed_verbatim() {
    let backend = spawn_echo_backend(StatusCode::CREATED).await;
    let route = RouteConfig {
        methods: vec!["POST".to_string()],
        auth_required: false,
        ..RouteConfig::new("/auth/login", "auth-service")
    };
    let gw = spawn_gateway(
        test_config(),
        vec![route],
        vec![instance("auth-service", &backend.url)],
    )
    .await;

    let body = json!({"identifier": "alex", "password": "x"}).to_string();
    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let echo = body_json(response).await;
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["path"], "/auth/login");
    assert_eq!(echo["body"], body);
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_service_without_instances_is_502() {
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/projects/**", "project-service")],
        Vec::new(),
    )
    .await;

    let response = gw.app.clone().oneshot(get("/projects/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(response).await;
    assert_eq!(body["error_code"], "SERVICE_NOT_AVAILABLE");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("not available")
    );
    assert!(!gw.state.breakers.contains("project-service"));
}

#[tokio::test]
async fn test_timeouts_open_the_circuit() {
    let backend = spawn_slow_backend(Duration::from_secs(3)).await;
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 5;
    let route = RouteConfig {
        timeout: Some(1),
        ..public_route("/x/**", "x")
    };
    let gw = spawn_gateway(config, vec![route], vec![instance("x", &backend.url)]).await;

    for _ in 0..5 {
        let response = gw.app.clone().oneshot(get("/x/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
    assert_eq!(backend.hits(), 5);

    let breaker = gw.state.breakers.get("x").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let response = gw.app.clone().oneshot(get("/x/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(body_json(response).await["error_code"], "CIRCUIT_OPEN");
    assert_eq!(backend.hits(), 5);
}

#[tokio::test]
async fn test_route_without_timeout_uses_proxy_default() {
    let backend = spawn_slow_backend(Duration::from_secs(3)).await;
    let mut config = test_config();
    config.proxy.default_timeout_secs = 1;
    let gw = spawn_gateway(config, vec![public_route("/x/**", "x")], vec![instance("x", &backend.url)]).await;

    let route = gw.state.routes.match_route(&axum::http::Method::GET, "/x/slow").unwrap();
    assert_eq!(route.route.timeout, Duration::from_secs(1));

    let response = gw.app.clone().oneshot(get("/x/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let gw = spawn_gateway(test_config(), vec![public_route("/a", "a")], Vec::new()).await;

    let response = gw.app.clone().oneshot(get("/nowhere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "ROUTE_NOT_FOUND");
}

#[tokio::test]
async fn test_method_not_in_route_is_404() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        auth_required: false,
        ..RouteConfig::new("/items", "items")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("items", &backend.url)]).await;

    let response = gw
        .app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri("/items").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_auth_required_route_rejects_anonymous() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        methods: vec!["GET".to_string()],
        ..RouteConfig::new("/api/me", "users")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("users", &backend.url)]).await;

    let response = gw.app.clone().oneshot(get("/api/me")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header("authorization", "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_trust_headers_injected() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig::new("/api/me", "users");
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("users", &backend.url)]).await;

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header("authorization", format!("Bearer {}", token("user-42", &["admin", "dev"])))
                .header("x-trace-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers().get("x-request-id").unwrap().clone();
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "trace-123");

    let seen = backend.last_headers();
    assert_eq!(seen.get("x-user-id").unwrap(), "user-42");
    assert_eq!(seen.get("x-roles").unwrap(), "admin,dev");
    assert_eq!(seen.get("x-permissions").unwrap(), "read");
    assert_eq!(seen.get("x-trace-id").unwrap(), "trace-123");
    assert_eq!(seen.get("x-request-id").unwrap(), &request_id);
}

#[tokio::test]
async fn test_spoofed_trust_headers_stripped() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/public", "svc")],
        vec![instance("svc", &backend.url)],
    )
    .await;

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/public")
                .header("x-user-id", "admin")
                .header("x-roles", "superuser")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = backend.last_headers();
    assert!(seen.get("x-user-id").is_none());
    assert!(seen.get("x-roles").is_none());
    assert!(seen.get("x-request-id").is_some());
}

#[tokio::test]
async fn test_rate_limit_per_identifier() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        rate_limit: 2,
        ..public_route("/limited", "svc")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("svc", &backend.url)]).await;

    let from_ip = |ip: &str| {
        Request::builder()
            .uri("/limited")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = gw.app.clone().oneshot(from_ip("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "1");

    let second = gw.app.clone().oneshot(from_ip("198.51.100.1")).await.unwrap();
    assert_eq!(second.headers().get("x-ratelimit-remaining").unwrap(), "0");

    let third = gw.app.clone().oneshot(from_ip("198.51.100.1")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(third.headers().contains_key("retry-after"));
    assert_eq!(body_json(third).await["error_code"], "RATE_LIMIT_EXCEEDED");

    let other = gw.app.clone().oneshot(from_ip("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_users_behind_one_ip_have_separate_quotas() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        rate_limit: 1,
        ..RouteConfig::new("/api/feed", "feed")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("feed", &backend.url)]).await;

    let as_user = |sub: &str| {
        Request::builder()
            .uri("/api/feed")
            .header("x-forwarded-for", "203.0.113.9")
            .header("authorization", format!("Bearer {}", token(sub, &[])))
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(gw.app.clone().oneshot(as_user("alice")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        gw.app.clone().oneshot(as_user("alice")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(gw.app.clone().oneshot(as_user("bob")).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_attempts_limited_per_login_name() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        methods: vec!["POST".to_string()],
        auth_required: false,
        rate_limit: 1,
        ..RouteConfig::new("/auth/login", "auth-service")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("auth-service", &backend.url)]).await;

    let login = |name: &str| {
        Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header("x-forwarded-for", "192.0.2.1")
            .body(Body::from(json!({"username": name, "password": "pw"}).to_string()))
            .unwrap()
    };

    assert_eq!(gw.app.clone().oneshot(login("alex")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        gw.app.clone().oneshot(login("alex")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // same NAT address, different account
    assert_eq!(gw.app.clone().oneshot(login("sam")).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_no_healthy_instances_is_503() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/svc", "svc")],
        vec![instance("svc", &backend.url).with_health(false)],
    )
    .await;

    let response = gw.app.clone().oneshot(get("/svc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error_code"], "NO_HEALTHY_INSTANCES");
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_backend_client_error_relayed_without_tripping() {
    let backend = spawn_echo_backend(StatusCode::NOT_FOUND).await;
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 1;
    let gw = spawn_gateway(
        config,
        vec![public_route("/things/{id}", "things")],
        vec![instance("things", &backend.url)],
    )
    .await;

    for _ in 0..3 {
        let response = gw.app.clone().oneshot(get("/things/9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(gw.state.breakers.get("things").unwrap().state(), CircuitState::Closed);
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_server_errors_retried_on_same_instance() {
    let backend = spawn_backend(|hit, _| async move {
        if hit < 3 {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
            (StatusCode::OK, "recovered").into_response()
        }
    })
    .await;
    let mut config = test_config();
    config.retry.enabled = true;
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    let gw = spawn_gateway(
        config,
        vec![public_route("/flaky", "flaky")],
        vec![instance("flaky", &backend.url)],
    )
    .await;

    let response = gw.app.clone().oneshot(get("/flaky")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], b"recovered");
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_are_502() {
    let backend = spawn_echo_backend(StatusCode::INTERNAL_SERVER_ERROR).await;
    let mut config = test_config();
    config.retry.enabled = true;
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 10;
    let gw = spawn_gateway(
        config,
        vec![public_route("/broken", "broken")],
        vec![instance("broken", &backend.url)],
    )
    .await;

    let response = gw.app.clone().oneshot(get("/broken")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error_code"], "UPSTREAM_ERROR");
    assert_eq!(backend.hits(), 2);
}

#[tokio::test]
async fn test_unreachable_instance_is_502() {
    let url = dead_url().await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/gone", "gone")],
        vec![instance("gone", &url)],
    )
    .await;

    let response = gw.app.clone().oneshot(get("/gone")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_large_body_streamed_through() {
    let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let backend = spawn_backend(move |_, _| {
        let payload = payload.clone();
        async move {
            let chunks = payload
                .chunks(64 * 1024)
                .map(|c| Ok::<_, std::io::Error>(bytes::Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>();
            Body::from_stream(futures_util::stream::iter(chunks)).into_response()
        }
    })
    .await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/download", "files")],
        vec![instance("files", &backend.url)],
    )
    .await;

    let response = gw.app.clone().oneshot(get("/download")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_oversized_request_body_is_413() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let mut config = test_config();
    config.proxy.max_body_bytes = 16;
    let gw = spawn_gateway(
        config,
        vec![public_route("/upload", "files")],
        vec![instance("files", &backend.url)],
    )
    .await;

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .body(Body::from(vec![b'a'; 1024]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_strip_prefix_and_query_forwarded() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let route = RouteConfig {
        strip_prefix: true,
        ..public_route("/api/users/**", "users")
    };
    let gw = spawn_gateway(test_config(), vec![route], vec![instance("users", &backend.url)]).await;

    let response = gw
        .app
        .clone()
        .oneshot(get("/api/users/42/profile?fields=name"))
        .await
        .unwrap();
    let echo = body_json(response).await;
    assert_eq!(echo["path"], "/42/profile");
    assert_eq!(echo["query"], "fields=name");
}

#[tokio::test]
async fn test_round_robin_spreads_requests() {
    let a = spawn_echo_backend(StatusCode::OK).await;
    let b = spawn_echo_backend(StatusCode::OK).await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/rr", "rr")],
        vec![instance("rr", &a.url), instance("rr", &b.url)],
    )
    .await;

    for _ in 0..4 {
        let response = gw.app.clone().oneshot(get("/rr")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(a.hits(), 2);
    assert_eq!(b.hits(), 2);
}

#[tokio::test]
async fn test_reload_swaps_routes() {
    let backend = spawn_echo_backend(StatusCode::OK).await;
    let gw = spawn_gateway(
        test_config(),
        vec![public_route("/old", "svc")],
        vec![instance("svc", &backend.url)],
    )
    .await;

    assert_eq!(gw.app.clone().oneshot(get("/new")).await.unwrap().status(), StatusCode::NOT_FOUND);

    let count = gw
        .state
        .reload(&[public_route("/new", "svc")], &ServicesFile::default())
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(gw.app.clone().oneshot(get("/new")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(gw.app.clone().oneshot(get("/old")).await.unwrap().status(), StatusCode::NOT_FOUND);

    // a bad table is rejected and the current one stays
    assert!(gw.state.reload(&[public_route("no-slash", "svc")], &ServicesFile::default()).is_err());
    assert_eq!(gw.app.clone().oneshot(get("/new")).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_ready_and_metrics_endpoints() {
    let gw = spawn_gateway(test_config(), Vec::new(), Vec::new()).await;

    let response = gw.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "api-gateway");

    let response = gw.app.clone().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");

    // any dispatched request records a sample
    gw.app.clone().oneshot(get("/unrouted")).await.unwrap();

    let response = gw.app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(text.contains("gateway_requests_total"));
}

#[tokio::test]
async fn test_error_responses_carry_request_ids() {
    let gw = spawn_gateway(test_config(), Vec::new(), Vec::new()).await;

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/missing")
                .header("x-trace-id", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "abc");
}

/// Records the fields of every span named "request"
#[derive(Clone, Default)]
struct AccessSpans(Arc<Mutex<Vec<String>>>);

struct FieldsVisitor<'a>(&'a mut String);

impl tracing::field::Visit for FieldsVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push_str(&format!("{}={:?} ", field.name(), value));
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for AccessSpans {
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if attrs.metadata().name() == "request" {
            let mut fields = String::new();
            attrs.record(&mut FieldsVisitor(&mut fields));
            self.0.lock().unwrap().push(fields);
        }
    }
}

#[tokio::test]
async fn test_access_span_carries_request_ids() {
    use tracing_subscriber::layer::SubscriberExt;

    let spans = AccessSpans::default();
    let subscriber = tracing_subscriber::registry().with(spans.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let gw = spawn_gateway(test_config(), Vec::new(), Vec::new()).await;
    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/missing")
                .header("x-trace-id", "trace-77")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let request_id = response.headers().get("x-request-id").unwrap().to_str().unwrap().to_string();

    let spans = spans.0.lock().unwrap();
    assert!(
        spans
            .iter()
            .any(|s| s.contains("trace_id=trace-77") && s.contains(&format!("request_id={}", request_id))),
        "access spans: {:?}",
        spans
    );
}
