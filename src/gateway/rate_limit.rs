// ============================================================================
// Rate Limiting - fixed windows per identifier
// ============================================================================
//
// Windows:
// - minute: per route, limit taken from the route definition (or the
//   global per-minute limit when the route sets 0)
// - hour / day: optional, global across routes
//
// Identifier priority (first available wins):
//   authenticated user > login name from the body (login routes only)
//   > API key > client IP
//
// Each counter check is a single atomic check-and-increment against the
// store, so concurrent requests from one identifier cannot overshoot.
//
// Key format: rate_limit:{identifier}:{window}[:{route}]
//
// ============================================================================

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::audit::{AuditWriter, RateLimitRecord};
use crate::config::{RateLimitConfig, SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE};
use crate::error::GatewayError;
use crate::metrics::GATEWAY_RATE_LIMITED_TOTAL;

/// Body fields that carry the login name on login/registration routes
const LOGIN_FIELDS: &[&str] = &["username", "email", "identifier"];

/// Stale in-memory windows are swept every this many checks
const PURGE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowType {
    Minute,
    Hour,
    Day,
}

impl WindowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Minute => "minute",
            WindowType::Hour => "hour",
            WindowType::Day => "day",
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(match self {
            WindowType::Minute => SECONDS_PER_MINUTE,
            WindowType::Hour => SECONDS_PER_HOUR,
            WindowType::Day => SECONDS_PER_DAY,
        })
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    User,
    Login,
    ApiKey,
    Ip,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::User => "user",
            IdentifierKind::Login => "login",
            IdentifierKind::ApiKey => "api_key",
            IdentifierKind::Ip => "ip",
        }
    }
}

/// Who a quota is tracked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl fmt::Display for RateLimitIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Pick the most specific identifier available.
///
/// Falling back to the IP makes everyone behind one NAT share a counter, so
/// it is only used when nothing better is known.
pub fn resolve_identifier(
    user_id: Option<&str>,
    login: Option<&str>,
    api_key: Option<&str>,
    client_ip: &str,
) -> RateLimitIdentifier {
    fn pick(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|s| !s.is_empty())
    }

    let (kind, value) = if let Some(user) = pick(user_id) {
        (IdentifierKind::User, user.to_string())
    } else if let Some(login) = pick(login) {
        (IdentifierKind::Login, login.to_lowercase())
    } else if let Some(key) = pick(api_key) {
        (IdentifierKind::ApiKey, key.to_string())
    } else {
        (IdentifierKind::Ip, client_ip.to_string())
    };

    RateLimitIdentifier { kind, value }
}

/// Login name from a JSON request body, if any
pub fn extract_login_identifier(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;
    LOGIN_FIELDS.iter().find_map(|field| {
        object
            .get(*field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

pub fn counter_key(identifier: &RateLimitIdentifier, window: WindowType, route: Option<&str>) -> String {
    match route {
        Some(route) => format!("rate_limit:{}:{}:{}", identifier, window, route),
        None => format!("rate_limit:{}:{}", identifier, window),
    }
}

/// Outcome of one check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDecision {
    pub allowed: bool,
    /// Count in the window after this call
    pub count: u64,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Shared counter store
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically admit the call if the window count is below `limit`,
    /// incrementing it. The first call in a window opens it.
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> anyhow::Result<CounterDecision>;

    /// Give back one admitted call, for a request a later window rejected
    async fn release(&self, key: &str) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str;
}

#[derive(Debug)]
struct Window {
    count: u64,
    opened: Instant,
    length: Duration,
}

/// Process-local counters; the DashMap shard lock makes each check atomic
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, Window>,
    checks: AtomicU64,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop windows that have already reset
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.opened) < w.length);
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> anyhow::Result<CounterDecision> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            opened: now,
            length: window,
        });

        if now.duration_since(entry.opened) >= entry.length {
            entry.count = 0;
            entry.opened = now;
            entry.length = window;
        }

        let allowed = entry.count < limit as u64;
        if allowed {
            entry.count += 1;
        }
        let reset_after = entry.length.saturating_sub(now.duration_since(entry.opened));

        Ok(CounterDecision {
            allowed,
            count: entry.count,
            reset_after,
        })
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let now = Instant::now();
        if let Some(mut entry) = self.windows.get_mut(key)
            && now.duration_since(entry.opened) < entry.length
        {
            entry.count = entry.count.saturating_sub(1);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Redis counters shared by every gateway replica
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: redis::Script,
    release_script: redis::Script,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis rate limit store");
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        // GET-compare-INCR in one script so replicas cannot race past the limit
        let script = redis::Script::new(
            r"
            local current = tonumber(redis.call('GET', KEYS[1]) or '0')
            if current >= tonumber(ARGV[1]) then
                return {0, current, redis.call('PTTL', KEYS[1])}
            end
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return {1, count, redis.call('PTTL', KEYS[1])}
            ",
        );
        // Only decrement a live window; an expired key stays gone
        let release_script = redis::Script::new(
            r"
            local current = tonumber(redis.call('GET', KEYS[1]) or '0')
            if current > 0 then
                redis.call('DECR', KEYS[1])
            end
            return current
            ",
        );
        Self {
            conn,
            script,
            release_script,
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> anyhow::Result<CounterDecision> {
        let mut conn = self.conn.clone();
        let (allowed, count, pttl): (i64, u64, i64) = self
            .script
            .key(key)
            .arg(limit)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        let reset_after = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            window
        };

        Ok(CounterDecision {
            allowed: allowed == 1,
            count,
            reset_after,
        })
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

/// Result of checking every applicable window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Window that decided the outcome (the tightest one when allowed)
    pub window: WindowType,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl RateLimitDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            window: WindowType::Minute,
            limit: 0,
            remaining: 0,
            reset_after: Duration::ZERO,
        }
    }

    /// Whether response headers should be attached
    pub fn is_limited(&self) -> bool {
        self.limit > 0
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    audit: Option<Arc<AuditWriter>>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        audit: Option<Arc<AuditWriter>>,
    ) -> Self {
        Self {
            config,
            store,
            audit,
        }
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn is_login_path(&self, path: &str) -> bool {
        self.config.login_paths.iter().any(|p| p == path)
    }

    /// Windows applicable to a route: (window, limit, route key part)
    fn windows<'a>(&self, route_path: &'a str, route_limit: u32) -> Vec<(WindowType, u32, Option<&'a str>)> {
        let mut windows = Vec::with_capacity(3);
        // A route without its own limit falls back to the global per-minute one
        let per_minute = if route_limit > 0 {
            route_limit
        } else {
            self.config.per_minute
        };
        if per_minute > 0 {
            windows.push((WindowType::Minute, per_minute, Some(route_path)));
        }
        if let Some(limit) = self.config.per_hour.filter(|l| *l > 0) {
            windows.push((WindowType::Hour, limit, None));
        }
        if let Some(limit) = self.config.per_day.filter(|l| *l > 0) {
            windows.push((WindowType::Day, limit, None));
        }
        windows
    }

    /// Count this request against every window of the route. Stops at the
    /// first exhausted window and gives back what the earlier windows
    /// admitted, so a rejected request costs nothing.
    pub async fn check(
        &self,
        identifier: &RateLimitIdentifier,
        route_path: &str,
        route_limit: u32,
    ) -> Result<RateLimitDecision, GatewayError> {
        let mut tightest: Option<RateLimitDecision> = None;
        let mut charged: Vec<String> = Vec::with_capacity(3);

        for (window, limit, route) in self.windows(route_path, route_limit) {
            let key = counter_key(identifier, window, route);
            let counter = match self
                .store
                .check_and_increment(&key, limit, window.duration())
                .await
            {
                Ok(counter) => counter,
                Err(e) if self.config.fail_open => {
                    tracing::warn!(
                        error = %e,
                        store = self.store.kind(),
                        window = %window,
                        "Rate limit store unavailable, allowing request"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        store = self.store.kind(),
                        window = %window,
                        "Rate limit store unavailable, rejecting request"
                    );
                    return Err(GatewayError::Unavailable(
                        "Rate limiter unavailable".to_string(),
                    ));
                }
            };

            self.audit(identifier, window, route, limit, &counter).await;

            let decision = RateLimitDecision {
                allowed: counter.allowed,
                window,
                limit,
                remaining: (limit as u64).saturating_sub(counter.count) as u32,
                reset_after: counter.reset_after,
            };

            if !counter.allowed {
                GATEWAY_RATE_LIMITED_TOTAL
                    .with_label_values(&[window.as_str()])
                    .inc();
                tracing::warn!(
                    identifier = %identifier,
                    window = %window,
                    limit = limit,
                    route = %route_path,
                    "Rate limit exceeded"
                );
                self.refund(&charged).await;
                return Ok(decision);
            }
            charged.push(key);

            if tightest
                .as_ref()
                .is_none_or(|t| decision.remaining < t.remaining)
            {
                tightest = Some(decision);
            }
        }

        Ok(tightest.unwrap_or_else(RateLimitDecision::unlimited))
    }

    async fn refund(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.store.release(key).await {
                tracing::warn!(error = %e, key = %key, "Failed to release rate limit slot");
            }
        }
    }

    async fn audit(
        &self,
        identifier: &RateLimitIdentifier,
        window: WindowType,
        route: Option<&str>,
        limit: u32,
        counter: &CounterDecision,
    ) {
        let Some(writer) = &self.audit else {
            return;
        };

        let now = Utc::now();
        let window_end = now
            + chrono::Duration::from_std(counter.reset_after).unwrap_or_else(|_| chrono::Duration::zero());
        let window_start = window_end
            - chrono::Duration::from_std(window.duration()).unwrap_or_else(|_| chrono::Duration::zero());

        writer
            .submit(RateLimitRecord {
                identifier: identifier.to_string(),
                window_type: window.as_str().to_string(),
                route_path: route.map(str::to_string),
                request_count: counter.count,
                limit,
                allowed: counter.allowed,
                window_start,
                window_end,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryRecordSink;
    use crate::config::AuditMode;
    use crate::tasks::BackgroundTasks;

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn check_and_increment(&self, _: &str, _: u32, _: Duration) -> anyhow::Result<CounterDecision> {
            anyhow::bail!("connection refused")
        }

        async fn release(&self, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        fn kind(&self) -> &'static str {
            "failing"
        }
    }

    fn ip(addr: &str) -> RateLimitIdentifier {
        resolve_identifier(None, None, None, addr)
    }

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config, Arc::new(InMemoryRateLimitStore::new()), None)
    }

    #[test]
    fn test_identifier_priority() {
        let id = resolve_identifier(Some("42"), Some("alex"), Some("key"), "1.2.3.4");
        assert_eq!(id.to_string(), "user:42");

        let id = resolve_identifier(None, Some(" Alex@Example.com "), Some("key"), "1.2.3.4");
        assert_eq!(id.to_string(), "login:alex@example.com");

        let id = resolve_identifier(None, None, Some("key"), "1.2.3.4");
        assert_eq!(id.to_string(), "api_key:key");

        let id = resolve_identifier(Some("   "), Some("\t"), None, "1.2.3.4");
        assert_eq!(id.to_string(), "ip:1.2.3.4");

        let id = resolve_identifier(Some(""), None, None, "1.2.3.4");
        assert_eq!(id.to_string(), "ip:1.2.3.4");
    }

    #[test]
    fn test_extract_login_identifier() {
        assert_eq!(
            extract_login_identifier(br#"{"identifier":"alex","password":"x"}"#),
            Some("alex".to_string())
        );
        assert_eq!(
            extract_login_identifier(br#"{"email":"a@b.c"}"#),
            Some("a@b.c".to_string())
        );
        assert_eq!(extract_login_identifier(br#"{"password":"x"}"#), None);
        assert_eq!(extract_login_identifier(b"not json"), None);
        assert_eq!(extract_login_identifier(b""), None);
    }

    #[test]
    fn test_counter_key_format() {
        let id = ip("10.0.0.1");
        assert_eq!(
            counter_key(&id, WindowType::Minute, Some("/api/users")),
            "rate_limit:ip:10.0.0.1:minute:/api/users"
        );
        assert_eq!(counter_key(&id, WindowType::Day, None), "rate_limit:ip:10.0.0.1:day");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_call_rejected() {
        let store = InMemoryRateLimitStore::new();
        for n in 1..=5 {
            let d = store.check_and_increment("k", 5, Duration::from_secs(60)).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.count, n);
        }
        let d = store.check_and_increment("k", 5, Duration::from_secs(60)).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let store = InMemoryRateLimitStore::new();
        let window = Duration::from_secs(60);
        store.check_and_increment("k", 1, window).await.unwrap();
        assert!(!store.check_and_increment("k", 1, window).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(30)).await;
        let d = store.check_and_increment("k", 1, window).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.reset_after, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.check_and_increment("k", 1, window).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_expired_windows() {
        let store = InMemoryRateLimitStore::new();
        store.check_and_increment("a", 5, Duration::from_secs(60)).await.unwrap();
        store.check_and_increment("b", 5, Duration::from_secs(3600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        store.purge_expired();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .check_and_increment("shared", 20, Duration::from_secs(60))
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 20);
    }

    #[tokio::test]
    async fn test_identifiers_behind_one_ip_do_not_share() {
        let limiter = limiter(RateLimitConfig::default());
        let alice = resolve_identifier(Some("alice"), None, None, "203.0.113.7");
        let bob = resolve_identifier(Some("bob"), None, None, "203.0.113.7");

        for _ in 0..2 {
            assert!(limiter.check(&alice, "/api/x", 2).await.unwrap().allowed);
        }
        assert!(!limiter.check(&alice, "/api/x", 2).await.unwrap().allowed);
        assert!(limiter.check(&bob, "/api/x", 2).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_minute_window_is_per_route() {
        let limiter = limiter(RateLimitConfig::default());
        let id = ip("10.0.0.1");
        assert!(limiter.check(&id, "/a", 1).await.unwrap().allowed);
        assert!(!limiter.check(&id, "/a", 1).await.unwrap().allowed);
        assert!(limiter.check(&id, "/b", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_hour_window_is_global() {
        let limiter = limiter(RateLimitConfig {
            per_hour: Some(2),
            ..RateLimitConfig::default()
        });
        let id = ip("10.0.0.1");
        assert!(limiter.check(&id, "/a", 100).await.unwrap().allowed);
        assert!(limiter.check(&id, "/b", 100).await.unwrap().allowed);

        let decision = limiter.check(&id, "/c", 100).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.window, WindowType::Hour);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_charged_to_earlier_windows() {
        let limiter = limiter(RateLimitConfig {
            per_hour: Some(1),
            ..RateLimitConfig::default()
        });
        let id = ip("10.0.0.1");
        assert!(limiter.check(&id, "/a", 2).await.unwrap().allowed);

        let decision = limiter.check(&id, "/a", 2).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.window, WindowType::Hour);

        // The minute window holds only the one admitted request
        let minute = counter_key(&id, WindowType::Minute, Some("/a"));
        let counter = limiter
            .store()
            .check_and_increment(&minute, 2, WindowType::Minute.duration())
            .await
            .unwrap();
        assert!(counter.allowed);
        assert_eq!(counter.count, 2);
    }

    #[tokio::test]
    async fn test_decision_reports_remaining() {
        let limiter = limiter(RateLimitConfig::default());
        let d = limiter.check(&ip("10.0.0.1"), "/a", 10).await.unwrap();
        assert!(d.is_limited());
        assert_eq!(d.limit, 10);
        assert_eq!(d.remaining, 9);
    }

    #[tokio::test]
    async fn test_store_failure_fail_open_and_closed() {
        let open = RateLimiter::new(RateLimitConfig::default(), Arc::new(FailingStore), None);
        assert!(open.check(&ip("1.1.1.1"), "/a", 1).await.unwrap().allowed);

        let closed = RateLimiter::new(
            RateLimitConfig {
                fail_open: false,
                ..RateLimitConfig::default()
            },
            Arc::new(FailingStore),
            None,
        );
        let err = closed.check(&ip("1.1.1.1"), "/a", 1).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_decisions_are_audited() {
        let sink = Arc::new(InMemoryRecordSink::new());
        let tasks = Arc::new(BackgroundTasks::new());
        let writer = Arc::new(AuditWriter::new(sink.clone(), AuditMode::Deferred, tasks.clone()));
        let limiter = RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(InMemoryRateLimitStore::new()),
            Some(writer),
        );

        let id = ip("10.0.0.9");
        limiter.check(&id, "/a", 1).await.unwrap();
        limiter.check(&id, "/a", 1).await.unwrap();
        tasks.shutdown(Duration::from_secs(5)).await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.allowed));
        assert!(records.iter().any(|r| !r.allowed));
        assert!(records.iter().all(|r| r.identifier == "ip:10.0.0.9"));
        assert!(records.iter().all(|r| r.window_end > r.window_start));
    }

    #[tokio::test]
    async fn test_route_without_limit_uses_global_minute_limit() {
        let limiter = limiter(RateLimitConfig {
            per_minute: 1,
            ..RateLimitConfig::default()
        });
        let id = ip("10.0.0.1");
        assert!(limiter.check(&id, "/a", 0).await.unwrap().allowed);
        assert!(!limiter.check(&id, "/a", 0).await.unwrap().allowed);
    }

    #[test]
    fn test_login_paths() {
        let limiter = limiter(RateLimitConfig::default());
        assert!(limiter.is_login_path("/auth/login"));
        assert!(!limiter.is_login_path("/auth/logout"));
    }
}
