// ============================================================================
// Route Table
// ============================================================================
//
// Maps (method, path) to a route definition. Patterns are split into
// segments, each one of:
// - literal        /api/v1/users
// - parameter      {id}        (exactly one segment, captured)
// - wildcard       *           (exactly one segment)
// - tail wildcard  **          (zero or more remaining segments, last only)
//
// The active set lives in an immutable snapshot that is pre-sorted by
// (priority desc, literal segments desc, definition order asc); matching
// returns the first candidate that fits. Reload builds a new snapshot and
// swaps one pointer, so readers see either the old or the new table.
//
// ============================================================================

use arc_swap::ArcSwap;
use axum::http::{HeaderName, HeaderValue, Method};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RouteConfig;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid method '{method}' on route '{pattern}'")]
    InvalidMethod { pattern: String, method: String },

    #[error("invalid header '{name}' on route '{pattern}'")]
    InvalidHeader { pattern: String, name: String },

    #[error("route '{pattern}' has a zero timeout")]
    ZeroTimeout { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
    TailWildcard,
}

#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        if !raw.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" => {
                    if i + 1 != parts.len() {
                        return Err(invalid("'**' is only allowed as the last segment"));
                    }
                    Segment::TailWildcard
                }
                "*" => Segment::Wildcard,
                p if p.starts_with('{') && p.ends_with('}') => {
                    let name = &p[1..p.len() - 1];
                    if name.is_empty() || name.contains(['{', '}']) {
                        return Err(invalid("empty or nested parameter name"));
                    }
                    Segment::Param(name.to_string())
                }
                p if p.contains(['{', '}']) => {
                    return Err(invalid("parameters must span a whole segment"));
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Literal segments anywhere in the pattern (specificity)
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Literal segments before the first non-literal one
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Match path segments, returning captured parameters
    pub fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            if *segment == Segment::TailWildcard {
                return Some(params);
            }
            let part = path.get(i)?;
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
                Segment::Wildcard | Segment::TailWildcard => {}
            }
        }

        (path.len() == self.segments.len()).then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// An immutable route, built from a [`RouteConfig`]
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub pattern: PathPattern,
    /// `None` accepts any method
    pub methods: Option<HashSet<Method>>,
    pub service: String,
    pub auth_required: bool,
    /// Requests per minute per identifier
    pub rate_limit: u32,
    pub timeout: Duration,
    pub priority: i32,
    pub strip_prefix: bool,
    pub rewrite_path: Option<String>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Position in the source file
    pub order: usize,
}

impl RouteDefinition {
    /// `default_timeout` applies when the route sets none
    pub fn from_config(
        config: &RouteConfig,
        order: usize,
        default_timeout: Duration,
    ) -> Result<Self, RouteError> {
        let pattern = PathPattern::parse(&config.path)?;

        let timeout = config
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        if timeout.is_zero() {
            return Err(RouteError::ZeroTimeout {
                pattern: config.path.clone(),
            });
        }

        let mut methods = HashSet::new();
        let mut any_method = false;
        for m in &config.methods {
            let upper = m.trim().to_uppercase();
            if upper == "*" || upper == "ANY" {
                any_method = true;
                continue;
            }
            let method = Method::from_str(&upper).map_err(|_| RouteError::InvalidMethod {
                pattern: config.path.clone(),
                method: m.clone(),
            })?;
            methods.insert(method);
        }

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            let invalid = || RouteError::InvalidHeader {
                pattern: config.path.clone(),
                name: name.clone(),
            };
            let name = HeaderName::from_str(name).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.push((name, value));
        }

        Ok(Self {
            pattern,
            methods: (!any_method).then_some(methods),
            service: config.service.clone(),
            auth_required: config.auth_required,
            rate_limit: config.rate_limit,
            timeout,
            priority: config.priority,
            strip_prefix: config.strip_prefix,
            rewrite_path: config.rewrite_path.clone(),
            headers,
            order,
        })
    }

    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn allows(&self, method: &Method) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(method),
            None => true,
        }
    }

    /// Path sent to the backend for `request_path`
    pub fn forwarded_path(&self, request_path: &str, params: &HashMap<String, String>) -> String {
        if let Some(template) = &self.rewrite_path {
            let mut path = template.clone();
            for (name, value) in params {
                path = path.replace(&format!("{{{}}}", name), value);
            }
            return path;
        }

        if self.strip_prefix {
            let rest: Vec<&str> = split_path(request_path)
                .skip(self.pattern.literal_prefix_len())
                .collect();
            let mut path = format!("/{}", rest.join("/"));
            if request_path.ends_with('/') && !rest.is_empty() {
                path.push('/');
            }
            return path;
        }

        request_path.to_string()
    }
}

/// Result of a successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteDefinition>,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct RouteSnapshot {
    routes: Vec<Arc<RouteDefinition>>,
}

impl RouteSnapshot {
    fn new(mut routes: Vec<RouteDefinition>) -> Self {
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.pattern.literal_count().cmp(&a.pattern.literal_count()))
                .then_with(|| a.order.cmp(&b.order))
        });
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }
}

pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
    default_timeout: Duration,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDefinition>, default_timeout: Duration) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::new(routes)),
            default_timeout,
        }
    }

    /// Routes without a `timeout` get `default_timeout`, here and on reload
    pub fn from_configs(configs: &[RouteConfig], default_timeout: Duration) -> Result<Self, RouteError> {
        Ok(Self::new(build_routes(configs, default_timeout)?, default_timeout))
    }

    /// Replace the whole table. On error the current table stays active.
    pub fn reload(&self, configs: &[RouteConfig]) -> Result<usize, RouteError> {
        let routes = build_routes(configs, self.default_timeout)?;
        let count = routes.len();
        self.snapshot.store(Arc::new(RouteSnapshot::new(routes)));
        tracing::info!(routes = count, "Route table reloaded");
        Ok(count)
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let snapshot = self.snapshot.load();
        let parts: Vec<&str> = split_path(path).collect();

        snapshot
            .routes
            .iter()
            .filter(|route| route.allows(method))
            .find_map(|route| {
                route.pattern.matches(&parts).map(|params| RouteMatch {
                    route: route.clone(),
                    params,
                })
            })
    }

    /// Routes in match order
    pub fn routes(&self) -> Vec<Arc<RouteDefinition>> {
        self.snapshot.load().routes.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named parameters of `path` under `route`'s pattern
pub fn extract_path_params(route: &RouteDefinition, path: &str) -> Option<HashMap<String, String>> {
    let parts: Vec<&str> = split_path(path).collect();
    route.pattern.matches(&parts)
}

fn build_routes(
    configs: &[RouteConfig],
    default_timeout: Duration,
) -> Result<Vec<RouteDefinition>, RouteError> {
    configs
        .iter()
        .enumerate()
        .map(|(order, config)| RouteDefinition::from_config(config, order, default_timeout))
        .collect()
}
