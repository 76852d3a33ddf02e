// ============================================================================
// Request Context - per-request identifiers and trust headers
// ============================================================================

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::auth::Identity;

pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_TRACE_ID: &str = "x-trace-id";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_ROLES: &str = "x-roles";
pub const HEADER_PERMISSIONS: &str = "x-permissions";
pub const HEADER_USERNAME: &str = "x-username";
pub const HEADER_TENANT_ID: &str = "x-tenant-id";

/// Headers only the gateway may set. Client-supplied copies are dropped.
pub const TRUST_HEADERS: &[&str] = &[
    HEADER_REQUEST_ID,
    HEADER_TRACE_ID,
    HEADER_USER_ID,
    HEADER_ROLES,
    HEADER_PERMISSIONS,
    HEADER_USERNAME,
    HEADER_TENANT_ID,
];

/// Connection-scoped headers that never cross a proxy hop (RFC 9110 7.6.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Identifiers assigned by the request-context middleware
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

impl RequestIds {
    /// Fresh request id; trace id continues an inbound one when present
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let trace_id = headers
            .get(HEADER_TRACE_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id,
        }
    }
}

/// Everything the dispatcher learns about a request as it moves through
/// the pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub client_ip: String,
    pub identity: Option<Identity>,
    pub service: Option<String>,
    pub path_params: HashMap<String, String>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(
        ids: RequestIds,
        method: Method,
        path: impl Into<String>,
        query: Option<String>,
        client_ip: String,
    ) -> Self {
        Self {
            request_id: ids.request_id,
            trace_id: ids.trace_id,
            method,
            path: path.into(),
            query,
            client_ip,
            identity: None,
            service: None,
            path_params: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    /// Trust headers injected into the forwarded request
    pub fn forward_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, HEADER_REQUEST_ID, &self.request_id);
        insert(&mut headers, HEADER_TRACE_ID, &self.trace_id);

        if let Some(identity) = &self.identity {
            insert(&mut headers, HEADER_USER_ID, &identity.user_id);
            if !identity.roles.is_empty() {
                insert(&mut headers, HEADER_ROLES, &identity.roles.join(","));
            }
            if !identity.permissions.is_empty() {
                insert(&mut headers, HEADER_PERMISSIONS, &identity.permissions.join(","));
            }
            if let Some(username) = &identity.username {
                insert(&mut headers, HEADER_USERNAME, username);
            }
            if let Some(tenant_id) = &identity.tenant_id {
                insert(&mut headers, HEADER_TENANT_ID, tenant_id);
            }
        }

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    // Values that are not valid header text are dropped rather than mangled
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    } else {
        tracing::warn!(header = name, "Dropping trust header with invalid value");
    }
}

/// Remove hop-by-hop headers, including any the `Connection` header names
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in named {
        headers.remove(name.as_str());
    }
}

/// Prepare inbound headers for forwarding: drop hop-by-hop headers, the
/// `Host` and `Content-Length` the client sent, and any spoofed trust headers.
pub fn sanitize_inbound(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove("host");
    headers.remove("content-length");
    for name in TRUST_HEADERS {
        headers.remove(*name);
    }
}
