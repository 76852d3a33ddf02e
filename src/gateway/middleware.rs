// ============================================================================
// Gateway Middleware
// ============================================================================
//
// Request context: assigns X-Request-Id, continues or starts X-Trace-Id,
// makes both available to handlers through request extensions, and echoes
// them on every response, errors included.
//
// ============================================================================

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::context::{HEADER_REQUEST_ID, HEADER_TRACE_ID, RequestIds};

pub async fn request_context(mut request: Request, next: Next) -> Response {
    let ids = RequestIds::from_headers(request.headers());
    request.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "gateway_request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
    );
    let mut response = next.run(request).instrument(span).await;

    // ALWAYS overwrite so a backend cannot substitute its own ids
    let headers = response.headers_mut();
    for (name, value) in [
        (HEADER_REQUEST_ID, &ids.request_id),
        (HEADER_TRACE_ID, &ids.trace_id),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    response
}
