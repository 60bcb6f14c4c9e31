//! Structured logging and request tracing middleware
//!
//! Every listener (driver REST, plugin, plugin management) runs requests
//! through [`request_tracing_middleware`]:
//! - Unique request ID per request (echoed from `X-Request-ID` when present)
//! - A tracing span carrying method, path and peer
//! - Completion log with status and timing

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn request_id_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id)
}

/// Middleware that adds request ID and structured logging to each request
pub async fn request_tracing_middleware(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();

    let request_id = request_id_of(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
        client = %client,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status_code = status.as_u16();
    let elapsed_ms = duration.as_millis() as u64;
    let _guard = span.enter();
    match status_code {
        500.. => error!(status = status_code, elapsed_ms, "Request failed"),
        400..=499 => warn!(status = status_code, elapsed_ms, "Request rejected"),
        _ => debug!(status = status_code, elapsed_ms, "Request completed"),
    }

    response
}
