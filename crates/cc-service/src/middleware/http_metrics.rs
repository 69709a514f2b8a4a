//! HTTP metrics middleware.
//!
//! Captures metrics for ALL HTTP responses, including framework-level errors
//! that occur before handlers run (400 JSON parse errors, 404, 405, 415).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records method, path, status and duration for every
/// request.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status_code = response.status().as_u16();
    record_http_request(&method, &path, status_code, start.elapsed());

    response
}
