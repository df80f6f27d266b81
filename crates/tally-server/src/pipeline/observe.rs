//! Request logging

use axum::{body::HttpBody, extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let size = response.body().size_hint().exact().unwrap_or(0);
    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        size,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "request"
    );
    response
}
