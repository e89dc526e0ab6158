use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

use super::routes::PRINCIPAL_HEADER;

const LOG_TARGET: &str = "server::http";

/// Middleware that logs incoming HTTP requests and their responses
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_owned();
    let query = uri.query().unwrap_or("").to_owned();
    let principal = request
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    tracing::debug!(
        target: LOG_TARGET,
        %method,
        %path,
        %query,
        %principal,
        "incoming request"
    );

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::warn!(
            target: LOG_TARGET,
            %method,
            %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "request failed"
        );
    } else {
        tracing::info!(
            target: LOG_TARGET,
            %method,
            %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );
    }

    response
}
