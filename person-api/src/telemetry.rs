use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use shared::{gauge, histogram};
use std::time::Instant;

/// Records duration and in-flight count for every request and logs its outcome.
///
/// Requests that match no route are tagged `unmatched` so raw paths never
/// end up as metric tags.
pub async fn track_request(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = request.method().to_string();
    let start = Instant::now();

    gauge!(REQUESTS_INFLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(REQUESTS_INFLIGHT).decrement(1.0);

    let elapsed = start.elapsed();
    let status = response.status();

    histogram!(
        REQUEST_DURATION,
        "route" => route.clone(),
        "method" => method.clone(),
        "status" => status.as_str().to_owned()
    )
    .record(elapsed.as_secs_f64());

    tracing::info!(
        method = %method,
        route = %route,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );

    response
}
