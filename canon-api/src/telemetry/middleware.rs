//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in an `http_request` span, records the Prometheus
//! request metrics and logs completion.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::metrics;

/// Label for requests that matched no route. Raw paths would let clients
/// mint unbounded label values.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Route template for metrics and spans, e.g. `/v1/entities/:id`.
fn route_of(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Observability middleware for Axum.
///
/// Install with `Router::layer` so [`MatchedPath`] is set for matched
/// routes; the fallback is labelled `unmatched`.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_of(&request);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
        http.status_code = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();
    span.record("http.status_code", status.as_u16());

    if let Some(metrics) = metrics() {
        metrics.record_http_request(method.as_str(), &route, status.as_u16(), duration.as_secs_f64());
    }

    let _entered = span.enter();
    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "ok"
    }

    fn router() -> Router {
        Router::new()
            .route("/items/:id", get(ok))
            .layer(from_fn(observability_middleware))
    }

    #[tokio::test]
    async fn test_matched_route_is_recorded_by_template() -> Result<(), String> {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/items/550e8400-e29b-41d4-a716-446655440000")
                    .body(Body::empty())
                    .map_err(|e| e.to_string())?,
            )
            .await
            .map_err(|e| e.to_string())?;
        assert!(response.status().is_success());

        let metrics = metrics().ok_or("metrics unavailable")?;
        let count = metrics
            .http_requests_total
            .with_label_values(&["GET", "/items/:id", "200"])
            .get();
        assert!(count >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unmatched_route_uses_fixed_label() -> Result<(), String> {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/nowhere/12345")
                    .body(Body::empty())
                    .map_err(|e| e.to_string())?,
            )
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);

        let metrics = metrics().ok_or("metrics unavailable")?;
        let count = metrics
            .http_requests_total
            .with_label_values(&["GET", UNMATCHED_ROUTE, "404"])
            .get();
        assert!(count >= 1);
        Ok(())
    }
}
