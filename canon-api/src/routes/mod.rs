//! HTTP routes, grouped by resource:
//! - Entity reads (through the coherence layer) and curation writes
//! - Identifier resolution and mapping management
//! - Change feed paging, partition bounds and snapshots
//! - Health probes, Prometheus metrics, the OpenAPI document and Swagger UI

mod conditional;

pub mod changes;
pub mod entity;
pub mod health;
pub mod mappings;
pub mod resolve;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::constants::{HEADER_CONSISTENCY, HEADER_SERVED_FROM};
use crate::error::{ApiError, ApiResult};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use changes::create_router as changes_router;
pub use changes::create_snapshot_router as snapshot_router;
pub use conditional::etag_for;
pub use entity::create_router as entity_router;
pub use health::create_router as health_router;
pub use mappings::create_router as mappings_router;
pub use resolve::create_router as resolve_router;

// ============================================================================
// OPENAPI ENDPOINTS
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

fn is_production_environment() -> bool {
    std::env::var("CANON_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Production deployments must name their CORS origins.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set CANON_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// CORS for browser partners. Conditional-read headers are exposed so
/// clients can revalidate with `If-None-Match`. No configured origins means
/// any origin.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::IF_NONE_MATCH,
        ])
        .expose_headers([
            header::ETAG,
            header::CACHE_CONTROL,
            HeaderName::from_static(HEADER_SERVED_FROM),
            HeaderName::from_static(HEADER_CONSISTENCY),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS open to any origin");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS restricted to configured origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Versioned resource routes.
fn v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/entities", entity_router())
        .nest("/resolve", resolve_router())
        .nest("/mappings", mappings_router())
        .nest("/changes", changes_router())
        .nest("/snapshot", snapshot_router())
}

/// Create the complete API router.
///
/// - Resource routes under /v1/*
/// - Health checks at /health/*
/// - Metrics at /metrics
/// - OpenAPI spec at /openapi.json
/// - Swagger UI at /swagger-ui (when the swagger-ui feature is enabled)
///
/// # Middleware Order (outer to inner)
/// 1. CORS (outermost) - handles preflight requests
/// 2. Observability - tracing span and metrics per request
pub fn create_api_router(state: AppState, config: &ApiConfig) -> ApiResult<Router> {
    if is_production_environment() {
        validate_api_config_for_production(config)?;
    }

    #[allow(unused_mut)]
    let mut router = Router::new()
        .nest("/v1", v1_routes())
        .nest("/health", health_router())
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .with_state(state);

    #[cfg(feature = "swagger-ui")]
    {
        use utoipa_swagger_ui::SwaggerUi;
        router = router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()));
    }

    Ok(router
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_cors_origins() {
        let config = ApiConfig::default();
        assert!(validate_api_config_for_production(&config).is_err());

        let config = ApiConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_ok());
    }
}
