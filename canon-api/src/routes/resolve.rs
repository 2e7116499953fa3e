//! Identifier resolution route.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use canon_core::IdentifierMapping;

use super::conditional::read_response;
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    telemetry::metrics,
    types::ResolveQuery,
};

/// GET /v1/resolve - Resolve an external identifier to its canonical entity
///
/// The ETag carries the mapping revision, which changes on every remap.
#[utoipa::path(
    get,
    path = "/v1/resolve",
    tag = "Resolution",
    params(ResolveQuery),
    responses(
        (status = 200, description = "Active mapping", body = IdentifierMapping),
        (status = 304, description = "If-None-Match matches the current revision"),
        (status = 400, description = "Invalid namespace or external id", body = ApiError),
        (status = 404, description = "No active mapping", body = ApiError),
        (status = 503, description = "Store unavailable and mapping not cached", body = ApiError),
    ),
)]
pub async fn resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let external = query.external()?;
    let consistency = query.consistency.unwrap_or_default();
    let read = state.cache.resolve(&external, consistency).await?;
    if let Some(metrics) = metrics() {
        metrics.record_cache_read("mapping", read.served_from());
    }
    tracing::debug!(
        external = %external,
        entity_id = %read.value().entity_id,
        tier = %read.served_from(),
        "Resolved external identifier"
    );
    read_response(&headers, read, consistency, state.config.cache.edge_max_age)
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(resolve))
}
