//! Identifier Mapping Routes
//!
//! Curation entry points for binding external identifiers. Conflicts never
//! mutate the registry: a 409 leaves the current binding in place.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use canon_core::{CanonError, ExternalRef, IdentifierMapping, RegistryError};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    telemetry::metrics,
    types::{
        MappingHistoryQuery, MappingListResponse, RegisterMappingRequest, RegistrationOutcome,
        RegistrationResponse, RemapRequest,
    },
};

/// POST /v1/mappings - Bind an external identifier to an entity
///
/// Idempotent for the same target. A mapping held by a tombstoned entity is
/// moved to the new target and reported as `remapped`.
#[utoipa::path(
    post,
    path = "/v1/mappings",
    tag = "Mappings",
    request_body = RegisterMappingRequest,
    responses(
        (status = 201, description = "Mapping bound or moved", body = RegistrationResponse),
        (status = 200, description = "Already bound to this entity", body = RegistrationResponse),
        (status = 400, description = "Invalid identifier", body = ApiError),
        (status = 404, description = "Target entity not found", body = ApiError),
        (status = 409, description = "Bound to a different live entity", body = ApiError),
    ),
)]
pub async fn register_mapping(
    State(state): State<AppState>,
    Json(req): Json<RegisterMappingRequest>,
) -> ApiResult<impl IntoResponse> {
    let external =
        ExternalRef::new(req.namespace, req.external_id).map_err(CanonError::from)?;
    let result = state
        .registry
        .register_mapping(external, req.entity_id)
        .await
        .map_err(ApiError::from);
    if let Some(metrics) = metrics() {
        metrics.record_mutation("register_mapping", result.is_ok());
    }

    let response = RegistrationResponse::from(result?);
    let status = match response.outcome {
        RegistrationOutcome::Unchanged => StatusCode::OK,
        RegistrationOutcome::Bound | RegistrationOutcome::Remapped => StatusCode::CREATED,
    };
    Ok((status, Json(response)))
}

/// POST /v1/mappings/remap - Move a mapping, compare-and-set on the current target
#[utoipa::path(
    post,
    path = "/v1/mappings/remap",
    tag = "Mappings",
    request_body = RemapRequest,
    responses(
        (status = 200, description = "Mapping now points at the requested entity", body = IdentifierMapping),
        (status = 400, description = "Invalid identifier", body = ApiError),
        (status = 404, description = "No active mapping or target entity", body = ApiError),
        (status = 409, description = "Mapping no longer points at the expected entity", body = ApiError),
    ),
)]
pub async fn remap(
    State(state): State<AppState>,
    Json(req): Json<RemapRequest>,
) -> ApiResult<Json<IdentifierMapping>> {
    let external =
        ExternalRef::new(req.namespace, req.external_id).map_err(CanonError::from)?;
    let result = state
        .registry
        .remap(external, req.expected_entity_id, req.entity_id)
        .await
        .map_err(ApiError::from);
    if let Some(metrics) = metrics() {
        metrics.record_mutation("remap", result.is_ok());
    }
    Ok(Json(result?))
}

/// GET /v1/mappings/history - Every revision of an external identifier
#[utoipa::path(
    get,
    path = "/v1/mappings/history",
    tag = "Mappings",
    params(MappingHistoryQuery),
    responses(
        (status = 200, description = "Revisions, oldest first", body = MappingListResponse),
        (status = 400, description = "Invalid identifier", body = ApiError),
        (status = 404, description = "Identifier never registered", body = ApiError),
    ),
)]
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<MappingHistoryQuery>,
) -> ApiResult<Json<MappingListResponse>> {
    let external = query.external()?;
    let mappings = state.registry.history(&external).await?;
    if mappings.is_empty() {
        return Err(CanonError::from(RegistryError::MappingNotFound { external }).into());
    }
    Ok(Json(MappingListResponse { mappings }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_mapping))
        .route("/remap", post(remap))
        .route("/history", get(history))
}
