//! Entity REST API Routes
//!
//! Reads go through the coherence layer; writes go to the authoritative
//! store, which appends the change event that later evicts cached copies.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use canon_core::{Entity, NewEntity};

use super::conditional::read_response;
use crate::{
    error::{ApiError, ApiResult},
    extractors::PathEntityId,
    state::AppState,
    telemetry::metrics,
    types::{MappingListResponse, ReadQuery, UpdateEntityRequest},
};

fn record_mutation<T>(operation: &str, result: &ApiResult<T>) {
    if let Some(metrics) = metrics() {
        metrics.record_mutation(operation, result.is_ok());
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /v1/entities/{id} - Read a canonical entity
#[utoipa::path(
    get,
    path = "/v1/entities/{id}",
    tag = "Entities",
    params(
        ("id" = String, Path, description = "Entity ID"),
        ReadQuery,
    ),
    responses(
        (status = 200, description = "Entity found (tombstoned entities included)", body = Entity),
        (status = 304, description = "If-None-Match matches the current version"),
        (status = 400, description = "Invalid entity ID", body = ApiError),
        (status = 404, description = "Entity not found", body = ApiError),
        (status = 503, description = "Store unavailable and value not cached", body = ApiError),
    ),
)]
pub async fn get_entity(
    State(state): State<AppState>,
    PathEntityId(id): PathEntityId,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let consistency = query.consistency.unwrap_or_default();
    let read = state.cache.get_entity(id, consistency).await?;
    if let Some(metrics) = metrics() {
        metrics.record_cache_read("entity", read.served_from());
    }
    read_response(&headers, read, consistency, state.config.cache.edge_max_age)
}

/// POST /v1/entities - Create a canonical entity
#[utoipa::path(
    post,
    path = "/v1/entities",
    tag = "Entities",
    request_body = NewEntity,
    responses(
        (status = 201, description = "Entity created", body = Entity),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError),
    ),
)]
pub async fn create_entity(
    State(state): State<AppState>,
    Json(req): Json<NewEntity>,
) -> ApiResult<impl IntoResponse> {
    let result = state.store.create(req).await.map_err(ApiError::from);
    record_mutation("create_entity", &result);
    let entity = result?;
    tracing::info!(entity_id = %entity.entity_id, kind = %entity.kind, "Entity created");
    Ok((StatusCode::CREATED, Json(entity)))
}

/// PATCH /v1/entities/{id} - Update an entity at an expected version
#[utoipa::path(
    patch,
    path = "/v1/entities/{id}",
    tag = "Entities",
    params(
        ("id" = String, Path, description = "Entity ID"),
    ),
    request_body = UpdateEntityRequest,
    responses(
        (status = 200, description = "Entity updated", body = Entity),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Entity not found", body = ApiError),
        (status = 409, description = "Version mismatch or entity tombstoned", body = ApiError),
    ),
)]
pub async fn update_entity(
    State(state): State<AppState>,
    PathEntityId(id): PathEntityId,
    Json(req): Json<UpdateEntityRequest>,
) -> ApiResult<Json<Entity>> {
    let (patch, expected_version) = req.into_patch();
    let result = state
        .store
        .update(id, patch, expected_version)
        .await
        .map_err(ApiError::from);
    record_mutation("update_entity", &result);
    let entity = result?;
    tracing::info!(entity_id = %id, version = entity.version, "Entity updated");
    Ok(Json(entity))
}

/// DELETE /v1/entities/{id} - Tombstone an entity
#[utoipa::path(
    delete,
    path = "/v1/entities/{id}",
    tag = "Entities",
    params(
        ("id" = String, Path, description = "Entity ID"),
    ),
    responses(
        (status = 200, description = "Entity tombstoned", body = Entity),
        (status = 404, description = "Entity not found", body = ApiError),
    ),
)]
pub async fn tombstone_entity(
    State(state): State<AppState>,
    PathEntityId(id): PathEntityId,
) -> ApiResult<Json<Entity>> {
    let result = state.store.tombstone(id).await.map_err(ApiError::from);
    record_mutation("tombstone_entity", &result);
    let entity = result?;
    tracing::info!(entity_id = %id, version = entity.version, "Entity tombstoned");
    Ok(Json(entity))
}

/// GET /v1/entities/{id}/identifiers - Active external identifiers of an entity
#[utoipa::path(
    get,
    path = "/v1/entities/{id}/identifiers",
    tag = "Entities",
    params(
        ("id" = String, Path, description = "Entity ID"),
    ),
    responses(
        (status = 200, description = "Active mappings", body = MappingListResponse),
        (status = 404, description = "Entity not found", body = ApiError),
    ),
)]
pub async fn list_identifiers(
    State(state): State<AppState>,
    PathEntityId(id): PathEntityId,
) -> ApiResult<Json<MappingListResponse>> {
    if state.store.get(id).await?.is_none() {
        return Err(ApiError::entity_not_found(id));
    }
    let mappings = state.registry.mappings_for(id).await?;
    Ok(Json(MappingListResponse { mappings }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::post(create_entity))
        .route(
            "/:id",
            get(get_entity).patch(update_entity).delete(tombstone_entity),
        )
        .route("/:id/identifiers", get(list_identifiers))
}
