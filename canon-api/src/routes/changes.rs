//! Change Feed Routes
//!
//! Paged, resumable reads of the partitioned change feed. Cursors are
//! opaque tokens; a cursor that fell behind retention gets `410 Gone` with
//! a pointer to the partition snapshot.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use canon_core::Snapshot;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{ChangesQuery, ChangesResponse, PartitionsResponse, SnapshotQuery},
};

/// GET /v1/changes - Read change events after a cursor
#[utoipa::path(
    get,
    path = "/v1/changes",
    tag = "Changes",
    params(ChangesQuery),
    responses(
        (status = 200, description = "Next page of events", body = ChangesResponse),
        (status = 400, description = "Malformed cursor or unknown partition", body = ApiError),
        (status = 410, description = "Cursor expired, re-snapshot the partition", body = ApiError),
    ),
)]
pub async fn read_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> ApiResult<Json<ChangesResponse>> {
    let cursor = query.cursor()?;
    let limit = state.config.feed.page_size(query.limit);
    let batch = state.feed.read_since(cursor, limit).await?;
    tracing::debug!(
        partition = cursor.partition,
        sequence = cursor.sequence,
        returned = batch.len(),
        has_more = batch.has_more(),
        "Served change page"
    );
    Ok(Json(ChangesResponse::from(batch)))
}

/// GET /v1/changes/partitions - Head, horizon and cursors of every partition
#[utoipa::path(
    get,
    path = "/v1/changes/partitions",
    tag = "Changes",
    responses(
        (status = 200, description = "Partition bounds", body = PartitionsResponse),
    ),
)]
pub async fn list_partitions(State(state): State<AppState>) -> ApiResult<Json<PartitionsResponse>> {
    let partitions = state.feed.partitions().await?;
    Ok(Json(PartitionsResponse {
        partitions: partitions.into_iter().map(Into::into).collect(),
    }))
}

/// GET /v1/snapshot - Every entity of a partition plus the cursor to resume from
#[utoipa::path(
    get,
    path = "/v1/snapshot",
    tag = "Changes",
    params(SnapshotQuery),
    responses(
        (status = 200, description = "Partition snapshot", body = Snapshot),
        (status = 400, description = "Unknown partition", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError),
    ),
)]
pub async fn snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<Snapshot>> {
    let snapshot = state.store.snapshot(query.partition).await?;
    tracing::info!(
        partition = query.partition,
        entities = snapshot.entities.len(),
        sequence = snapshot.cursor.sequence,
        "Served partition snapshot"
    );
    Ok(Json(snapshot))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(read_changes))
        .route("/partitions", get(list_partitions))
}

pub fn create_snapshot_router() -> Router<AppState> {
    Router::new().route("/", get(snapshot))
}
