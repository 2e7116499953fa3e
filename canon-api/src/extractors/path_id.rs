//! Path extractor for canonical entity IDs.
//!
//! `Path<Uuid>` rejects with a plain-text body. `PathEntityId` rejects with
//! the same structured [`ApiError`] every other route returns.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use canon_core::EntityId;
use uuid::Uuid;

use crate::error::ApiError;

/// Extractor for the `:id` segment of `/v1/entities/:id` routes.
///
/// ```rust,ignore
/// async fn get_entity(PathEntityId(id): PathEntityId) -> ApiResult<Response> {
///     // id is EntityId, not Uuid
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PathEntityId(pub EntityId);

#[async_trait]
impl<S> FromRequestParts<S> for PathEntityId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(uuid): Path<Uuid> = Path::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                ApiError::invalid_format("id", "UUID").with_details(serde_json::json!({
                    "path": parts.uri.path(),
                    "reason": e.body_text(),
                }))
            })?;
        Ok(PathEntityId(EntityId::new(uuid)))
    }
}
