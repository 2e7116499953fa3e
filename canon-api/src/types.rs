//! API Request and Response Types
//!
//! Wire types for the HTTP surface. Domain types from `canon-core` are
//! returned directly where their shape is already what clients need.

use canon_core::{
    CanonResult, ChangeEvent, Cursor, EntityId, EntityPatch, ExternalRef, IdentifierMapping,
    PartitionId, PartitionSummary, ReadConsistency, Sequence, Version,
};
use canon_storage::{ChangeBatch, Registration};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITY TYPES
// ============================================================================

/// Consistency selector shared by the read routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ReadQuery {
    /// `acknowledged` (default) serves from the cache tiers,
    /// `authoritative` reads the store.
    pub consistency: Option<ReadConsistency>,
}

/// Request to update an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateEntityRequest {
    /// Version the caller last read; the update fails with 409 otherwise
    pub expected_version: Version,
    /// New display name (if changing)
    pub display_name: Option<String>,
    /// Replacement attributes (if changing)
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attributes: Option<serde_json::Value>,
}

impl UpdateEntityRequest {
    pub fn into_patch(self) -> (EntityPatch, Version) {
        (
            EntityPatch {
                display_name: self.display_name,
                attributes: self.attributes,
            },
            self.expected_version,
        )
    }
}

/// Active identifiers of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MappingListResponse {
    pub mappings: Vec<IdentifierMapping>,
}

// ============================================================================
// RESOLUTION AND MAPPING TYPES
// ============================================================================

/// Query for `GET /v1/resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ResolveQuery {
    pub namespace: String,
    pub external_id: String,
    pub consistency: Option<ReadConsistency>,
}

impl ResolveQuery {
    pub fn external(&self) -> CanonResult<ExternalRef> {
        Ok(ExternalRef::new(&self.namespace, &self.external_id)?)
    }
}

/// Query for `GET /v1/mappings/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct MappingHistoryQuery {
    pub namespace: String,
    pub external_id: String,
}

impl MappingHistoryQuery {
    pub fn external(&self) -> CanonResult<ExternalRef> {
        Ok(ExternalRef::new(&self.namespace, &self.external_id)?)
    }
}

/// Request to bind an external identifier to a canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterMappingRequest {
    pub namespace: String,
    pub external_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
}

/// Request to move a mapping from one entity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RemapRequest {
    pub namespace: String,
    pub external_id: String,
    /// Entity the caller believes the identifier resolves to now
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub expected_entity_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
}

/// What a registration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// Fresh binding
    Bound,
    /// Already bound to the requested entity
    Unchanged,
    /// Moved off a tombstoned entity; a remap event was emitted
    Remapped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegistrationResponse {
    pub outcome: RegistrationOutcome,
    pub mapping: IdentifierMapping,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_entity_id: Option<EntityId>,
}

impl From<Registration> for RegistrationResponse {
    fn from(registration: Registration) -> Self {
        match registration {
            Registration::Bound(mapping) => Self {
                outcome: RegistrationOutcome::Bound,
                mapping,
                previous_entity_id: None,
            },
            Registration::Unchanged(mapping) => Self {
                outcome: RegistrationOutcome::Unchanged,
                mapping,
                previous_entity_id: None,
            },
            Registration::Remapped { mapping, previous } => Self {
                outcome: RegistrationOutcome::Remapped,
                mapping,
                previous_entity_id: Some(previous),
            },
        }
    }
}

// ============================================================================
// CHANGE FEED TYPES
// ============================================================================

/// Query for `GET /v1/changes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ChangesQuery {
    /// Opaque cursor token from a previous page or snapshot
    pub since: Option<String>,
    /// Partition to read from the start when `since` is absent
    pub partition: Option<PartitionId>,
    pub limit: Option<usize>,
}

impl ChangesQuery {
    pub fn cursor(&self) -> CanonResult<Cursor> {
        match &self.since {
            Some(token) => Ok(Cursor::decode(token)?),
            None => Ok(Cursor::start(self.partition.unwrap_or(0))),
        }
    }
}

/// One page of the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChangesResponse {
    pub events: Vec<ChangeEvent>,
    /// Pass back as `since` to continue
    pub next_cursor: String,
    pub has_more: bool,
}

impl From<ChangeBatch> for ChangesResponse {
    fn from(batch: ChangeBatch) -> Self {
        let next_cursor = batch.next_cursor().encode();
        let has_more = batch.has_more();
        Self {
            events: batch.collect(),
            next_cursor,
            has_more,
        }
    }
}

/// Bounds of one partition with ready-made cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PartitionResponse {
    pub partition: PartitionId,
    pub head: Sequence,
    pub horizon: Sequence,
    pub retained: u64,
    /// Oldest cursor still readable
    pub start_cursor: String,
    /// Cursor that yields only future events
    pub head_cursor: String,
}

impl From<PartitionSummary> for PartitionResponse {
    fn from(summary: PartitionSummary) -> Self {
        Self {
            partition: summary.partition,
            head: summary.head,
            horizon: summary.horizon,
            retained: summary.retained,
            start_cursor: summary.horizon_cursor().encode(),
            head_cursor: summary.head_cursor().encode(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PartitionsResponse {
    pub partitions: Vec<PartitionResponse>,
}

/// Query for `GET /v1/snapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct SnapshotQuery {
    pub partition: PartitionId,
}
