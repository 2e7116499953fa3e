//! OpenAPI Specification for CANON API
//!
//! Generated with utoipa from the route annotations and the wire types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{changes, entity, health, mappings, resolve};
use crate::types::*;

use canon_core::{
    CacheTier, ChangeEvent, ChangeKind, Entity, EntityKind, EntityStatus, ExternalRef,
    IdentifierMapping, MappingState, NewEntity, ReadConsistency, Snapshot,
};

/// OpenAPI document for CANON API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CANON API",
        version = "0.1.0",
        description = "Canonical entity resolution with a cache-coherent read path and a partitioned change feed",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Entities", description = "Canonical entity reads and curation writes"),
        (name = "Resolution", description = "External identifier to canonical entity lookup"),
        (name = "Mappings", description = "Identifier registry curation and audit trail"),
        (name = "Changes", description = "Partitioned change feed, partition bounds and snapshots"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics"),
    ),
    paths(
        // Entities
        entity::get_entity,
        entity::create_entity,
        entity::update_entity,
        entity::tombstone_entity,
        entity::list_identifiers,
        // Resolution
        resolve::resolve,
        // Mappings
        mappings::register_mapping,
        mappings::remap,
        mappings::history,
        // Changes
        changes::read_changes,
        changes::list_partitions,
        changes::snapshot,
        // Health
        health::ping,
        health::liveness,
        health::readiness,
        // Observability
        crate::telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            // Errors
            ApiError,
            ErrorCode,
            // Domain
            Entity,
            EntityKind,
            EntityStatus,
            NewEntity,
            ExternalRef,
            IdentifierMapping,
            MappingState,
            ChangeEvent,
            ChangeKind,
            Snapshot,
            CacheTier,
            ReadConsistency,
            // Requests and responses
            UpdateEntityRequest,
            MappingListResponse,
            RegisterMappingRequest,
            RemapRequest,
            RegistrationOutcome,
            RegistrationResponse,
            ChangesResponse,
            PartitionResponse,
            PartitionsResponse,
            health::HealthResponse,
            health::HealthStatus,
            health::HealthDetails,
            health::ComponentHealth,
        )
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();

        assert_eq!(openapi.info.title, "CANON API");

        let tags = openapi
            .tags
            .as_ref()
            .ok_or_else(|| "OpenAPI tags missing".to_string())?;
        assert_eq!(tags.len(), 6);

        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "OpenAPI components missing".to_string())?;
        assert!(components.schemas.contains_key("Entity"));
        assert!(components.schemas.contains_key("ChangesResponse"));
        Ok(())
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;
        assert!(json.contains("CANON API"));
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();
        let paths = &openapi.paths.paths;

        for path in [
            "/v1/entities",
            "/v1/entities/{id}",
            "/v1/entities/{id}/identifiers",
            "/v1/resolve",
            "/v1/mappings",
            "/v1/mappings/remap",
            "/v1/mappings/history",
            "/v1/changes",
            "/v1/changes/partitions",
            "/v1/snapshot",
            "/health/ready",
            "/metrics",
        ] {
            assert!(paths.contains_key(path), "missing path {}", path);
        }
    }
}
