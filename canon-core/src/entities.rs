//! Core entity structures

use crate::{
    EntityId, EntityKind, EntityStatus, MappingState, PartitionId, Timestamp, ValidationError,
    Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a namespace slug.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Maximum length of an external identifier, in bytes.
pub const MAX_EXTERNAL_ID_LEN: usize = 256;

/// Maximum length of an entity display name, in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 512;

/// Canonical entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Entity {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub display_name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub attributes: serde_json::Value,
    pub status: EntityStatus,
    pub version: Version,
    pub partition: PartitionId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Entity {
    /// Build version 1 of a new entity.
    pub fn new(entity_id: EntityId, draft: NewEntity, partition: PartitionId, now: Timestamp) -> Self {
        Self {
            entity_id,
            kind: draft.kind,
            display_name: draft.display_name,
            attributes: draft.attributes,
            status: EntityStatus::Live,
            version: 1,
            partition,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Produce the next version with the patch applied.
    pub fn patched(&self, patch: &EntityPatch, now: Timestamp) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.display_name {
            next.display_name = name.clone();
        }
        if let Some(attrs) = &patch.attributes {
            next.attributes = attrs.clone();
        }
        next.version = self.version + 1;
        next.updated_at = now;
        next
    }

    /// Produce the next version in the tombstoned state.
    pub fn tombstoned(&self, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.status = EntityStatus::Tombstoned;
        next.version = self.version + 1;
        next.updated_at = now;
        next
    }
}

/// Input for creating an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewEntity {
    pub kind: EntityKind,
    pub display_name: String,
    #[serde(default = "empty_object")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub attributes: serde_json::Value,
}

impl NewEntity {
    pub fn new(kind: EntityKind, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            attributes: empty_object(),
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_display_name(&self.display_name)?;
        validate_attributes(&self.attributes)
    }
}

/// Partial update applied by the curation write path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntityPatch {
    pub display_name: Option<String>,
    /// Replaces the attribute object wholesale when present.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attributes: Option<serde_json::Value>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.attributes.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "display_name or attributes".to_string(),
            });
        }
        if let Some(name) = &self.display_name {
            validate_display_name(name)?;
        }
        if let Some(attrs) = &self.attributes {
            validate_attributes(attrs)?;
        }
        Ok(())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "display_name".to_string(),
        });
    }
    if name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::InvalidValue {
            field: "display_name".to_string(),
            reason: format!("must be at most {} bytes", MAX_DISPLAY_NAME_LEN),
        });
    }
    Ok(())
}

fn validate_attributes(attrs: &serde_json::Value) -> Result<(), ValidationError> {
    if !attrs.is_object() {
        return Err(ValidationError::InvalidValue {
            field: "attributes".to_string(),
            reason: "must be a JSON object".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// EXTERNAL IDENTIFIERS
// ============================================================================

/// An identifier issued by an external system, scoped by namespace.
///
/// External ids are kept verbatim: chain addresses are case-sensitive in
/// some namespaces, so no folding happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExternalRef {
    pub namespace: String,
    pub external_id: String,
}

impl ExternalRef {
    /// Build a validated reference.
    pub fn new(
        namespace: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let external = Self::new_unchecked(namespace, external_id);
        external.validate()?;
        Ok(external)
    }

    /// Build a reference without validation. Intended for tests and for
    /// values read back from storage.
    pub fn new_unchecked(namespace: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            external_id: external_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "namespace".to_string(),
            });
        }
        if self.namespace.len() > MAX_NAMESPACE_LEN {
            return Err(ValidationError::InvalidValue {
                field: "namespace".to_string(),
                reason: format!("must be at most {} characters", MAX_NAMESPACE_LEN),
            });
        }
        if !self.namespace.bytes().all(is_namespace_byte) {
            return Err(ValidationError::InvalidValue {
                field: "namespace".to_string(),
                reason: "must contain only a-z, 0-9, '_', '.' or '-'".to_string(),
            });
        }
        if self.external_id.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "external_id".to_string(),
            });
        }
        if self.external_id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(ValidationError::InvalidValue {
                field: "external_id".to_string(),
                reason: format!("must be at most {} bytes", MAX_EXTERNAL_ID_LEN),
            });
        }
        if self.external_id.chars().any(char::is_control) {
            return Err(ValidationError::InvalidValue {
                field: "external_id".to_string(),
                reason: "must not contain control characters".to_string(),
            });
        }
        Ok(())
    }
}

fn is_namespace_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'.' | b'-')
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.external_id)
    }
}

/// One revision of the binding between an external reference and an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IdentifierMapping {
    pub external: ExternalRef,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
    pub state: MappingState,
    /// Starts at 1 for the first binding of `external`; each remap adds one.
    pub revision: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub registered_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub retired_at: Option<Timestamp>,
}

impl IdentifierMapping {
    pub fn new(external: ExternalRef, entity_id: EntityId, revision: u64, now: Timestamp) -> Self {
        Self {
            external,
            entity_id,
            state: MappingState::Active,
            revision,
            registered_at: now,
            retired_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == MappingState::Active
    }

    /// Mark this revision as superseded.
    pub fn retire(&mut self, now: Timestamp) {
        self.state = MappingState::Tombstoned;
        self.retired_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_external_ref_accepts_chain_address_verbatim() {
        let external = ExternalRef::new("chain", "0xAbC123").expect("valid ref");
        assert_eq!(external.external_id, "0xAbC123");
        assert_eq!(external.to_string(), "chain:0xAbC123");
    }

    #[test]
    fn test_external_ref_rejects_bad_namespace() {
        assert!(ExternalRef::new("Chain", "x").is_err());
        assert!(ExternalRef::new("", "x").is_err());
        assert!(ExternalRef::new("a b", "x").is_err());
        assert!(ExternalRef::new("a".repeat(MAX_NAMESPACE_LEN + 1), "x").is_err());
        assert!(ExternalRef::new("isin.v2_x-y", "x").is_ok());
    }

    #[test]
    fn test_external_ref_rejects_bad_external_id() {
        assert!(matches!(
            ExternalRef::new("chain", ""),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(ExternalRef::new("chain", "a\nb").is_err());
        assert!(ExternalRef::new("chain", "x".repeat(MAX_EXTERNAL_ID_LEN + 1)).is_err());
        assert!(ExternalRef::new("chain", "x".repeat(MAX_EXTERNAL_ID_LEN)).is_ok());
    }

    #[test]
    fn test_entity_patch_bumps_version() {
        let now = Utc::now();
        let entity = Entity::new(
            EntityId::now_v7(),
            NewEntity::new(EntityKind::Asset, "Bitcoin").with_attributes(json!({"ticker": "BTC"})),
            0,
            now,
        );
        assert_eq!(entity.version, 1);
        assert!(entity.is_live());

        let patch = EntityPatch {
            display_name: Some("Bitcoin (BTC)".to_string()),
            attributes: None,
        };
        let next = entity.patched(&patch, now);
        assert_eq!(next.version, 2);
        assert_eq!(next.display_name, "Bitcoin (BTC)");
        assert_eq!(next.attributes, json!({"ticker": "BTC"}));
        assert_eq!(next.created_at, entity.created_at);

        let dead = next.tombstoned(now);
        assert_eq!(dead.version, 3);
        assert!(!dead.is_live());
    }

    #[test]
    fn test_new_entity_validation() {
        assert!(NewEntity::new(EntityKind::Issuer, "Acme").validate().is_ok());
        assert!(NewEntity::new(EntityKind::Issuer, "  ").validate().is_err());
        assert!(NewEntity::new(EntityKind::Issuer, "Acme")
            .with_attributes(json!([1, 2]))
            .validate()
            .is_err());
    }

    #[test]
    fn test_empty_patch_is_rejected() {
        assert!(EntityPatch::default().validate().is_err());
    }

    #[test]
    fn test_new_entity_defaults_attributes() -> Result<(), serde_json::Error> {
        let draft: NewEntity =
            serde_json::from_value(json!({"kind": "network", "display_name": "Ethereum"}))?;
        assert_eq!(draft.attributes, json!({}));
        Ok(())
    }

    #[test]
    fn test_mapping_retire() {
        let now = Utc::now();
        let mut mapping =
            IdentifierMapping::new(ExternalRef::new_unchecked("chain", "0x1"), EntityId::nil(), 1, now);
        assert!(mapping.is_active());
        mapping.retire(now);
        assert!(!mapping.is_active());
        assert_eq!(mapping.retired_at, Some(now));
    }
}
