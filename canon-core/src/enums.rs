//! Enum types for CANON entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY ENUMS
// ============================================================================

/// Kind of canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Asset,
    Issuer,
    Platform,
    Network,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Asset => "asset",
            EntityKind::Issuer => "issuer",
            EntityKind::Platform => "platform",
            EntityKind::Network => "network",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asset" => Ok(EntityKind::Asset),
            "issuer" => Ok(EntityKind::Issuer),
            "platform" => Ok(EntityKind::Platform),
            "network" => Ok(EntityKind::Network),
            _ => Err(EnumParseError::new("entity kind", s)),
        }
    }
}

/// Lifecycle state of an entity. Entities are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Live,
    /// Soft-deleted; still readable and still resolvable.
    Tombstoned,
}

impl EntityStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, EntityStatus::Live)
    }
}

/// State of a single identifier mapping revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum MappingState {
    #[default]
    Active,
    /// Superseded by a remap. Kept for audit.
    Tombstoned,
}

/// Kind of mutation recorded in the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Remapped,
    Tombstoned,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Remapped => "remapped",
            ChangeKind::Tombstoned => "tombstoned",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE ENUMS
// ============================================================================

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Edge,
    Hot,
    Store,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Edge => "edge",
            CacheTier::Hot => "hot",
            CacheTier::Store => "store",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistency a caller asks for on a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Serve from the cache tiers. Data is never older than the last
    /// acknowledged change event for the key, but may lag the store by the
    /// feed consumption latency.
    #[default]
    Acknowledged,
    /// Bypass both tiers and read the authoritative store.
    Authoritative,
}

impl FromStr for ReadConsistency {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "acknowledged" => Ok(ReadConsistency::Acknowledged),
            "authoritative" => Ok(ReadConsistency::Authoritative),
            _ => Err(EnumParseError::new("read consistency", s)),
        }
    }
}

/// Error when parsing an enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse_is_case_insensitive() {
        assert_eq!("Asset".parse::<EntityKind>(), Ok(EntityKind::Asset));
        assert_eq!("NETWORK".parse::<EntityKind>(), Ok(EntityKind::Network));
        assert!("token".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_serde_is_lowercase() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&EntityKind::Issuer)?;
        assert_eq!(json, "\"issuer\"");
        let back: EntityKind = serde_json::from_str("\"platform\"")?;
        assert_eq!(back, EntityKind::Platform);
        Ok(())
    }

    #[test]
    fn test_change_kind_display() {
        assert_eq!(ChangeKind::Remapped.to_string(), "remapped");
        assert_eq!(ChangeKind::Tombstoned.as_str(), "tombstoned");
    }

    #[test]
    fn test_read_consistency_default() {
        assert_eq!(ReadConsistency::default(), ReadConsistency::Acknowledged);
        assert_eq!(
            "authoritative".parse::<ReadConsistency>(),
            Ok(ReadConsistency::Authoritative)
        );
    }

    #[test]
    fn test_parse_error_message() {
        let err = "x".parse::<EntityKind>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid entity kind: x");
    }
}
