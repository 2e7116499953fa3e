//! Identity types for CANON entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Change feed partition number.
pub type PartitionId = u32;

/// Per-partition change feed sequence number. Zero means "before the first event".
pub type Sequence = u64;

/// Monotonic entity version. The first version of every entity is 1.
pub type Version = u64;

/// Canonical entity identifier.
///
/// Opaque, globally unique, assigned once at creation and never reused.
/// Backed by UUIDv7 so that identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Wrap an existing UUID.
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Mint a fresh, timestamp-sortable identifier.
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    /// The nil identifier. Never assigned to a real entity.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Change feed partition this entity's events are written to.
    ///
    /// Uses the low 64 bits of the UUID, which are random for UUIDv7.
    pub fn partition(&self, partition_count: u32) -> PartitionId {
        let count = u64::from(partition_count.max(1));
        let (_, low) = self.0.as_u64_pair();
        (low % count) as PartitionId
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrips_through_string() {
        let id = EntityId::now_v7();
        let parsed: EntityId = id.to_string().parse().expect("valid uuid");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_entity_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_partition_is_stable_and_bounded() {
        let id = EntityId::now_v7();
        let p = id.partition(8);
        assert!(p < 8);
        assert_eq!(p, id.partition(8));
        assert_eq!(id.partition(1), 0);
        // A zero partition count is treated as one partition.
        assert_eq!(id.partition(0), 0);
    }
}
