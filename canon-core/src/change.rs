//! Change feed records and cursors

use crate::{
    ChangeKind, Entity, EntityId, ExternalRef, FeedError, PartitionId, Sequence, Timestamp,
    Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoded cursor length: 4 partition bytes plus 8 sequence bytes, hex encoded.
const CURSOR_TOKEN_LEN: usize = 24;

/// Position in one partition of the change feed.
///
/// A cursor names the last event a reader has seen; reading from it yields
/// the events strictly after `sequence`. On the wire it is an opaque hex
/// token so clients never build cursors by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor {
    pub partition: PartitionId,
    pub sequence: Sequence,
}

impl Cursor {
    pub const fn new(partition: PartitionId, sequence: Sequence) -> Self {
        Self {
            partition,
            sequence,
        }
    }

    /// Cursor before the first event of a partition.
    pub const fn start(partition: PartitionId) -> Self {
        Self::new(partition, 0)
    }

    pub fn encode(&self) -> String {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&self.partition.to_be_bytes());
        bytes[4..].copy_from_slice(&self.sequence.to_be_bytes());
        hex::encode(bytes)
    }

    pub fn decode(token: &str) -> Result<Self, FeedError> {
        let malformed = || FeedError::MalformedCursor {
            token: token.to_string(),
        };
        if token.len() != CURSOR_TOKEN_LEN {
            return Err(malformed());
        }
        let bytes = hex::decode(token).map_err(|_| malformed())?;
        let partition: [u8; 4] = bytes[..4].try_into().map_err(|_| malformed())?;
        let sequence: [u8; 8] = bytes[4..].try_into().map_err(|_| malformed())?;
        Ok(Self::new(
            u32::from_be_bytes(partition),
            u64::from_be_bytes(sequence),
        ))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for Cursor {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.encode()
    }
}

/// A recorded mutation of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChangeEvent {
    pub sequence: Sequence,
    pub partition: PartitionId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
    pub kind: ChangeKind,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    /// Entity version after the mutation.
    pub version: Version,
    /// Remapped external reference (remapped events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRef>,
    /// Entity the external reference was bound to before (remapped events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub previous_entity_id: Option<EntityId>,
}

impl ChangeEvent {
    /// Cursor positioned at this event.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.partition, self.sequence)
    }

    /// Entities whose cached state this event makes stale.
    pub fn affected_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        std::iter::once(self.entity_id).chain(self.previous_entity_id)
    }
}

/// A change event before the feed has assigned it a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDraft {
    pub entity_id: EntityId,
    pub kind: ChangeKind,
    pub version: Version,
    pub external: Option<ExternalRef>,
    pub previous_entity_id: Option<EntityId>,
}

impl ChangeDraft {
    fn for_entity(entity: &Entity, kind: ChangeKind) -> Self {
        Self {
            entity_id: entity.entity_id,
            kind,
            version: entity.version,
            external: None,
            previous_entity_id: None,
        }
    }

    pub fn created(entity: &Entity) -> Self {
        Self::for_entity(entity, ChangeKind::Created)
    }

    pub fn updated(entity: &Entity) -> Self {
        Self::for_entity(entity, ChangeKind::Updated)
    }

    pub fn tombstoned(entity: &Entity) -> Self {
        Self::for_entity(entity, ChangeKind::Tombstoned)
    }

    /// `external` now points at `entity` instead of `previous`.
    pub fn remapped(entity: &Entity, external: ExternalRef, previous: EntityId) -> Self {
        Self {
            external: Some(external),
            previous_entity_id: Some(previous),
            ..Self::for_entity(entity, ChangeKind::Remapped)
        }
    }

    /// Assign a feed position.
    pub fn into_event(
        self,
        partition: PartitionId,
        sequence: Sequence,
        timestamp: Timestamp,
    ) -> ChangeEvent {
        ChangeEvent {
            sequence,
            partition,
            entity_id: self.entity_id,
            kind: self.kind,
            timestamp,
            version: self.version,
            external: self.external,
            previous_entity_id: self.previous_entity_id,
        }
    }
}

/// Full copy of one partition, used to re-sync after a cursor expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Snapshot {
    pub partition: PartitionId,
    pub entities: Vec<Entity>,
    /// Resume point. Reading from it may replay changes already reflected
    /// in `entities`; it never skips one.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub cursor: Cursor,
}

/// Per-partition feed bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PartitionSummary {
    pub partition: PartitionId,
    /// Sequence of the newest event, 0 if none.
    pub head: Sequence,
    /// Lowest sequence a cursor may carry and still be readable.
    pub horizon: Sequence,
    /// Events currently retained.
    pub retained: u64,
}

impl PartitionSummary {
    pub fn head_cursor(&self) -> Cursor {
        Cursor::new(self.partition, self.head)
    }

    pub fn horizon_cursor(&self) -> Cursor {
        Cursor::new(self.partition, self.horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityKind, NewEntity};
    use chrono::Utc;

    #[test]
    fn test_cursor_token_decodes_to_same_cursor() {
        let cursor = Cursor::new(7, 123_456_789);
        let token = cursor.encode();
        assert_eq!(token.len(), CURSOR_TOKEN_LEN);
        assert_eq!(Cursor::decode(&token), Ok(cursor));
    }

    #[test]
    fn test_cursor_token_layout() {
        assert_eq!(Cursor::new(1, 2).encode(), "000000010000000000000002");
    }

    #[test]
    fn test_cursor_rejects_malformed_tokens() {
        for bad in ["", "zz", "00000001000000000000000", "0000000100000000000000zz"] {
            assert!(matches!(
                Cursor::decode(bad),
                Err(FeedError::MalformedCursor { .. })
            ));
        }
    }

    #[test]
    fn test_cursor_serde_as_token() -> Result<(), serde_json::Error> {
        let cursor = Cursor::new(3, 9);
        let json = serde_json::to_string(&cursor)?;
        assert_eq!(json, format!("\"{}\"", cursor.encode()));
        let back: Cursor = serde_json::from_str(&json)?;
        assert_eq!(back, cursor);
        assert!(serde_json::from_str::<Cursor>("\"nope\"").is_err());
        Ok(())
    }

    #[test]
    fn test_remapped_draft_affects_both_entities() {
        let now = Utc::now();
        let entity = Entity::new(EntityId::now_v7(), NewEntity::new(EntityKind::Asset, "A"), 0, now);
        let previous = EntityId::now_v7();
        let event = ChangeDraft::remapped(&entity, ExternalRef::new_unchecked("chain", "0x1"), previous)
            .into_event(0, 4, now);

        assert_eq!(event.kind, ChangeKind::Remapped);
        assert_eq!(event.cursor(), Cursor::new(0, 4));
        let affected: Vec<_> = event.affected_entities().collect();
        assert_eq!(affected, vec![entity.entity_id, previous]);
    }

    #[test]
    fn test_plain_event_omits_remap_fields() -> Result<(), serde_json::Error> {
        let now = Utc::now();
        let entity = Entity::new(EntityId::now_v7(), NewEntity::new(EntityKind::Issuer, "I"), 2, now);
        let event = ChangeDraft::created(&entity).into_event(2, 1, now);
        let json = serde_json::to_value(&event)?;
        assert!(json.get("external").is_none());
        assert!(json.get("previous_entity_id").is_none());
        assert_eq!(json["kind"], "created");
        Ok(())
    }
}
