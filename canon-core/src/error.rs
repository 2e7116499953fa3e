//! Error types for CANON operations

use crate::{EntityId, ExternalRef, PartitionId, Sequence, Version};
use thiserror::Error;

/// Authoritative store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {id}")]
    NotFound { id: EntityId },

    #[error("Version conflict on entity {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: EntityId,
        expected: Version,
        actual: Version,
    },

    #[error("Entity {id} is tombstoned and cannot be modified")]
    Tombstoned { id: EntityId },

    #[error("Authoritative store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Cache backend failure: {reason}")]
    Backend { reason: String },
}

/// Identifier registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No mapping for {external}")]
    MappingNotFound { external: ExternalRef },

    #[error("{external} is already mapped to live entity {existing}; refusing to map it to {requested}")]
    Conflict {
        external: ExternalRef,
        existing: EntityId,
        requested: EntityId,
    },

    #[error("{external} is mapped to {actual}, not the expected {expected}")]
    StaleExpectation {
        external: ExternalRef,
        expected: EntityId,
        actual: EntityId,
    },
}

/// Change feed errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Cursor {partition}:{sequence} predates the retention horizon {horizon}; re-snapshot required")]
    CursorExpired {
        partition: PartitionId,
        sequence: Sequence,
        horizon: Sequence,
    },

    #[error("Cursor {partition}:{sequence} is ahead of the partition head {head}")]
    CursorAhead {
        partition: PartitionId,
        sequence: Sequence,
        head: Sequence,
    },

    #[error("Unknown partition {partition}; feed has {partition_count} partitions")]
    UnknownPartition {
        partition: PartitionId,
        partition_count: u32,
    },

    #[error("Malformed cursor token: {token}")]
    MalformedCursor { token: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Caller-visible error category.
///
/// Maps the detailed error enums onto the four kinds callers act on plus
/// the invalid-input and internal buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CursorExpired,
    Unavailable,
    Invalid,
    Internal,
}

/// Master error type for all CANON errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CanonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CanonError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            CanonError::Storage(StorageError::VersionConflict { .. })
            | CanonError::Storage(StorageError::Tombstoned { .. }) => ErrorKind::Conflict,
            CanonError::Storage(StorageError::Unavailable { .. }) => ErrorKind::Unavailable,
            CanonError::Storage(StorageError::LockPoisoned)
            | CanonError::Storage(StorageError::Backend { .. }) => ErrorKind::Internal,
            CanonError::Registry(RegistryError::MappingNotFound { .. }) => ErrorKind::NotFound,
            CanonError::Registry(RegistryError::Conflict { .. })
            | CanonError::Registry(RegistryError::StaleExpectation { .. }) => ErrorKind::Conflict,
            CanonError::Feed(FeedError::CursorExpired { .. }) => ErrorKind::CursorExpired,
            CanonError::Feed(_) => ErrorKind::Invalid,
            CanonError::Validation(_) => ErrorKind::Invalid,
            CanonError::Config(_) => ErrorKind::Invalid,
        }
    }

    /// Whether the operation may succeed if simply retried.
    ///
    /// Only store unavailability is transient. Conflicts and expired cursors
    /// require an explicit caller action and are never retried.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    pub fn not_found(id: EntityId) -> Self {
        StorageError::NotFound { id }.into()
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        StorageError::Unavailable {
            reason: reason.into(),
        }
        .into()
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
        .into()
    }
}

/// Result type alias for CANON operations.
pub type CanonResult<T> = Result<T, CanonError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn external() -> ExternalRef {
        ExternalRef::new_unchecked("chain", "0xabc")
    }

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            id: EntityId::nil(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_registry_conflict_display() {
        let err = RegistryError::Conflict {
            external: external(),
            existing: EntityId::nil(),
            requested: EntityId::nil(),
        };
        let msg = err.to_string();
        assert!(msg.contains("chain:0xabc"));
        assert!(msg.contains("already mapped"));
    }

    #[test]
    fn test_cursor_expired_display() {
        let err = FeedError::CursorExpired {
            partition: 3,
            sequence: 10,
            horizon: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("3:10"));
        assert!(msg.contains("50"));
        assert!(msg.contains("re-snapshot"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CanonError::not_found(EntityId::nil()).kind(), ErrorKind::NotFound);
        assert_eq!(CanonError::unavailable("down").kind(), ErrorKind::Unavailable);
        assert_eq!(
            CanonError::from(RegistryError::Conflict {
                external: external(),
                existing: EntityId::nil(),
                requested: EntityId::nil(),
            })
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CanonError::from(FeedError::CursorExpired {
                partition: 0,
                sequence: 0,
                horizon: 1,
            })
            .kind(),
            ErrorKind::CursorExpired
        );
        assert_eq!(
            CanonError::from(FeedError::MalformedCursor {
                token: "zz".to_string(),
            })
            .kind(),
            ErrorKind::Invalid
        );
        assert_eq!(CanonError::from(StorageError::LockPoisoned).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(CanonError::unavailable("timeout").is_transient());
        assert!(!CanonError::not_found(EntityId::nil()).is_transient());
        assert!(!CanonError::from(StorageError::VersionConflict {
            id: EntityId::nil(),
            expected: 1,
            actual: 2,
        })
        .is_transient());
    }

    #[test]
    fn test_canon_error_from_variants() {
        let storage = CanonError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CanonError::Storage(_)));

        let validation = CanonError::from(ValidationError::RequiredFieldMissing {
            field: "namespace".to_string(),
        });
        assert!(matches!(validation, CanonError::Validation(_)));

        let config = CanonError::from(ConfigError::MissingRequired {
            field: "partitions".to_string(),
        });
        assert!(matches!(config, CanonError::Config(_)));
    }
}
