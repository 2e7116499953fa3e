//! CANON Core - Entity Types
//!
//! Pure data structures for the entity resolution and change-sync service.
//! All other crates depend on this. No I/O happens here.

mod change;
pub mod config;
mod entities;
mod enums;
mod error;
mod identity;

pub use change::{ChangeDraft, ChangeEvent, Cursor, PartitionSummary, Snapshot};
pub use config::{CacheConfig, ConsumerConfig, FeedConfig, RetryConfig};
pub use entities::{
    Entity, EntityPatch, ExternalRef, IdentifierMapping, NewEntity, MAX_DISPLAY_NAME_LEN,
    MAX_EXTERNAL_ID_LEN, MAX_NAMESPACE_LEN,
};
pub use enums::{
    CacheTier, ChangeKind, EntityKind, EntityStatus, EnumParseError, MappingState,
    ReadConsistency,
};
pub use error::{
    CanonError, CanonResult, ConfigError, ErrorKind, FeedError, RegistryError, StorageError,
    ValidationError,
};
pub use identity::{EntityId, PartitionId, Sequence, Timestamp, Version};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
