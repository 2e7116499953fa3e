//! Identifier registry.
//!
//! Maps external identifiers onto canonical entity ids. An external reference
//! has at most one active mapping; remapping retires the old revision instead
//! of deleting it so the audit trail survives.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use canon_core::{
    CanonResult, ChangeDraft, EntityId, ExternalRef, IdentifierMapping, RegistryError,
    StorageError,
};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::feed::ChangeFeed;
use crate::store::EntityStore;

/// Outcome of a successful `register_mapping`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First binding of the external reference.
    Bound(IdentifierMapping),
    /// Already bound to the requested entity. Nothing changed.
    Unchanged(IdentifierMapping),
    /// The previous target was tombstoned; the reference now points at the
    /// requested entity.
    Remapped {
        mapping: IdentifierMapping,
        previous: EntityId,
    },
}

impl Registration {
    pub fn mapping(&self) -> &IdentifierMapping {
        match self {
            Registration::Bound(m) | Registration::Unchanged(m) => m,
            Registration::Remapped { mapping, .. } => mapping,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// All revisions per external reference, oldest first. The last revision
    /// is the active one unless it was retired.
    revisions: HashMap<ExternalRef, Vec<IdentifierMapping>>,
    /// Active references per entity.
    by_entity: HashMap<EntityId, BTreeSet<ExternalRef>>,
}

impl RegistryState {
    fn active(&self, external: &ExternalRef) -> Option<&IdentifierMapping> {
        self.revisions
            .get(external)
            .and_then(|revs| revs.last())
            .filter(|m| m.is_active())
    }

    fn next_revision(&self, external: &ExternalRef) -> u64 {
        self.revisions
            .get(external)
            .map(|revs| revs.len() as u64 + 1)
            .unwrap_or(1)
    }

    fn bind(&mut self, mapping: IdentifierMapping) {
        self.by_entity
            .entry(mapping.entity_id)
            .or_default()
            .insert(mapping.external.clone());
        self.revisions
            .entry(mapping.external.clone())
            .or_default()
            .push(mapping);
    }

    fn retire_active(&mut self, external: &ExternalRef) {
        let now = Utc::now();
        let Some(current) = self.revisions.get_mut(external).and_then(|r| r.last_mut()) else {
            return;
        };
        current.retire(now);
        let entity_id = current.entity_id;
        if let Some(refs) = self.by_entity.get_mut(&entity_id) {
            refs.remove(external);
            if refs.is_empty() {
                self.by_entity.remove(&entity_id);
            }
        }
    }
}

/// Registry of external identifier mappings.
pub struct IdentifierRegistry {
    state: RwLock<RegistryState>,
    store: Arc<dyn EntityStore>,
    feed: Arc<dyn ChangeFeed>,
}

impl IdentifierRegistry {
    pub fn new(store: Arc<dyn EntityStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            store,
            feed,
        }
    }

    /// Active mapping for an external reference.
    ///
    /// Mappings pointing at tombstoned entities still resolve.
    pub async fn mapping(&self, external: &ExternalRef) -> CanonResult<Option<IdentifierMapping>> {
        Ok(self.state.read().await.active(external).cloned())
    }

    /// Resolve an external reference to its canonical entity.
    pub async fn resolve(&self, external: &ExternalRef) -> CanonResult<EntityId> {
        self.mapping(external)
            .await?
            .map(|m| m.entity_id)
            .ok_or_else(|| {
                RegistryError::MappingNotFound {
                    external: external.clone(),
                }
                .into()
            })
    }

    /// Bind an external reference to an entity.
    ///
    /// Rebinding to the same entity is a no-op. If the reference points at a
    /// different live entity the call fails with a conflict and nothing
    /// changes; if that entity is tombstoned the reference is remapped and a
    /// `remapped` change event is emitted.
    pub async fn register_mapping(
        &self,
        external: ExternalRef,
        entity_id: EntityId,
    ) -> CanonResult<Registration> {
        external.validate()?;
        let target = self
            .store
            .get(entity_id)
            .await?
            .ok_or(StorageError::NotFound { id: entity_id })?;

        let mut state = self.state.write().await;
        let Some(current) = state.active(&external).cloned() else {
            let mapping = IdentifierMapping::new(
                external.clone(),
                entity_id,
                state.next_revision(&external),
                Utc::now(),
            );
            state.bind(mapping.clone());
            tracing::debug!(external = %external, entity_id = %entity_id, "Mapping registered");
            return Ok(Registration::Bound(mapping));
        };

        if current.entity_id == entity_id {
            return Ok(Registration::Unchanged(current));
        }

        let existing = self
            .store
            .get(current.entity_id)
            .await?
            .ok_or(StorageError::NotFound {
                id: current.entity_id,
            })?;
        if existing.is_live() {
            return Err(RegistryError::Conflict {
                external,
                existing: current.entity_id,
                requested: entity_id,
            }
            .into());
        }

        self.feed
            .append(ChangeDraft::remapped(&target, external.clone(), current.entity_id))
            .await?;
        let mapping = Self::swap(&mut state, external, entity_id);
        tracing::info!(
            external = %mapping.external,
            entity_id = %entity_id,
            previous = %current.entity_id,
            "Mapping moved off tombstoned entity"
        );
        Ok(Registration::Remapped {
            mapping,
            previous: current.entity_id,
        })
    }

    /// Move an external reference to a new entity, provided it still points
    /// at `expected`.
    ///
    /// This is the explicit resolution of a registration conflict.
    pub async fn remap(
        &self,
        external: ExternalRef,
        expected: EntityId,
        entity_id: EntityId,
    ) -> CanonResult<IdentifierMapping> {
        external.validate()?;
        let target = self
            .store
            .get(entity_id)
            .await?
            .ok_or(StorageError::NotFound { id: entity_id })?;

        let mut state = self.state.write().await;
        let current = state
            .active(&external)
            .cloned()
            .ok_or_else(|| RegistryError::MappingNotFound {
                external: external.clone(),
            })?;

        if current.entity_id != expected {
            return Err(RegistryError::StaleExpectation {
                external,
                expected,
                actual: current.entity_id,
            }
            .into());
        }
        if current.entity_id == entity_id {
            return Ok(current);
        }

        self.feed
            .append(ChangeDraft::remapped(&target, external.clone(), expected))
            .await?;
        let mapping = Self::swap(&mut state, external, entity_id);
        tracing::info!(
            external = %mapping.external,
            entity_id = %entity_id,
            previous = %expected,
            revision = mapping.revision,
            "Mapping remapped"
        );
        Ok(mapping)
    }

    fn swap(
        state: &mut RegistryState,
        external: ExternalRef,
        entity_id: EntityId,
    ) -> IdentifierMapping {
        state.retire_active(&external);
        let mapping = IdentifierMapping::new(
            external.clone(),
            entity_id,
            state.next_revision(&external),
            Utc::now(),
        );
        state.bind(mapping.clone());
        mapping
    }

    /// All revisions of an external reference, oldest first.
    pub async fn history(&self, external: &ExternalRef) -> CanonResult<Vec<IdentifierMapping>> {
        Ok(self
            .state
            .read()
            .await
            .revisions
            .get(external)
            .cloned()
            .unwrap_or_default())
    }

    /// Active mappings pointing at an entity.
    pub async fn mappings_for(&self, entity_id: EntityId) -> CanonResult<Vec<IdentifierMapping>> {
        let state = self.state.read().await;
        let Some(refs) = state.by_entity.get(&entity_id) else {
            return Ok(Vec::new());
        };
        Ok(refs
            .iter()
            .filter_map(|external| state.active(external).cloned())
            .collect())
    }
}
