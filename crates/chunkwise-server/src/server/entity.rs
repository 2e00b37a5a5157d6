//! The owning-entity collaborator.
//!
//! Assembly ends with exactly one call to [`EntityStore::persist`], which
//! either creates a new media entity or points an existing one at the new
//! artifacts. The store reports which artifact keys the entity referenced
//! before an update so the assembler can delete them once the new reference
//! is confirmed.

use async_trait::async_trait;
use chunkwise_core::{EntityId, MediaEntity, MediaMetadata};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Artifact keys attached to an entity by one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRefs {
    pub video: String,
    pub cover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub entity: MediaEntity,
    /// Keys the entity referenced before this save and no longer does.
    pub replaced: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("entity `{0}` does not exist")]
    NotFound(EntityId),

    #[error("entity store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Creates an entity (`entity_id == None`) or replaces the media of an
    /// existing one.
    async fn persist(
        &self,
        entity_id: Option<&EntityId>,
        artifacts: ArtifactRefs,
        metadata: &MediaMetadata,
    ) -> Result<PersistOutcome, EntityError>;
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Process-local entity catalog.
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: Mutex<HashMap<EntityId, MediaEntity>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<MediaEntity> {
        self.entities.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.lock().is_empty()
    }

    /// Inserts an entity as-is, bypassing assembly.
    pub fn insert(&self, entity: MediaEntity) {
        self.entities.lock().insert(entity.id.clone(), entity);
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn persist(
        &self,
        entity_id: Option<&EntityId>,
        artifacts: ArtifactRefs,
        metadata: &MediaMetadata,
    ) -> Result<PersistOutcome, EntityError> {
        let now = unix_millis();
        let mut entities = self.entities.lock();

        let Some(id) = entity_id else {
            let entity = MediaEntity {
                id: EntityId::mint(),
                title: metadata.title.clone(),
                category: metadata.category.clone(),
                date: metadata.date.clone(),
                content: metadata.content.clone(),
                active: metadata.active,
                video_path: artifacts.video,
                cover_path: artifacts.cover,
                created_at: now,
                updated_at: now,
            };
            entities.insert(entity.id.clone(), entity.clone());
            return Ok(PersistOutcome {
                entity,
                replaced: Vec::new(),
            });
        };

        let existing = entities
            .get_mut(id)
            .ok_or_else(|| EntityError::NotFound(id.clone()))?;

        let mut replaced = Vec::new();
        if existing.video_path != artifacts.video {
            replaced.push(std::mem::replace(
                &mut existing.video_path,
                artifacts.video,
            ));
        }
        // An update without a new cover keeps the current one.
        if let Some(cover) = artifacts.cover {
            if let Some(old) = existing.cover_path.replace(cover.clone()) {
                if old != cover {
                    replaced.push(old);
                }
            }
        }

        existing.title = metadata.title.clone();
        existing.category = metadata.category.clone();
        existing.date = metadata.date.clone();
        existing.content = metadata.content.clone();
        existing.active = metadata.active;
        existing.updated_at = now;

        Ok(PersistOutcome {
            entity: existing.clone(),
            replaced,
        })
    }
}
