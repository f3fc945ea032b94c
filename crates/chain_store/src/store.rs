use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::*;
use uuid::Uuid;

use crate::entity::{Entity, EntityKind, Mutable, SoftDelete};
use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryBackend;
use crate::sled_store::SledBackend;
use crate::types::{ChainId, Event};

/// Serialized entity as handed to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Uuid,
    pub parent: String,
    pub bytes: Vec<u8>,
}

impl Record {
    fn encode<E: Entity>(entity: &E) -> StoreResult<Self> {
        Ok(Self {
            id: entity.id(),
            parent: entity.parent_key(),
            bytes: serde_json::to_vec(entity)?,
        })
    }
}

/// Raw key/value operations a storage engine has to provide.
///
/// Records are never physically removed; soft deletion is a `replace` performed by
/// [`EntityStore::soft_delete`].
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with [`StoreError::Duplicate`] if the id is taken
    async fn insert(&self, kind: EntityKind, record: Record) -> StoreResult<()>;

    /// Fails with [`StoreError::Missing`] if the id is unknown
    async fn replace(&self, kind: EntityKind, record: Record) -> StoreResult<()>;

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<Vec<u8>>>;

    async fn scan(&self, kind: EntityKind, parent: &str) -> StoreResult<Vec<Vec<u8>>>;

    async fn next_sequence(&self) -> StoreResult<u64>;

    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Storage engine selection, made once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StoreBackend {
    Memory,
    Sled { path: PathBuf },
}

/// Uniform create/read/update/soft-delete access to every entity kind
#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl EntityStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub fn open(config: &StoreBackend) -> StoreResult<Self> {
        match config {
            StoreBackend::Memory => {
                info!("Using in-memory entity store");
                Ok(Self::memory())
            }
            StoreBackend::Sled { path } => {
                info!("Using sled entity store at {}", path.display());
                Ok(Self::new(Arc::new(SledBackend::open(path)?)))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn create<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        trace!("Creating {} {}", E::KIND, entity.id());
        self.backend.insert(E::KIND, Record::encode(entity)?).await
    }

    pub async fn get_by_id<E: Entity>(&self, id: Uuid) -> StoreResult<Option<E>> {
        self.backend
            .get(E::KIND, id)
            .await?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    pub async fn get_by_parent<E: Entity>(&self, parent: &str) -> StoreResult<Vec<E>> {
        self.backend
            .scan(E::KIND, parent)
            .await?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    pub async fn update<E: Mutable>(&self, entity: &E) -> StoreResult<()> {
        trace!("Updating {} {}", E::KIND, entity.id());
        self.backend.replace(E::KIND, Record::encode(entity)?).await
    }

    /// Marks the entity deleted and returns it; already deleted entities are returned as is
    pub async fn soft_delete<E: SoftDelete>(&self, id: Uuid) -> StoreResult<Option<E>> {
        let Some(mut entity) = self.get_by_id::<E>(id).await? else {
            return Ok(None);
        };
        if !entity.is_soft_deleted() {
            entity.mark_deleted(Utc::now());
            self.update(&entity).await?;
            debug!("Soft deleted {} {}", E::KIND, id);
        }
        Ok(Some(entity))
    }

    /// Appends an event, assigning its sequence number
    pub async fn append_event(&self, mut event: Event) -> StoreResult<Event> {
        event.sequence = self.backend.next_sequence().await?;
        self.create(&event).await?;
        Ok(event)
    }

    /// Newest first, by append sequence rather than wall-clock time
    pub async fn events_for_chain(&self, chain_id: ChainId, limit: usize) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self.get_by_parent(&chain_id.to_string()).await?;
        events.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        events.truncate(limit);
        Ok(events)
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.backend.flush().await
    }
}
