//! Durable backend on top of the sled embedded database.
//!
//! Every entity kind gets its own tree keyed by id, plus a parent index tree whose keys
//! are `parent | 0x00 | insertion id (big endian) | entity id` so prefix scans return
//! rows in insertion order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use strum::IntoEnumIterator;
use tracing::*;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::{StoreError, StoreResult};
use crate::store::{Backend, Record};

#[derive(Debug, Clone)]
struct KindTrees {
    rows: sled::Tree,
    by_parent: sled::Tree,
}

#[derive(Debug, Clone)]
pub struct SledBackend {
    db: sled::Db,
    trees: HashMap<EntityKind, KindTrees>,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::Backend(format!("Unable to create {}: {e}", path.display())))?;
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database, removed when dropped
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let mut trees = HashMap::new();
        for kind in EntityKind::iter() {
            let rows = db.open_tree(kind.tree_name())?;
            let by_parent = db.open_tree(format!("{}_by_parent", kind.tree_name()))?;
            trees.insert(kind, KindTrees { rows, by_parent });
        }
        debug!("Opened sled trees for {} entity kinds", trees.len());
        Ok(Self { db, trees })
    }

    fn trees(&self, kind: EntityKind) -> StoreResult<&KindTrees> {
        self.trees
            .get(&kind)
            .ok_or(StoreError::Backend(format!("no tree for {kind}")))
    }

    fn parent_prefix(parent: &str) -> Vec<u8> {
        let mut prefix = parent.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }
}

#[async_trait]
impl Backend for SledBackend {
    fn name(&self) -> &'static str {
        "sled"
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        let trees = self.trees(kind)?;
        let swapped = trees.rows.compare_and_swap(
            record.id.as_bytes(),
            None as Option<&[u8]>,
            Some(record.bytes),
        )?;
        if swapped.is_err() {
            return Err(StoreError::Duplicate {
                kind,
                id: record.id,
            });
        }

        let mut index_key = Self::parent_prefix(&record.parent);
        index_key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        index_key.extend_from_slice(record.id.as_bytes());
        trees.by_parent.insert(index_key, record.id.as_bytes().to_vec())?;
        Ok(())
    }

    async fn replace(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        let trees = self.trees(kind)?;
        if !trees.rows.contains_key(record.id.as_bytes())? {
            return Err(StoreError::Missing {
                kind,
                id: record.id,
            });
        }
        trees.rows.insert(record.id.as_bytes(), record.bytes)?;
        Ok(())
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .trees(kind)?
            .rows
            .get(id.as_bytes())?
            .map(|bytes| bytes.to_vec()))
    }

    async fn scan(&self, kind: EntityKind, parent: &str) -> StoreResult<Vec<Vec<u8>>> {
        let trees = self.trees(kind)?;
        let mut rows = Vec::new();
        for entry in trees.by_parent.scan_prefix(Self::parent_prefix(parent)) {
            let (_, id) = entry?;
            let id = Uuid::from_slice(&id).map_err(|_| StoreError::Corrupted("sled parent index"))?;
            match trees.rows.get(id.as_bytes())? {
                Some(bytes) => rows.push(bytes.to_vec()),
                None => return Err(StoreError::Corrupted("sled parent index")),
            }
        }
        Ok(rows)
    }

    async fn next_sequence(&self) -> StoreResult<u64> {
        Ok(self.db.generate_id()?)
    }

    async fn flush(&self) -> StoreResult<()> {
        let bytes = self.db.flush_async().await?;
        trace!("Flushed {bytes} bytes to disk");
        Ok(())
    }
}
