//! Process-local backend, used for tests and `--in-memory` runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::{StoreError, StoreResult};
use crate::store::{Backend, Record};

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<Uuid, Record>,
    /// Ids per parent in insertion order
    by_parent: HashMap<String, Vec<Uuid>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<EntityKind, Table>>,
    sequence: AtomicU64,
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind).or_default();
        if table.rows.contains_key(&record.id) {
            return Err(StoreError::Duplicate {
                kind,
                id: record.id,
            });
        }
        table
            .by_parent
            .entry(record.parent.clone())
            .or_default()
            .push(record.id);
        table.rows.insert(record.id, record);
        Ok(())
    }

    async fn replace(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables
            .get_mut(&kind)
            .and_then(|table| table.rows.get_mut(&record.id))
        {
            Some(existing) => {
                existing.bytes = record.bytes;
                Ok(())
            }
            None => Err(StoreError::Missing {
                kind,
                id: record.id,
            }),
        }
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&kind)
            .and_then(|table| table.rows.get(&id))
            .map(|record| record.bytes.clone()))
    }

    async fn scan(&self, kind: EntityKind, parent: &str) -> StoreResult<Vec<Vec<u8>>> {
        let tables = self.tables.read().await;
        let Some(table) = tables.get(&kind) else {
            return Ok(vec![]);
        };
        let ids = table.by_parent.get(parent).map(Vec::as_slice).unwrap_or(&[]);
        ids.iter()
            .map(|id| {
                table
                    .rows
                    .get(id)
                    .map(|record| record.bytes.clone())
                    .ok_or(StoreError::Corrupted("memory parent index"))
            })
            .collect()
    }

    async fn next_sequence(&self) -> StoreResult<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
