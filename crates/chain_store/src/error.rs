use thiserror::Error;
use uuid::Uuid;

use crate::entity::EntityKind;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{kind} {id} already exists")]
    Duplicate { kind: EntityKind, id: Uuid },
    #[error("{kind} {id} does not exist")]
    Missing { kind: EntityKind, id: Uuid },
    #[error("Corrupted index entry in {0}")]
    Corrupted(&'static str),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
