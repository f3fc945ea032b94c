//! Typed view over the records kept by a [`Backend`](crate::Backend).
//!
//! Each entity kind names its parent key: chains are grouped by owner, every other kind
//! by the chain it belongs to. Events only implement [`Entity`], which keeps them
//! append-only: the store offers `update` and `soft_delete` exclusively for
//! [`Mutable`] and [`SoftDelete`] kinds.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use uuid::Uuid;

use crate::status::ChainStatus;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Chain,
    Validator,
    Backup,
    Upgrade,
    Event,
}

impl EntityKind {
    pub fn tree_name(&self) -> &'static str {
        match self {
            EntityKind::Chain => "chains",
            EntityKind::Validator => "validators",
            EntityKind::Backup => "backups",
            EntityKind::Upgrade => "upgrades",
            EntityKind::Event => "events",
        }
    }
}

pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    /// Grouping key used by `get_by_parent`
    fn parent_key(&self) -> String;
}

/// Entities whose stored record may be replaced
pub trait Mutable: Entity {}

pub trait SoftDelete: Mutable {
    fn is_soft_deleted(&self) -> bool;

    fn mark_deleted(&mut self, at: DateTime<Utc>);
}

impl Entity for Chain {
    const KIND: EntityKind = EntityKind::Chain;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_key(&self) -> String {
        self.owner_id.clone()
    }
}

impl Mutable for Chain {}

impl SoftDelete for Chain {
    fn is_soft_deleted(&self) -> bool {
        self.is_deleted()
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.status = ChainStatus::Deleted;
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

impl Entity for Validator {
    const KIND: EntityKind = EntityKind::Validator;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_key(&self) -> String {
        self.chain_id.to_string()
    }
}

impl Mutable for Validator {}

impl SoftDelete for Validator {
    fn is_soft_deleted(&self) -> bool {
        self.status == ValidatorStatus::Removed
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.status = ValidatorStatus::Removed;
        self.deactivated_at = Some(at);
    }
}

impl Entity for Backup {
    const KIND: EntityKind = EntityKind::Backup;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_key(&self) -> String {
        self.chain_id.to_string()
    }
}

impl Mutable for Backup {}

impl SoftDelete for Backup {
    fn is_soft_deleted(&self) -> bool {
        self.status == BackupStatus::Deleted
    }

    fn mark_deleted(&mut self, _at: DateTime<Utc>) {
        self.status = BackupStatus::Deleted;
    }
}

impl Entity for Upgrade {
    const KIND: EntityKind = EntityKind::Upgrade;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_key(&self) -> String {
        self.chain_id.to_string()
    }
}

impl Mutable for Upgrade {}

impl Entity for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_key(&self) -> String {
        self.chain_id.to_string()
    }
}
