use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::status::ChainStatus;

pub type ChainId = Uuid;
pub type ValidatorId = Uuid;
pub type BackupId = Uuid;
pub type UpgradeId = Uuid;
pub type EventId = Uuid;

/// Who may join the validator set of a chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidatorAccess {
    Public,
    Permissioned,
}

/// On-chain registration signal supplied at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub tx_hash: String,
    pub network_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub owner_id: String,
    pub name: String,
    pub chain_type: String,
    pub rollup_type: String,
    pub gas_token: String,
    pub validator_access: ValidatorAccess,
    pub status: ChainStatus,
    pub rpc_url: Option<String>,
    pub explorer_url: Option<String>,
    pub bridge_url: Option<String>,
    pub agglayer_id: Option<String>,
    pub block_height: u64,
    /// Number of active validators, maintained by scaling
    pub validator_count: u32,
    pub version: String,
    pub registration: Option<Registration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Chain {
    pub fn is_deleted(&self) -> bool {
        self.status == ChainStatus::Deleted
    }

    pub fn is_owned_by(&self, actor_id: &str) -> bool {
        self.owner_id == actor_id
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidatorStatus {
    Active,
    Inactive,
    Removed,
    Slashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ValidatorId,
    pub chain_id: ChainId,
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub status: ValidatorStatus,
    pub stake: u128,
    pub rewards: u128,
    pub blocks_produced: u64,
    pub blocks_missed: u64,
    /// Percentage of assigned blocks actually produced
    pub uptime: f64,
    pub is_genesis: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Validator {
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }

    /// Active and not part of the genesis set
    pub fn is_removable(&self) -> bool {
        self.is_active() && !self.is_genesis
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackupType {
    Full,
    Incremental,
    Snapshot,
    Scheduled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
    Restoring,
    Restored,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: BackupId,
    pub chain_id: ChainId,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub block_height: u64,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub retention_days: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub restored_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpgradeType {
    Patch,
    Minor,
    Major,
    Security,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpgradeStatus {
    Scheduled,
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl UpgradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Completed | UpgradeStatus::Failed | UpgradeStatus::RolledBack
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upgrade {
    pub id: UpgradeId,
    pub chain_id: ChainId,
    pub upgrade_type: UpgradeType,
    pub from_version: String,
    pub to_version: String,
    pub status: UpgradeStatus,
    pub breaking_changes: Vec<String>,
    pub rollback_available: bool,
    pub auto_rollback_on_failure: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub chain_id: ChainId,
    pub event_type: String,
    pub description: String,
    pub actor_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Assigned by the store on append; defines the order of the log
    pub sequence: u64,
}
