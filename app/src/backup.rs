//! Point-in-time snapshots of a chain and restoring from them.

use chain_store::{
    Backup, BackupId, BackupStatus, BackupType, Chain, ChainId, ChainStatus, ChainTransition,
    Validator,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::*;
use uuid::Uuid;

use crate::context::{apply_transition, Context};
use crate::error::{Error, Result};
use crate::events::EventType;

/// What a backup captures; hashed to produce the content hash
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    chain: &'a Chain,
    validators: &'a [Validator],
    block_height: u64,
}

#[derive(Clone)]
pub struct BackupService {
    ctx: Context,
}

impl BackupService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn chain_backup(&self, chain_id: ChainId, backup_id: BackupId) -> Result<Backup> {
        match self.ctx.store.get_by_id::<Backup>(backup_id).await? {
            Some(backup) if backup.chain_id == chain_id => Ok(backup),
            _ => Err(Error::NotFound {
                entity: "backup",
                id: backup_id,
            }),
        }
    }

    /// Starts a backup; it completes in the background
    pub async fn create(
        &self,
        chain_id: ChainId,
        backup_type: BackupType,
        actor_id: &str,
    ) -> Result<Backup> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        if !matches!(chain.status, ChainStatus::Active | ChainStatus::Paused) {
            return Err(Error::Conflict(format!(
                "cannot back up a chain that is {}",
                chain.status
            )));
        }

        let now = Utc::now();
        let retention_days = self.ctx.config.default_retention_days;
        let backup = Backup {
            id: Uuid::new_v4(),
            chain_id,
            backup_type,
            status: BackupStatus::InProgress,
            block_height: chain.block_height,
            size_bytes: 0,
            content_hash: None,
            retention_days,
            expires_at: now + ChronoDuration::days(retention_days.into()),
            created_at: now,
            completed_at: None,
            restored_at: None,
        };
        self.ctx.store.create(&backup).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::BackupCreated,
                format!("{backup_type} backup started at block {}", backup.block_height),
                Some(actor_id),
                json!({ "backupId": backup.id, "backupType": backup_type, "blockHeight": backup.block_height }),
            )
            .await?;
        info!(%chain_id, backup_id = %backup.id, %backup_type, "Backup started");

        self.schedule_completion(chain_id, backup.id);
        Ok(backup)
    }

    fn schedule_completion(&self, chain_id: ChainId, backup_id: BackupId) {
        let service = self.clone();
        let delay = self.ctx.config.backup_completion_delay();
        self.ctx.tasks.schedule("backup_completion", delay, async move {
            service.complete(chain_id, backup_id).await
        });
    }

    async fn complete(&self, chain_id: ChainId, backup_id: BackupId) -> Result<()> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut backup = self.chain_backup(chain_id, backup_id).await?;
        if backup.status != BackupStatus::InProgress {
            debug!(%backup_id, status = %backup.status, "Backup no longer in progress");
            return Ok(());
        }

        let chain = self.ctx.find_chain(chain_id).await?;
        let validators: Vec<Validator> = self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        let snapshot = serde_json::to_vec(&Snapshot {
            chain: &chain,
            validators: &validators,
            block_height: backup.block_height,
        })
        .map_err(chain_store::StoreError::from)?;

        backup.size_bytes = snapshot.len() as u64;
        backup.content_hash = Some(hex::encode(Sha256::digest(&snapshot)));
        backup.status = BackupStatus::Completed;
        backup.completed_at = Some(Utc::now());
        self.ctx.store.update(&backup).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::BackupCompleted,
                format!("Backup {backup_id} completed"),
                None,
                json!({ "backupId": backup_id, "sizeBytes": backup.size_bytes, "contentHash": backup.content_hash }),
            )
            .await?;
        info!(%chain_id, %backup_id, size = backup.size_bytes, "Backup completed");
        Ok(())
    }

    /// Puts the chain into maintenance and restores it from a completed backup
    pub async fn restore(
        &self,
        chain_id: ChainId,
        backup_id: BackupId,
        actor_id: &str,
    ) -> Result<Backup> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut backup = self.chain_backup(chain_id, backup_id).await?;
        if backup.status != BackupStatus::Completed {
            return Err(Error::Conflict(format!(
                "backup {backup_id} is {}, only completed backups can be restored",
                backup.status
            )));
        }
        chain.status.transition(ChainTransition::BeginRestore)?;

        backup.status = BackupStatus::Restoring;
        self.ctx.store.update(&backup).await?;
        apply_transition(&mut chain, ChainTransition::BeginRestore)?;
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::BackupRestoreStarted,
                format!("Restoring backup {backup_id} to block {}", backup.block_height),
                Some(actor_id),
                json!({ "backupId": backup_id, "fromHeight": chain.block_height, "toHeight": backup.block_height }),
            )
            .await?;
        info!(%chain_id, %backup_id, "Restore started");

        let service = self.clone();
        let actor = actor_id.to_string();
        let delay = self.ctx.config.restore_completion_delay();
        self.ctx.tasks.schedule("restore_completion", delay, async move {
            service.finish_restore(chain_id, backup_id, actor).await
        });
        Ok(backup)
    }

    async fn finish_restore(&self, chain_id: ChainId, backup_id: BackupId, actor: String) -> Result<()> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut backup = self.chain_backup(chain_id, backup_id).await?;
        if backup.status != BackupStatus::Restoring {
            debug!(%backup_id, status = %backup.status, "Backup no longer restoring");
            return Ok(());
        }
        let mut chain = self.ctx.find_chain(chain_id).await?;
        if chain.status != ChainStatus::Maintenance {
            debug!(%chain_id, status = %chain.status, "Chain left maintenance, restore dropped");
            return Ok(());
        }

        backup.status = BackupStatus::Restored;
        backup.restored_at = Some(Utc::now());
        self.ctx.store.update(&backup).await?;

        let previous_height = chain.block_height;
        chain.block_height = backup.block_height;
        apply_transition(&mut chain, ChainTransition::CompleteRestore)?;
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::BackupRestored,
                format!("Restored backup {backup_id}"),
                Some(&actor),
                json!({ "backupId": backup_id, "previousHeight": previous_height, "blockHeight": chain.block_height }),
            )
            .await?;
        info!(%chain_id, %backup_id, height = chain.block_height, "Restore completed");
        Ok(())
    }

    /// Oldest first, deleted backups excluded
    pub async fn list(&self, chain_id: ChainId, actor_id: &str) -> Result<Vec<Backup>> {
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut backups: Vec<Backup> = self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        backups.retain(|b| b.status != BackupStatus::Deleted);
        backups.sort_by_key(|b| b.created_at);
        Ok(backups)
    }

    pub async fn delete(&self, chain_id: ChainId, backup_id: BackupId, actor_id: &str) -> Result<Backup> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let backup = self.chain_backup(chain_id, backup_id).await?;
        match backup.status {
            BackupStatus::Deleted => {
                return Err(Error::NotFound {
                    entity: "backup",
                    id: backup_id,
                })
            }
            BackupStatus::Restoring => {
                return Err(Error::Conflict(format!(
                    "backup {backup_id} is being restored"
                )))
            }
            _ => {}
        }

        let backup = self
            .ctx
            .store
            .soft_delete::<Backup>(backup_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "backup",
                id: backup_id,
            })?;
        self.ctx
            .events
            .append(
                chain_id,
                EventType::BackupDeleted,
                format!("Backup {backup_id} deleted"),
                Some(actor_id),
                json!({ "backupId": backup_id }),
            )
            .await?;
        Ok(backup)
    }

    /// Marks every backup of a deleted chain deleted. Caller holds the chain lock.
    pub(crate) async fn delete_all(&self, chain_id: ChainId) -> Result<usize> {
        let backups: Vec<Backup> = self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        let mut deleted = 0;
        for backup in backups.iter().filter(|b| b.status != BackupStatus::Deleted) {
            self.ctx.store.soft_delete::<Backup>(backup.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
