//! Caller-facing lifecycle operations.
//!
//! [`ChainOrchestrator`] is the only entry point the HTTP layer (or the CLI) talks to.
//! Inputs are assumed to be validated by the caller; ownership, state and count checks
//! happen here and always run before the first write.

use chain_store::{
    Backup, BackupId, BackupType, Chain, ChainId, ChainStatus, ChainTransition, EntityStore,
    Event, Registration, StoreBackend, Upgrade, UpgradeType, Validator, ValidatorAccess,
    ValidatorId,
};
use chrono::{DateTime, Utc};
use futures::Future;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::*;
use uuid::Uuid;

use crate::backup::BackupService;
use crate::config::OrchestratorConfig;
use crate::context::{apply_transition, Context};
use crate::deployment::{DeploymentOrchestrator, Provisioner};
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::metrics;
use crate::upgrade::UpgradeService;
use crate::validators::{ScaleAction, ScaleOutcome, ValidatorService};

/// What the owner asks for when creating a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainConfig {
    pub name: String,
    pub chain_type: String,
    pub rollup_type: String,
    pub gas_token: String,
    pub validator_access: ValidatorAccess,
    #[serde(alias = "initialValidators")]
    pub validator_count: u32,
    /// Present when the chain was registered on-chain before creation
    #[serde(default)]
    pub registration: Option<Registration>,
}

async fn observed<T>(operation: &'static str, op: impl Future<Output = Result<T>>) -> Result<T> {
    let result = op.await;
    metrics::observe(operation, &result);
    result
}

#[derive(Clone)]
pub struct ChainOrchestrator {
    ctx: Context,
    deployment: DeploymentOrchestrator,
    validators: ValidatorService,
    backups: BackupService,
    upgrades: UpgradeService,
}

impl ChainOrchestrator {
    pub fn new(store: EntityStore, config: OrchestratorConfig) -> Self {
        let ctx = Context::new(store, config);
        let deployment = DeploymentOrchestrator::simulated(ctx.clone());
        Self::assemble(ctx, deployment)
    }

    pub fn with_provisioner(
        store: EntityStore,
        config: OrchestratorConfig,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let ctx = Context::new(store, config);
        let deployment = DeploymentOrchestrator::new(ctx.clone(), provisioner);
        Self::assemble(ctx, deployment)
    }

    pub fn in_memory(config: OrchestratorConfig) -> Self {
        Self::new(EntityStore::memory(), config)
    }

    pub fn open(backend: &StoreBackend, config: OrchestratorConfig) -> Result<Self> {
        let store = EntityStore::open(backend)?;
        info!(backend = store.backend_name(), "Opened entity store");
        Ok(Self::new(store, config))
    }

    fn assemble(ctx: Context, deployment: DeploymentOrchestrator) -> Self {
        Self {
            validators: ValidatorService::new(ctx.clone()),
            backups: BackupService::new(ctx.clone()),
            upgrades: UpgradeService::new(ctx.clone()),
            deployment,
            ctx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    /// Background jobs scheduled and not yet run
    pub fn pending_jobs(&self) -> usize {
        self.ctx.tasks.pending()
    }

    /// Waits for every background job to land, then flushes the store
    pub async fn flush(&self) -> Result<()> {
        self.ctx.tasks.flush().await;
        self.ctx.store.flush().await?;
        Ok(())
    }

    /// Stores the genesis validators and the chain, then launches deployment.
    /// Never fails on provisioning or once the chain row is stored.
    pub async fn create_chain(&self, owner_id: &str, config: CreateChainConfig) -> Result<Chain> {
        observed("create_chain", self.create_chain_inner(owner_id, config)).await
    }

    async fn create_chain_inner(&self, owner_id: &str, config: CreateChainConfig) -> Result<Chain> {
        if config.name.trim().is_empty() {
            return Err(Error::Validation("chain name must not be empty".into()));
        }
        let max = self.ctx.config.max_validators;
        if config.validator_count == 0 || config.validator_count > max {
            return Err(Error::Validation(format!(
                "validator count must be between 1 and {max}, got {}",
                config.validator_count
            )));
        }

        let now = Utc::now();
        let chain = Chain {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: config.name.trim().to_string(),
            chain_type: config.chain_type,
            rollup_type: config.rollup_type,
            gas_token: config.gas_token,
            validator_access: config.validator_access,
            status: ChainStatus::initial(config.registration.is_some()),
            rpc_url: None,
            explorer_url: None,
            bridge_url: None,
            agglayer_id: None,
            block_height: 0,
            validator_count: config.validator_count,
            version: self.ctx.config.genesis_version.clone(),
            registration: config.registration,
            created_at: now,
            updated_at: now,
            deployed_at: None,
            paused_at: None,
            deleted_at: None,
        };

        {
            let _guard = self.ctx.locks.lock(chain.id).await;
            // validators of a chain row that never lands stay unreachable
            self.validators
                .create_genesis_set(&chain, chain.validator_count)
                .await?;
            self.ctx.store.create(&chain).await?;
            self.deployment.launch(chain.id);

            // the chain exists from here on, a lost audit entry must not fail creation
            if let Err(e) = self
                .ctx
                .events
                .append(
                    chain.id,
                    EventType::Created,
                    format!("Chain {} created", chain.name),
                    Some(owner_id),
                    json!({
                        "status": chain.status,
                        "validatorCount": chain.validator_count,
                        "validatorAccess": chain.validator_access,
                        "registered": chain.registration.is_some(),
                    }),
                )
                .await
            {
                warn!(chain_id = %chain.id, error = %e, "Failed to record chain creation");
            }
        }
        info!(chain_id = %chain.id, owner = owner_id, status = %chain.status, "Chain created");
        Ok(chain)
    }

    /// Deleted chains are reported as missing
    pub async fn get_chain(&self, chain_id: ChainId) -> Result<Chain> {
        observed("get_chain", self.ctx.live_chain(chain_id)).await
    }

    /// Any chain, deleted ones included
    pub async fn audit_chain(&self, chain_id: ChainId) -> Result<Chain> {
        observed("audit_chain", self.ctx.find_chain(chain_id)).await
    }

    /// Live chains of an owner, oldest first
    pub async fn list_chains(&self, owner_id: &str) -> Result<Vec<Chain>> {
        observed("list_chains", async {
            let mut chains: Vec<Chain> = self.ctx.store.get_by_parent(owner_id).await?;
            chains.retain(|c| !c.is_deleted());
            chains.sort_by_key(|c| c.created_at);
            Ok::<_, Error>(chains)
        })
        .await
    }

    pub async fn pause_chain(&self, chain_id: ChainId, actor_id: &str) -> Result<Chain> {
        observed("pause_chain", async {
            let _guard = self.ctx.locks.lock(chain_id).await;
            let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
            apply_transition(&mut chain, ChainTransition::Pause)?;
            chain.paused_at = Some(Utc::now());
            self.ctx.save_chain(&mut chain).await?;
            self.ctx
                .events
                .append(chain_id, EventType::Paused, "Chain paused", Some(actor_id), json!({}))
                .await?;
            info!(%chain_id, "Chain paused");
            Ok::<_, Error>(chain)
        })
        .await
    }

    pub async fn resume_chain(&self, chain_id: ChainId, actor_id: &str) -> Result<Chain> {
        observed("resume_chain", async {
            let _guard = self.ctx.locks.lock(chain_id).await;
            let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
            apply_transition(&mut chain, ChainTransition::Resume)?;
            let paused_at = chain.paused_at.take();
            self.ctx.save_chain(&mut chain).await?;
            self.ctx
                .events
                .append(
                    chain_id,
                    EventType::Resumed,
                    "Chain resumed",
                    Some(actor_id),
                    json!({ "pausedAt": paused_at }),
                )
                .await?;
            info!(%chain_id, "Chain resumed");
            Ok::<_, Error>(chain)
        })
        .await
    }

    pub async fn scale_chain(
        &self,
        chain_id: ChainId,
        action: ScaleAction,
        count: i64,
        actor_id: &str,
    ) -> Result<ScaleOutcome> {
        observed(
            "scale_chain",
            self.validators.scale(chain_id, action, count, actor_id),
        )
        .await
    }

    /// Soft-deletes the chain. Validators are marked removed, backups deleted, an open
    /// upgrade is failed, and any deployment still in flight finds the chain deleted and
    /// stops.
    pub async fn delete_chain(&self, chain_id: ChainId, actor_id: &str) -> Result<()> {
        observed("delete_chain", async {
            let _guard = self.ctx.locks.lock(chain_id).await;
            let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
            apply_transition(&mut chain, ChainTransition::Delete)?;

            let validators_removed = self.validators.remove_all(chain_id).await?;
            let backups_deleted = self.backups.delete_all(chain_id).await?;
            let upgrades_abandoned = self.upgrades.abandon_active(chain_id).await?;
            self.ctx.store.soft_delete::<Chain>(chain_id).await?;

            self.ctx
                .events
                .append(
                    chain_id,
                    EventType::Deleted,
                    format!("Chain {} deleted", chain.name),
                    Some(actor_id),
                    json!({
                        "validatorsRemoved": validators_removed,
                        "backupsDeleted": backups_deleted,
                        "upgradesAbandoned": upgrades_abandoned,
                    }),
                )
                .await?;
            info!(%chain_id, validators_removed, backups_deleted, upgrades_abandoned, "Chain deleted");
            Ok::<_, Error>(())
        })
        .await
    }

    pub async fn create_backup(
        &self,
        chain_id: ChainId,
        backup_type: BackupType,
        actor_id: &str,
    ) -> Result<Backup> {
        observed(
            "create_backup",
            self.backups.create(chain_id, backup_type, actor_id),
        )
        .await
    }

    pub async fn restore_backup(
        &self,
        chain_id: ChainId,
        backup_id: BackupId,
        actor_id: &str,
    ) -> Result<Backup> {
        observed(
            "restore_backup",
            self.backups.restore(chain_id, backup_id, actor_id),
        )
        .await
    }

    pub async fn list_backups(&self, chain_id: ChainId, actor_id: &str) -> Result<Vec<Backup>> {
        observed("list_backups", self.backups.list(chain_id, actor_id)).await
    }

    pub async fn delete_backup(
        &self,
        chain_id: ChainId,
        backup_id: BackupId,
        actor_id: &str,
    ) -> Result<Backup> {
        observed(
            "delete_backup",
            self.backups.delete(chain_id, backup_id, actor_id),
        )
        .await
    }

    pub async fn upgrade_chain(
        &self,
        chain_id: ChainId,
        to_version: &str,
        upgrade_type: UpgradeType,
        scheduled_at: Option<DateTime<Utc>>,
        actor_id: &str,
    ) -> Result<Upgrade> {
        observed(
            "upgrade_chain",
            self.upgrades
                .upgrade(chain_id, to_version, upgrade_type, scheduled_at, actor_id),
        )
        .await
    }

    pub async fn start_upgrade(&self, chain_id: ChainId, actor_id: &str) -> Result<Upgrade> {
        observed("start_upgrade", self.upgrades.start(chain_id, actor_id)).await
    }

    pub async fn complete_upgrade(&self, chain_id: ChainId, actor_id: &str) -> Result<Upgrade> {
        observed("complete_upgrade", self.upgrades.complete(chain_id, actor_id)).await
    }

    pub async fn fail_upgrade(
        &self,
        chain_id: ChainId,
        reason: &str,
        actor_id: &str,
    ) -> Result<Upgrade> {
        observed(
            "fail_upgrade",
            self.upgrades.fail(chain_id, reason, actor_id),
        )
        .await
    }

    pub async fn list_upgrades(&self, chain_id: ChainId, actor_id: &str) -> Result<Vec<Upgrade>> {
        observed("list_upgrades", self.upgrades.list(chain_id, actor_id)).await
    }

    pub async fn active_upgrade(&self, chain_id: ChainId) -> Result<Option<Upgrade>> {
        observed("active_upgrade", async {
            self.ctx.live_chain(chain_id).await?;
            self.upgrades.active_upgrade(chain_id).await
        })
        .await
    }

    pub async fn list_validators(
        &self,
        chain_id: ChainId,
        actor_id: &str,
    ) -> Result<Vec<Validator>> {
        observed(
            "list_validators",
            self.validators.list_owned(chain_id, actor_id),
        )
        .await
    }

    pub async fn stake_validator(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        observed(
            "stake_validator",
            self.validators.stake(chain_id, validator_id, amount, actor_id),
        )
        .await
    }

    pub async fn reward_validator(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        observed(
            "reward_validator",
            self.validators.reward(chain_id, validator_id, amount, actor_id),
        )
        .await
    }

    pub async fn slash_validator(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        observed(
            "slash_validator",
            self.validators.slash(chain_id, validator_id, amount, actor_id),
        )
        .await
    }

    /// Block production telemetry from chain monitoring
    pub async fn record_block(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        produced: bool,
    ) -> Result<Validator> {
        observed(
            "record_block",
            self.validators.record_block(chain_id, validator_id, produced),
        )
        .await
    }

    /// Chain head reported by monitoring. Heights only move forward, except through restore.
    pub async fn report_block_height(&self, chain_id: ChainId, height: u64) -> Result<Chain> {
        observed("report_block_height", async {
            let _guard = self.ctx.locks.lock(chain_id).await;
            let mut chain = self.ctx.live_chain(chain_id).await?;
            if height < chain.block_height {
                return Err(Error::Validation(format!(
                    "block height {height} is behind the current height {}",
                    chain.block_height
                )));
            }
            chain.block_height = height;
            self.ctx.save_chain(&mut chain).await?;
            trace!(%chain_id, height, "Block height reported");
            Ok::<_, Error>(chain)
        })
        .await
    }

    /// Newest first. Events of deleted chains stay readable.
    pub async fn list_events(&self, chain_id: ChainId, limit: usize) -> Result<Vec<Event>> {
        observed("list_events", async {
            self.ctx.find_chain(chain_id).await?;
            self.ctx.events.list(chain_id, limit).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config(validators: u32) -> CreateChainConfig {
        CreateChainConfig {
            name: "devnet".into(),
            chain_type: "rollup".into(),
            rollup_type: "zk".into(),
            gas_token: "ETH".into(),
            validator_access: ValidatorAccess::Public,
            validator_count: validators,
            registration: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_rejects_bad_input() {
        let orchestrator = ChainOrchestrator::in_memory(OrchestratorConfig::fast());
        for cfg in [config(0), config(101), CreateChainConfig { name: " ".into(), ..config(1) }] {
            let err = orchestrator.create_chain("alice", cfg).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(orchestrator.list_chains("alice").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_guards() {
        let orchestrator = ChainOrchestrator::in_memory(OrchestratorConfig::fast());
        let chain = orchestrator.create_chain("alice", config(1)).await.unwrap();

        // still pending
        let err = orchestrator.pause_chain(chain.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        orchestrator.flush().await.unwrap();

        let paused = orchestrator.pause_chain(chain.id, "alice").await.unwrap();
        assert_eq!(paused.status, ChainStatus::Paused);
        assert!(paused.paused_at.is_some());
        let err = orchestrator.pause_chain(chain.id, "alice").await.unwrap_err();
        assert_eq!(err.to_string(), "cannot pause a chain that is paused");

        let resumed = orchestrator.resume_chain(chain.id, "alice").await.unwrap();
        assert_eq!(resumed.status, ChainStatus::Active);
        assert!(resumed.paused_at.is_none());
        let err = orchestrator.resume_chain(chain.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test(start_paused = true)]
    async fn only_owner_may_mutate() {
        let orchestrator = ChainOrchestrator::in_memory(OrchestratorConfig::fast());
        let chain = orchestrator.create_chain("alice", config(2)).await.unwrap();
        orchestrator.flush().await.unwrap();

        let denied = [
            orchestrator.pause_chain(chain.id, "mallory").await.unwrap_err(),
            orchestrator.delete_chain(chain.id, "mallory").await.unwrap_err(),
            orchestrator
                .create_backup(chain.id, BackupType::Full, "mallory")
                .await
                .unwrap_err(),
            orchestrator
                .upgrade_chain(chain.id, "2.0.0", UpgradeType::Major, None, "mallory")
                .await
                .unwrap_err(),
        ];
        for err in denied {
            assert_eq!(err.kind(), ErrorKind::AccessDenied);
        }
        assert!(orchestrator.list_chains("mallory").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn block_height_only_moves_forward() {
        let orchestrator = ChainOrchestrator::in_memory(OrchestratorConfig::fast());
        let chain = orchestrator.create_chain("alice", config(1)).await.unwrap();
        orchestrator.flush().await.unwrap();

        assert_eq!(
            orchestrator
                .report_block_height(chain.id, 42)
                .await
                .unwrap()
                .block_height,
            42
        );
        let err = orchestrator
            .report_block_height(chain.id, 41)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_chain_is_not_found() {
        let orchestrator = ChainOrchestrator::in_memory(OrchestratorConfig::fast());
        let id = Uuid::new_v4();
        assert_eq!(
            orchestrator.get_chain(id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            orchestrator.list_events(id, 10).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
