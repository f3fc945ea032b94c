//! Version transitions. The manager owns the upgrade record and gates concurrent
//! upgrades; the rollout itself is driven from outside through the start, complete and
//! fail hooks.

use chain_store::{ChainId, ChainStatus, ChainTransition, Upgrade, UpgradeStatus, UpgradeType};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::*;
use uuid::Uuid;

use crate::context::{apply_transition, Context};
use crate::error::{Error, Result};
use crate::events::EventType;

#[derive(Clone)]
pub struct UpgradeService {
    ctx: Context,
}

impl UpgradeService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn upgrade(
        &self,
        chain_id: ChainId,
        to_version: &str,
        upgrade_type: UpgradeType,
        scheduled_at: Option<DateTime<Utc>>,
        actor_id: &str,
    ) -> Result<Upgrade> {
        let to_version = to_version.trim();
        if to_version.is_empty() {
            return Err(Error::Validation("target version must not be empty".into()));
        }

        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        if chain.status == ChainStatus::Upgrading {
            return Err(Error::Conflict(format!(
                "chain {chain_id} already has an upgrade in progress"
            )));
        }
        chain.status.transition(ChainTransition::BeginUpgrade)?;
        if chain.version == to_version {
            return Err(Error::Validation(format!(
                "chain {chain_id} is already running {to_version}"
            )));
        }

        let now = Utc::now();
        let status = match scheduled_at {
            Some(at) if at > now => UpgradeStatus::Scheduled,
            _ => UpgradeStatus::Pending,
        };
        let breaking_changes = match upgrade_type {
            UpgradeType::Major => vec![format!(
                "major upgrade from {} to {to_version} may change node and RPC interfaces",
                chain.version
            )],
            _ => vec![],
        };
        let upgrade = Upgrade {
            id: Uuid::new_v4(),
            chain_id,
            upgrade_type,
            from_version: chain.version.clone(),
            to_version: to_version.to_string(),
            status,
            breaking_changes,
            rollback_available: true,
            auto_rollback_on_failure: true,
            scheduled_at,
            started_at: None,
            completed_at: None,
            failure_reason: None,
            created_at: now,
        };
        self.ctx.store.create(&upgrade).await?;

        apply_transition(&mut chain, ChainTransition::BeginUpgrade)?;
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::UpgradeInitiated,
                format!("{upgrade_type} upgrade {} -> {to_version} {status}", upgrade.from_version),
                Some(actor_id),
                json!({
                    "upgradeId": upgrade.id,
                    "fromVersion": upgrade.from_version,
                    "toVersion": upgrade.to_version,
                    "upgradeType": upgrade_type,
                    "scheduledAt": scheduled_at,
                }),
            )
            .await?;
        info!(%chain_id, upgrade_id = %upgrade.id, to = to_version, %status, "Upgrade initiated");
        Ok(upgrade)
    }

    /// The single non-terminal upgrade of a chain, if any
    pub async fn active_upgrade(&self, chain_id: ChainId) -> Result<Option<Upgrade>> {
        let upgrades: Vec<Upgrade> = self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        Ok(upgrades.into_iter().find(|u| !u.status.is_terminal()))
    }

    async fn require_active_upgrade(&self, chain_id: ChainId) -> Result<Upgrade> {
        self.active_upgrade(chain_id)
            .await?
            .ok_or_else(|| Error::Conflict(format!("chain {chain_id} has no upgrade in progress")))
    }

    pub async fn start(&self, chain_id: ChainId, actor_id: &str) -> Result<Upgrade> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut upgrade = self.require_active_upgrade(chain_id).await?;
        if upgrade.status == UpgradeStatus::InProgress {
            return Err(Error::Conflict(format!("upgrade {} already started", upgrade.id)));
        }

        upgrade.status = UpgradeStatus::InProgress;
        upgrade.started_at = Some(Utc::now());
        self.ctx.store.update(&upgrade).await?;
        self.ctx
            .events
            .append(
                chain_id,
                EventType::UpgradeStarted,
                format!("Rolling out {}", upgrade.to_version),
                Some(actor_id),
                json!({ "upgradeId": upgrade.id }),
            )
            .await?;
        Ok(upgrade)
    }

    pub async fn complete(&self, chain_id: ChainId, actor_id: &str) -> Result<Upgrade> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut upgrade = self.require_active_upgrade(chain_id).await?;
        chain.status.transition(ChainTransition::CompleteUpgrade)?;

        let now = Utc::now();
        upgrade.status = UpgradeStatus::Completed;
        upgrade.started_at.get_or_insert(now);
        upgrade.completed_at = Some(now);
        self.ctx.store.update(&upgrade).await?;

        chain.version = upgrade.to_version.clone();
        apply_transition(&mut chain, ChainTransition::CompleteUpgrade)?;
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::UpgradeCompleted,
                format!("Upgraded to {}", upgrade.to_version),
                Some(actor_id),
                json!({ "upgradeId": upgrade.id, "version": chain.version }),
            )
            .await?;
        info!(%chain_id, version = %chain.version, "Upgrade completed");
        Ok(upgrade)
    }

    /// Marks the upgrade failed and, when auto-rollback is on, returns the chain to
    /// `active` on its previous version. Emits `upgrade_failed` and `upgrade_rolled_back`.
    pub async fn fail(&self, chain_id: ChainId, reason: &str, actor_id: &str) -> Result<Upgrade> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut upgrade = self.require_active_upgrade(chain_id).await?;
        chain.status.transition(ChainTransition::FailUpgrade)?;

        upgrade.status = UpgradeStatus::Failed;
        upgrade.failure_reason = Some(reason.to_string());
        upgrade.completed_at = Some(Utc::now());
        self.ctx.store.update(&upgrade).await?;
        apply_transition(&mut chain, ChainTransition::FailUpgrade)?;
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::UpgradeFailed,
                format!("Upgrade to {} failed: {reason}", upgrade.to_version),
                Some(actor_id),
                json!({ "upgradeId": upgrade.id, "reason": reason }),
            )
            .await?;
        warn!(%chain_id, upgrade_id = %upgrade.id, reason, "Upgrade failed");

        if upgrade.auto_rollback_on_failure && upgrade.rollback_available {
            upgrade.status = UpgradeStatus::RolledBack;
            self.ctx.store.update(&upgrade).await?;
            apply_transition(&mut chain, ChainTransition::RollbackUpgrade)?;
            self.ctx.save_chain(&mut chain).await?;

            self.ctx
                .events
                .append(
                    chain_id,
                    EventType::UpgradeRolledBack,
                    format!("Rolled back to {}", upgrade.from_version),
                    None,
                    json!({ "upgradeId": upgrade.id, "version": chain.version }),
                )
                .await?;
            info!(%chain_id, version = %chain.version, "Upgrade rolled back");
        }
        Ok(upgrade)
    }

    /// Fails any upgrade still open on a chain being deleted. The caller holds the
    /// chain lock and records the deletion event.
    pub(crate) async fn abandon_active(&self, chain_id: ChainId) -> Result<usize> {
        let Some(mut upgrade) = self.active_upgrade(chain_id).await? else {
            return Ok(0);
        };
        upgrade.status = UpgradeStatus::Failed;
        upgrade.failure_reason = Some("chain deleted".to_string());
        upgrade.completed_at = Some(Utc::now());
        self.ctx.store.update(&upgrade).await?;
        debug!(%chain_id, upgrade_id = %upgrade.id, "Abandoned upgrade of deleted chain");
        Ok(1)
    }

    /// Oldest first
    pub async fn list(&self, chain_id: ChainId, actor_id: &str) -> Result<Vec<Upgrade>> {
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut upgrades: Vec<Upgrade> = self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        upgrades.sort_by_key(|u| u.created_at);
        Ok(upgrades)
    }
}
