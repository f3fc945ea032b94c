//! Validator set management: genesis set, scaling, stake accounting and telemetry.

use chain_store::{
    Chain, ChainId, ChainStatus, ChainTransition, Validator, ValidatorId, ValidatorStatus,
};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use strum::{Display, EnumString};
use tracing::*;
use uuid::Uuid;

use crate::context::{apply_transition, Context};
use crate::error::{Error, Result};
use crate::events::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScaleAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleOutcome {
    pub old_count: u32,
    pub new_count: u32,
}

#[derive(Clone)]
pub struct ValidatorService {
    ctx: Context,
    /// Latest scale request per chain still waiting to settle
    settle_rounds: Arc<Mutex<HashMap<ChainId, u64>>>,
}

fn synthesize_validator(chain_id: ChainId, name: String, is_genesis: bool, stake: u128) -> Validator {
    let mut rng = rand::thread_rng();
    let mut address = [0u8; 20];
    rng.fill_bytes(&mut address);
    let mut public_key = [0u8; 33];
    rng.fill_bytes(&mut public_key);
    // compressed point prefix
    public_key[0] = 0x02 | (public_key[0] & 0x01);

    let now = Utc::now();
    Validator {
        id: Uuid::new_v4(),
        chain_id,
        name,
        address: format!("0x{}", hex::encode(address)),
        public_key: format!("0x{}", hex::encode(public_key)),
        status: ValidatorStatus::Active,
        stake,
        rewards: 0,
        blocks_produced: 0,
        blocks_missed: 0,
        uptime: 100.0,
        is_genesis,
        activated_at: Some(now),
        deactivated_at: None,
        created_at: now,
    }
}

fn uptime(produced: u64, missed: u64) -> f64 {
    match produced + missed {
        0 => 100.0,
        total => produced as f64 * 100.0 / total as f64,
    }
}

impl ValidatorService {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            settle_rounds: Arc::default(),
        }
    }

    /// Validators present at creation. The first one is the protected genesis validator.
    /// Caller holds the chain lock.
    pub(crate) async fn create_genesis_set(&self, chain: &Chain, count: u32) -> Result<Vec<Validator>> {
        let mut validators = Vec::with_capacity(count as usize);
        for index in 0..count {
            let validator = if index == 0 {
                synthesize_validator(
                    chain.id,
                    "genesis-validator".to_string(),
                    true,
                    self.ctx.config.genesis_stake.into(),
                )
            } else {
                synthesize_validator(chain.id, format!("validator-{}", index + 1), false, 0)
            };
            self.ctx.store.create(&validator).await?;
            validators.push(validator);
        }
        debug!(chain_id = %chain.id, count, "Created genesis validator set");
        Ok(validators)
    }

    /// Oldest first
    pub async fn list(&self, chain_id: ChainId) -> Result<Vec<Validator>> {
        let mut validators: Vec<Validator> =
            self.ctx.store.get_by_parent(&chain_id.to_string()).await?;
        validators.sort_by_key(|v| v.created_at);
        Ok(validators)
    }

    pub async fn list_owned(&self, chain_id: ChainId, actor_id: &str) -> Result<Vec<Validator>> {
        self.ctx.owned_chain(chain_id, actor_id).await?;
        self.list(chain_id).await
    }

    pub async fn scale(
        &self,
        chain_id: ChainId,
        action: ScaleAction,
        count: i64,
        actor_id: &str,
    ) -> Result<ScaleOutcome> {
        let config = &self.ctx.config;
        if count <= 0 {
            return Err(Error::Validation(format!(
                "scale count must be positive, got {count}"
            )));
        }
        if count > config.max_scale_step as i64 {
            return Err(Error::Validation(format!(
                "scale count {count} exceeds the maximum step of {}",
                config.max_scale_step
            )));
        }
        let count = count as u32;

        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        // reject before touching any validator
        chain.status.transition(ChainTransition::BeginScaling)?;

        let validators = self.list(chain_id).await?;
        let old_count = validators.iter().filter(|v| v.is_active()).count() as u32;

        let new_count = match action {
            ScaleAction::Add => {
                if old_count + count > config.max_validators {
                    return Err(Error::Validation(format!(
                        "chain would exceed {} validators",
                        config.max_validators
                    )));
                }
                let existing = validators.len() as u32;
                for offset in 1..=count {
                    let validator = synthesize_validator(
                        chain_id,
                        format!("validator-{}", existing + offset),
                        false,
                        0,
                    );
                    self.ctx.store.create(&validator).await?;
                }
                old_count + count
            }
            ScaleAction::Remove => {
                let removable: Vec<&Validator> =
                    validators.iter().filter(|v| v.is_removable()).collect();
                if removable.len() < count as usize {
                    return Err(Error::Validation(format!(
                        "only {} non-genesis validators available",
                        removable.len()
                    )));
                }
                let now = Utc::now();
                for validator in removable.into_iter().take(count as usize) {
                    let mut validator = validator.clone();
                    validator.status = ValidatorStatus::Removed;
                    validator.deactivated_at = Some(now);
                    self.ctx.store.update(&validator).await?;
                }
                old_count - count
            }
        };

        chain.validator_count = new_count;
        apply_transition(&mut chain, ChainTransition::BeginScaling)?;
        self.ctx.save_chain(&mut chain).await?;

        let event_type = match action {
            ScaleAction::Add => EventType::ScaledUp,
            ScaleAction::Remove => EventType::ScaledDown,
        };
        self.ctx
            .events
            .append(
                chain_id,
                event_type,
                format!("Validators scaled from {old_count} to {new_count}"),
                Some(actor_id),
                json!({
                    "action": action,
                    "requested": count,
                    "oldCount": old_count,
                    "newCount": new_count,
                }),
            )
            .await?;
        info!(%chain_id, %action, old_count, new_count, "Scaled validator set");

        self.schedule_settle(chain_id);
        Ok(ScaleOutcome {
            old_count,
            new_count,
        })
    }

    /// Settles the chain `scaling_settle_delay` after the latest scale request; a newer
    /// request re-arms the delay.
    fn schedule_settle(&self, chain_id: ChainId) {
        let round = {
            let mut rounds = self.settle_rounds.lock().unwrap_or_else(PoisonError::into_inner);
            let round = rounds.entry(chain_id).or_default();
            *round += 1;
            *round
        };

        let ctx = self.ctx.clone();
        let rounds = self.settle_rounds.clone();
        let delay = ctx.config.scaling_settle_delay();
        self.ctx.tasks.schedule("scaling_settle", delay, async move {
            let _guard = ctx.locks.lock(chain_id).await;
            {
                let mut rounds = rounds.lock().unwrap_or_else(PoisonError::into_inner);
                if rounds.get(&chain_id) != Some(&round) {
                    trace!(%chain_id, round, "Superseded by a later scale request");
                    return Ok(());
                }
                rounds.remove(&chain_id);
            }
            let mut chain = ctx.find_chain(chain_id).await?;
            if chain.status != ChainStatus::Scaling {
                debug!(%chain_id, status = %chain.status, "Scaling already settled");
                return Ok(());
            }
            apply_transition(&mut chain, ChainTransition::SettleScaling)?;
            ctx.save_chain(&mut chain).await?;
            info!(%chain_id, "Scaling settled");
            Ok(())
        });
    }

    async fn owned_validator(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
    ) -> Result<Validator> {
        match self.ctx.store.get_by_id::<Validator>(validator_id).await? {
            Some(validator) if validator.chain_id == chain_id => Ok(validator),
            _ => Err(Error::NotFound {
                entity: "validator",
                id: validator_id,
            }),
        }
    }

    pub async fn stake(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        if amount == 0 {
            return Err(Error::Validation("stake amount must be positive".into()));
        }
        let _guard = self.ctx.locks.lock(chain_id).await;
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut validator = self.owned_validator(chain_id, validator_id).await?;
        if !validator.is_active() {
            return Err(Error::Conflict(format!(
                "validator {validator_id} is {}",
                validator.status
            )));
        }
        validator.stake = validator
            .stake
            .checked_add(amount)
            .ok_or(Error::Validation("stake overflow".into()))?;
        self.ctx.store.update(&validator).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::ValidatorStaked,
                format!("Staked {amount} on {}", validator.name),
                Some(actor_id),
                json!({ "validatorId": validator_id, "amount": amount.to_string(), "stake": validator.stake.to_string() }),
            )
            .await?;
        Ok(validator)
    }

    pub async fn reward(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        if amount == 0 {
            return Err(Error::Validation("reward amount must be positive".into()));
        }
        let _guard = self.ctx.locks.lock(chain_id).await;
        self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut validator = self.owned_validator(chain_id, validator_id).await?;
        if validator.status == ValidatorStatus::Removed {
            return Err(Error::Conflict(format!("validator {validator_id} is removed")));
        }
        validator.rewards = validator
            .rewards
            .checked_add(amount)
            .ok_or(Error::Validation("reward overflow".into()))?;
        self.ctx.store.update(&validator).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::ValidatorRewarded,
                format!("Rewarded {amount} to {}", validator.name),
                Some(actor_id),
                json!({ "validatorId": validator_id, "amount": amount.to_string(), "rewards": validator.rewards.to_string() }),
            )
            .await?;
        Ok(validator)
    }

    /// Burns stake. A validator slashed to zero leaves the active set; a genesis validator
    /// can never reach zero.
    pub async fn slash(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
        actor_id: &str,
    ) -> Result<Validator> {
        if amount == 0 {
            return Err(Error::Validation("slash amount must be positive".into()));
        }
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.owned_chain(chain_id, actor_id).await?;
        let mut validator = self.owned_validator(chain_id, validator_id).await?;
        if !matches!(
            validator.status,
            ValidatorStatus::Active | ValidatorStatus::Inactive
        ) {
            return Err(Error::Conflict(format!(
                "validator {validator_id} is {}",
                validator.status
            )));
        }
        if validator.is_genesis && amount >= validator.stake {
            return Err(Error::Validation(
                "genesis validator cannot be slashed to zero".into(),
            ));
        }

        let was_active = validator.is_active();
        validator.stake -= amount.min(validator.stake);
        if validator.stake == 0 {
            validator.status = ValidatorStatus::Slashed;
            validator.deactivated_at = Some(Utc::now());
        }
        self.ctx.store.update(&validator).await?;

        if was_active && !validator.is_active() {
            chain.validator_count = chain.validator_count.saturating_sub(1);
            self.ctx.save_chain(&mut chain).await?;
        }

        self.ctx
            .events
            .append(
                chain_id,
                EventType::ValidatorSlashed,
                format!("Slashed {amount} from {}", validator.name),
                Some(actor_id),
                json!({
                    "validatorId": validator_id,
                    "amount": amount.to_string(),
                    "stake": validator.stake.to_string(),
                    "status": validator.status,
                }),
            )
            .await?;
        warn!(%chain_id, %validator_id, %amount, "Validator slashed");
        Ok(validator)
    }

    /// Block production telemetry reported by chain monitoring. Not audited.
    pub async fn record_block(
        &self,
        chain_id: ChainId,
        validator_id: ValidatorId,
        produced: bool,
    ) -> Result<Validator> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        self.ctx.live_chain(chain_id).await?;
        let mut validator = self.owned_validator(chain_id, validator_id).await?;
        if produced {
            validator.blocks_produced += 1;
        } else {
            validator.blocks_missed += 1;
        }
        validator.uptime = uptime(validator.blocks_produced, validator.blocks_missed);
        self.ctx.store.update(&validator).await?;
        trace!(%validator_id, produced, uptime = validator.uptime, "Recorded block");
        Ok(validator)
    }

    /// Marks every validator of a deleted chain removed. Caller holds the chain lock.
    pub(crate) async fn remove_all(&self, chain_id: ChainId) -> Result<usize> {
        let mut removed = 0;
        for validator in self.list(chain_id).await? {
            if validator.status != ValidatorStatus::Removed {
                self.ctx.store.soft_delete::<Validator>(validator.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
