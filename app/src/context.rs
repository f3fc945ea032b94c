use chain_store::{Chain, ChainId, ChainLocks, ChainStatus, ChainTransition, EntityStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::*;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::events::EventLog;
use crate::metrics::CHAIN_TRANSITIONS_TOTAL;
use crate::tasks::TaskQueue;

/// Collaborators shared by every lifecycle service
#[derive(Clone)]
pub struct Context {
    pub store: EntityStore,
    pub locks: ChainLocks,
    pub tasks: TaskQueue,
    pub events: EventLog,
    pub config: Arc<OrchestratorConfig>,
}

impl Context {
    pub fn new(store: EntityStore, config: OrchestratorConfig) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            store,
            locks: ChainLocks::new(),
            tasks: TaskQueue::new(),
            config: Arc::new(config),
        }
    }

    /// Any chain, deleted ones included
    pub async fn find_chain(&self, id: ChainId) -> Result<Chain> {
        self.store
            .get_by_id::<Chain>(id)
            .await?
            .ok_or(Error::chain_not_found(id))
    }

    /// Deleted chains are reported as missing
    pub async fn live_chain(&self, id: ChainId) -> Result<Chain> {
        match self.find_chain(id).await? {
            chain if chain.is_deleted() => Err(Error::chain_not_found(id)),
            chain => Ok(chain),
        }
    }

    pub async fn owned_chain(&self, id: ChainId, actor_id: &str) -> Result<Chain> {
        let chain = self.live_chain(id).await?;
        if !chain.is_owned_by(actor_id) {
            return Err(Error::AccessDenied {
                actor: actor_id.to_string(),
                chain_id: id,
            });
        }
        Ok(chain)
    }

    pub async fn save_chain(&self, chain: &mut Chain) -> Result<()> {
        chain.updated_at = Utc::now();
        self.store.update(chain).await?;
        Ok(())
    }
}

/// Moves `chain` through the state machine in place, returning the previous status
pub fn apply_transition(chain: &mut Chain, trigger: ChainTransition) -> Result<ChainStatus> {
    let from = chain.status;
    let to = from.transition(trigger)?;
    chain.status = to;
    CHAIN_TRANSITIONS_TOTAL
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
    debug!(chain_id = %chain.id, %from, %to, "Chain transition");
    Ok(from)
}
