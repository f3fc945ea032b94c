//! Background provisioning of newly created chains.
//!
//! Two independent jobs are launched per chain: the provisioning workflow, which walks
//! every [`DeploymentStep`] in order, and a fallback timer that force-activates the chain
//! once `fallback_delay` has passed. Both take the chain lock before writing. Whichever
//! lands first moves the chain to `active`; the fallback does nothing to a chain that has
//! already left `pending`/`deploying`, and a workflow finishing after the fallback only
//! swaps the placeholder endpoints for real ones. Neither touches a deleted chain.

use async_trait::async_trait;
use chain_store::{Chain, ChainId, ChainTransition};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tokio::time::Instant;
use tracing::*;

use crate::config::StepLatency;
use crate::context::{apply_transition, Context};
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::metrics::{DEPLOYMENT_OUTCOMES_TOTAL, DEPLOYMENT_STEP_DURATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStep {
    Infrastructure,
    Nodes,
    Validators,
    Bridge,
    Monitoring,
}

impl DeploymentStep {
    pub fn latency_ms(&self, latency: &StepLatency) -> u64 {
        match self {
            DeploymentStep::Infrastructure => latency.infrastructure,
            DeploymentStep::Nodes => latency.nodes,
            DeploymentStep::Validators => latency.validators,
            DeploymentStep::Bridge => latency.bridge,
            DeploymentStep::Monitoring => latency.monitoring,
        }
    }
}

/// Performs one provisioning step for a chain
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn run_step(&self, step: DeploymentStep, chain: &Chain) -> Result<()>;
}

/// Waits out the configured latency of each step and succeeds
pub struct SimulatedProvisioner {
    latency: StepLatency,
}

impl SimulatedProvisioner {
    pub fn new(latency: StepLatency) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn run_step(&self, step: DeploymentStep, chain: &Chain) -> Result<()> {
        let ms = step.latency_ms(&self.latency);
        trace!(chain_id = %chain.id, %step, ms, "Simulating provisioning step");
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        Ok(())
    }
}

struct Endpoints {
    rpc_url: String,
    explorer_url: String,
    bridge_url: String,
}

impl Endpoints {
    fn provisioned(chain_id: ChainId, domain: &str) -> Self {
        let label = &chain_id.simple().to_string()[..12];
        Self {
            rpc_url: format!("https://rpc-{label}.{domain}"),
            explorer_url: format!("https://explorer-{label}.{domain}"),
            bridge_url: format!("https://bridge-{label}.{domain}"),
        }
    }

    /// Published by the fallback before the workflow has produced real endpoints
    fn placeholder(chain_id: ChainId, domain: &str) -> Self {
        Self {
            rpc_url: format!("https://rpc.{domain}/{chain_id}"),
            explorer_url: format!("https://explorer.{domain}/{chain_id}"),
            bridge_url: format!("https://bridge.{domain}/{chain_id}"),
        }
    }

    fn apply(self, chain: &mut Chain) {
        chain.rpc_url = Some(self.rpc_url);
        chain.explorer_url = Some(self.explorer_url);
        chain.bridge_url = Some(self.bridge_url);
    }
}

#[derive(Clone)]
pub struct DeploymentOrchestrator {
    ctx: Context,
    provisioner: Arc<dyn Provisioner>,
}

impl DeploymentOrchestrator {
    pub fn new(ctx: Context, provisioner: Arc<dyn Provisioner>) -> Self {
        Self { ctx, provisioner }
    }

    pub fn simulated(ctx: Context) -> Self {
        let provisioner = Arc::new(SimulatedProvisioner::new(ctx.config.step_latency.clone()));
        Self::new(ctx, provisioner)
    }

    /// Schedules the provisioning workflow and the fallback timer for a new chain
    pub fn launch(&self, chain_id: ChainId) {
        let workflow = self.clone();
        self.ctx
            .tasks
            .schedule("deployment_workflow", std::time::Duration::ZERO, async move {
                workflow.run_workflow(chain_id).await
            });

        let fallback = self.clone();
        let delay = self.ctx.config.fallback_delay();
        self.ctx.tasks.schedule("deployment_fallback", delay, async move {
            fallback.fire_fallback(chain_id).await
        });
        debug!(%chain_id, ?delay, "Deployment launched");
    }

    async fn run_workflow(&self, chain_id: ChainId) -> Result<()> {
        for step in DeploymentStep::iter() {
            let chain = self.ctx.find_chain(chain_id).await?;
            if chain.is_deleted() {
                info!(%chain_id, %step, "Chain deleted, abandoning deployment");
                DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["abandoned"]).inc();
                return Ok(());
            }

            let started = Instant::now();
            let result = self.provisioner.run_step(step, &chain).await;
            let outcome = if result.is_ok() { "success" } else { "failure" };
            let label: &'static str = step.into();
            DEPLOYMENT_STEP_DURATION
                .with_label_values(&[label, outcome])
                .observe(started.elapsed().as_secs_f64());

            if let Err(e) = result {
                warn!(%chain_id, %step, error = %e, "Deployment step failed");
                return self.record_step_failure(chain_id, step, e).await;
            }
            debug!(%chain_id, %step, "Deployment step finished");
        }
        self.finish_workflow(chain_id).await
    }

    async fn record_step_failure(&self, chain_id: ChainId, step: DeploymentStep, e: Error) -> Result<()> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let chain = self.ctx.find_chain(chain_id).await?;
        if chain.is_deleted() {
            return Ok(());
        }
        DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["step_failed"]).inc();
        let reason = match e {
            Error::Provisioning { reason, .. } => reason,
            other => other.to_string(),
        };
        self.ctx
            .events
            .append(
                chain_id,
                EventType::DeploymentStepFailed,
                format!("Deployment step {step} failed: {reason}"),
                None,
                json!({ "step": step, "reason": reason }),
            )
            .await?;
        Ok(())
    }

    async fn finish_workflow(&self, chain_id: ChainId) -> Result<()> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.find_chain(chain_id).await?;
        if chain.is_deleted() {
            info!(%chain_id, "Chain deleted before deployment finished");
            DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["abandoned"]).inc();
            return Ok(());
        }

        let activated = chain.status.is_deploying();
        if activated {
            apply_transition(&mut chain, ChainTransition::Activate)?;
            chain.deployed_at = Some(Utc::now());
            DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["workflow"]).inc();
        } else {
            // fallback got there first, keep its status
            DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["workflow_after_fallback"]).inc();
        }
        Endpoints::provisioned(chain_id, &self.ctx.config.endpoint_domain).apply(&mut chain);
        chain.agglayer_id = Some(format!("agglayer-{}", &chain_id.simple().to_string()[..16]));
        self.ctx.save_chain(&mut chain).await?;

        self.ctx
            .events
            .append(
                chain_id,
                EventType::DeploymentCompleted,
                "Deployment workflow completed",
                None,
                json!({
                    "rpcUrl": chain.rpc_url,
                    "explorerUrl": chain.explorer_url,
                    "bridgeUrl": chain.bridge_url,
                    "agglayerId": chain.agglayer_id,
                    "activated": activated,
                }),
            )
            .await?;
        info!(%chain_id, activated, status = %chain.status, "Deployment completed");
        Ok(())
    }

    async fn fire_fallback(&self, chain_id: ChainId) -> Result<()> {
        let _guard = self.ctx.locks.lock(chain_id).await;
        let mut chain = self.ctx.find_chain(chain_id).await?;
        if chain.is_deleted() || !chain.status.is_deploying() {
            debug!(%chain_id, status = %chain.status, "Fallback not needed");
            return Ok(());
        }

        apply_transition(&mut chain, ChainTransition::Activate)?;
        Endpoints::placeholder(chain_id, &self.ctx.config.endpoint_domain).apply(&mut chain);
        chain.deployed_at = Some(Utc::now());
        self.ctx.save_chain(&mut chain).await?;
        DEPLOYMENT_OUTCOMES_TOTAL.with_label_values(&["fallback"]).inc();

        self.ctx
            .events
            .append(
                chain_id,
                EventType::DeploymentFallbackActivated,
                "Chain activated by deployment fallback",
                None,
                json!({ "rpcUrl": chain.rpc_url, "fallbackDelayMs": self.ctx.config.fallback_delay }),
            )
            .await?;
        warn!(%chain_id, "Deployment fallback activated chain");
        Ok(())
    }
}
