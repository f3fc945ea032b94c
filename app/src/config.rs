use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Simulated latency of each provisioning step, milliseconds
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct StepLatency {
    pub infrastructure: u64,
    pub nodes: u64,
    pub validators: u64,
    pub bridge: u64,
    pub monitoring: u64,
}

impl Default for StepLatency {
    fn default() -> Self {
        DEV.step_latency.clone()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Grace period after creation before a chain is force-activated, milliseconds
    pub fallback_delay: u64,
    pub step_latency: StepLatency,
    /// Time a chain stays in `scaling` after validators changed, milliseconds
    pub scaling_settle_delay: u64,
    pub backup_completion_delay: u64,
    pub restore_completion_delay: u64,
    /// Stake bonded to the genesis validator at creation
    pub genesis_stake: u64,
    pub genesis_version: String,
    pub default_retention_days: u32,
    /// Largest add/remove a single scale request may ask for
    pub max_scale_step: u32,
    pub max_validators: u32,
    /// Domain under which deployed endpoints are published
    pub endpoint_domain: String,
}

pub static DEV: Lazy<OrchestratorConfig> = Lazy::new(|| OrchestratorConfig {
    fallback_delay: 10_000,
    step_latency: StepLatency {
        infrastructure: 2_000,
        nodes: 1_500,
        validators: 1_000,
        bridge: 1_000,
        monitoring: 500,
    },
    scaling_settle_delay: 2_000,
    backup_completion_delay: 3_000,
    restore_completion_delay: 5_000,
    genesis_stake: 1_000_000,
    genesis_version: "1.0.0".to_string(),
    default_retention_days: 30,
    max_scale_step: 10,
    max_validators: 100,
    endpoint_domain: "rollups.local".to_string(),
});

/// Same shape as `dev` with every delay shortened, used by the CLI and tests
pub static FAST: Lazy<OrchestratorConfig> = Lazy::new(|| OrchestratorConfig {
    fallback_delay: 500,
    step_latency: StepLatency {
        infrastructure: 20,
        nodes: 20,
        validators: 10,
        bridge: 10,
        monitoring: 10,
    },
    scaling_settle_delay: 50,
    backup_completion_delay: 50,
    restore_completion_delay: 50,
    ..DEV.clone()
});

impl Default for OrchestratorConfig {
    fn default() -> Self {
        DEV.clone()
    }
}

impl OrchestratorConfig {
    pub fn fast() -> Self {
        FAST.clone()
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay)
    }

    pub fn scaling_settle_delay(&self) -> Duration {
        Duration::from_millis(self.scaling_settle_delay)
    }

    pub fn backup_completion_delay(&self) -> Duration {
        Duration::from_millis(self.backup_completion_delay)
    }

    pub fn restore_completion_delay(&self) -> Duration {
        Duration::from_millis(self.restore_completion_delay)
    }

    /// Sum of all provisioning step latencies
    pub fn workflow_duration(&self) -> Duration {
        let l = &self.step_latency;
        Duration::from_millis(l.infrastructure + l.nodes + l.validators + l.bridge + l.monitoring)
    }
}

pub fn config_value_parser(s: &str) -> eyre::Result<OrchestratorConfig, eyre::Error> {
    Ok(match s {
        "dev" => DEV.clone(),
        "fast" => FAST.clone(),
        _ => {
            let raw = std::fs::read_to_string(PathBuf::from(s))?;
            serde_json::from_str(&raw)?
        }
    })
}
