mod app;
mod backup;
pub mod config;
mod context;
pub mod deployment;
pub mod error;
mod events;
pub mod metrics;
pub mod orchestrator;
mod tasks;
mod upgrade;
pub mod validators;

// for main.rs
pub use app::run;

pub use config::OrchestratorConfig;
pub use deployment::{DeploymentStep, Provisioner, SimulatedProvisioner};
pub use error::{Error, ErrorKind, Result};
pub use events::EventType;
pub use orchestrator::{ChainOrchestrator, CreateChainConfig};
pub use validators::{ScaleAction, ScaleOutcome};
