use crate::config::{config_value_parser, OrchestratorConfig};
use crate::orchestrator::{ChainOrchestrator, CreateChainConfig};
use crate::validators::ScaleAction;
use chain_store::{
    BackupId, BackupType, ChainId, Registration, StoreBackend, UpgradeType, ValidatorAccess,
    ValidatorId,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use eyre::Result;
use futures::pin_mut;
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

pub const DEFAULT_DB_PATH: &str = "etc/data/chains";

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

#[derive(Parser)]
#[command(author, version, about = "Chain lifecycle orchestrator", long_about = None)]
pub struct App {
    #[arg(long = "db-path", env = "CHAINCTL_DB_PATH")]
    pub db_path: Option<String>,

    /// Keep all state in process memory, nothing survives the command
    #[arg(long = "in-memory", default_value_t = false, conflicts_with = "db_path")]
    pub in_memory: bool,

    #[arg(
        long = "config",
        value_name = "PRESET_OR_PATH",
        value_parser = config_value_parser,
        default_value = "dev"
    )]
    pub config: OrchestratorConfig,

    /// Identity the command acts as
    #[arg(long, env = "CHAINCTL_ACTOR", default_value = "local")]
    pub actor: String,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    #[clap(long, help = "Port for the metrics server")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a chain and start deploying it
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "rollup")]
        chain_type: String,
        #[arg(long, default_value = "optimistic")]
        rollup_type: String,
        #[arg(long, default_value = "ETH")]
        gas_token: String,
        #[arg(long, default_value = "public")]
        access: ValidatorAccess,
        #[arg(long, default_value_t = 1)]
        validators: u32,
        /// Registration transaction, selects the deploying path
        #[arg(long, requires = "network_id")]
        tx_hash: Option<String>,
        #[arg(long, requires = "tx_hash")]
        network_id: Option<u64>,
    },
    Get {
        chain_id: ChainId,
        /// Also show deleted chains
        #[arg(long)]
        audit: bool,
    },
    List,
    Pause {
        chain_id: ChainId,
    },
    Resume {
        chain_id: ChainId,
    },
    Scale {
        chain_id: ChainId,
        action: ScaleAction,
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },
    Delete {
        chain_id: ChainId,
    },
    Backup {
        chain_id: ChainId,
        #[arg(long = "type", default_value = "full")]
        backup_type: BackupType,
    },
    Restore {
        chain_id: ChainId,
        backup_id: BackupId,
    },
    Backups {
        chain_id: ChainId,
    },
    DeleteBackup {
        chain_id: ChainId,
        backup_id: BackupId,
    },
    Upgrade {
        chain_id: ChainId,
        to_version: String,
        #[arg(long = "type", default_value = "minor")]
        upgrade_type: UpgradeType,
        /// RFC 3339 time to schedule the upgrade for
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    StartUpgrade {
        chain_id: ChainId,
    },
    CompleteUpgrade {
        chain_id: ChainId,
    },
    FailUpgrade {
        chain_id: ChainId,
        reason: String,
    },
    Upgrades {
        chain_id: ChainId,
    },
    Validators {
        chain_id: ChainId,
    },
    Stake {
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
    },
    Reward {
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
    },
    Slash {
        chain_id: ChainId,
        validator_id: ValidatorId,
        amount: u128,
    },
    Events {
        chain_id: ChainId,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run the metrics server until interrupted
    Serve,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(run_until_ctrl_c(self.execute()))?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| Level::from_str(&level).ok())
            .unwrap_or(Level::INFO);

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag =
                format!("chain_orchestrator={rust_log_level},chain_store={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        // stdout carries command output
        let main_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    fn store_backend(&self) -> StoreBackend {
        if self.in_memory {
            StoreBackend::Memory
        } else {
            let path = self.db_path.as_deref().unwrap_or(DEFAULT_DB_PATH);
            StoreBackend::Sled { path: path.into() }
        }
    }

    async fn execute(self) -> Result<()> {
        let orchestrator = ChainOrchestrator::open(&self.store_backend(), self.config.clone())?;
        let actor = self.actor.as_str();

        match self.command {
            Command::Create {
                name,
                chain_type,
                rollup_type,
                gas_token,
                access,
                validators,
                tx_hash,
                network_id,
            } => {
                let registration = tx_hash
                    .zip(network_id)
                    .map(|(tx_hash, network_id)| Registration { tx_hash, network_id });
                let config = CreateChainConfig {
                    name,
                    chain_type,
                    rollup_type,
                    gas_token,
                    validator_access: access,
                    validator_count: validators,
                    registration,
                };
                let chain = orchestrator.create_chain(actor, config).await?;
                info!(
                    chain_id = %chain.id,
                    "Waiting up to {:?} for deployment",
                    orchestrator.config().fallback_delay()
                );
                orchestrator.flush().await?;
                print_json(&orchestrator.audit_chain(chain.id).await?)?;
            }
            Command::Get { chain_id, audit } => {
                let chain = if audit {
                    orchestrator.audit_chain(chain_id).await?
                } else {
                    orchestrator.get_chain(chain_id).await?
                };
                print_json(&chain)?;
            }
            Command::List => print_json(&orchestrator.list_chains(actor).await?)?,
            Command::Pause { chain_id } => {
                print_json(&orchestrator.pause_chain(chain_id, actor).await?)?
            }
            Command::Resume { chain_id } => {
                print_json(&orchestrator.resume_chain(chain_id, actor).await?)?
            }
            Command::Scale {
                chain_id,
                action,
                count,
            } => print_json(
                &orchestrator
                    .scale_chain(chain_id, action, count, actor)
                    .await?,
            )?,
            Command::Delete { chain_id } => {
                orchestrator.delete_chain(chain_id, actor).await?;
                print_json(&orchestrator.audit_chain(chain_id).await?)?;
            }
            Command::Backup {
                chain_id,
                backup_type,
            } => {
                let backup = orchestrator
                    .create_backup(chain_id, backup_type, actor)
                    .await?;
                orchestrator.flush().await?;
                let backups = orchestrator.list_backups(chain_id, actor).await?;
                print_json(&backups.into_iter().find(|b| b.id == backup.id).unwrap_or(backup))?;
            }
            Command::Restore {
                chain_id,
                backup_id,
            } => {
                print_json(
                    &orchestrator
                        .restore_backup(chain_id, backup_id, actor)
                        .await?,
                )?;
            }
            Command::Backups { chain_id } => {
                print_json(&orchestrator.list_backups(chain_id, actor).await?)?
            }
            Command::DeleteBackup {
                chain_id,
                backup_id,
            } => print_json(
                &orchestrator
                    .delete_backup(chain_id, backup_id, actor)
                    .await?,
            )?,
            Command::Upgrade {
                chain_id,
                to_version,
                upgrade_type,
                at,
            } => print_json(
                &orchestrator
                    .upgrade_chain(chain_id, &to_version, upgrade_type, at, actor)
                    .await?,
            )?,
            Command::StartUpgrade { chain_id } => {
                print_json(&orchestrator.start_upgrade(chain_id, actor).await?)?
            }
            Command::CompleteUpgrade { chain_id } => {
                print_json(&orchestrator.complete_upgrade(chain_id, actor).await?)?
            }
            Command::FailUpgrade { chain_id, reason } => print_json(
                &orchestrator
                    .fail_upgrade(chain_id, &reason, actor)
                    .await?,
            )?,
            Command::Upgrades { chain_id } => {
                print_json(&orchestrator.list_upgrades(chain_id, actor).await?)?
            }
            Command::Validators { chain_id } => {
                print_json(&orchestrator.list_validators(chain_id, actor).await?)?
            }
            Command::Stake {
                chain_id,
                validator_id,
                amount,
            } => print_json(
                &orchestrator
                    .stake_validator(chain_id, validator_id, amount, actor)
                    .await?,
            )?,
            Command::Reward {
                chain_id,
                validator_id,
                amount,
            } => print_json(
                &orchestrator
                    .reward_validator(chain_id, validator_id, amount, actor)
                    .await?,
            )?,
            Command::Slash {
                chain_id,
                validator_id,
                amount,
            } => print_json(
                &orchestrator
                    .slash_validator(chain_id, validator_id, amount, actor)
                    .await?,
            )?,
            Command::Events { chain_id, limit } => {
                print_json(&orchestrator.list_events(chain_id, limit).await?)?
            }
            Command::Serve => {
                crate::metrics::start_server(self.metrics_port).await;
                info!("Serving metrics, press ctrl-c to stop");
                std::future::pending::<()>().await;
            }
        }

        // background transitions (scaling settle, restore) land before exit
        debug!(pending = orchestrator.pending_jobs(), "Waiting for background jobs");
        orchestrator.flush().await?;
        Ok(())
    }
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn run_until_ctrl_c<F, E>(fut: F) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    E: Send + Sync + 'static + From<std::io::Error>,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = fut => res?,
    }

    Ok(())
}
