use async_trait::async_trait;
use chain_orchestrator::{
    ChainOrchestrator, CreateChainConfig, DeploymentStep, Error, ErrorKind, OrchestratorConfig,
    Provisioner, ScaleAction,
};
use chain_store::{
    Backend, BackupStatus, BackupType, Chain, ChainStatus, EntityKind, EntityStore, MemoryBackend,
    Record, StoreBackend, StoreError, StoreResult, Upgrade, UpgradeStatus, UpgradeType,
    ValidatorAccess, ValidatorStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn chain_config(validators: u32) -> CreateChainConfig {
    CreateChainConfig {
        name: "testnet".into(),
        chain_type: "rollup".into(),
        rollup_type: "zk".into(),
        gas_token: "ETH".into(),
        validator_access: ValidatorAccess::Public,
        validator_count: validators,
        registration: None,
    }
}

fn orchestrator() -> ChainOrchestrator {
    ChainOrchestrator::in_memory(OrchestratorConfig::fast())
}

async fn active_chain(orchestrator: &ChainOrchestrator, validators: u32) -> Chain {
    let chain = orchestrator
        .create_chain("alice", chain_config(validators))
        .await
        .unwrap();
    orchestrator.flush().await.unwrap();
    orchestrator.get_chain(chain.id).await.unwrap()
}

async fn event_count(orchestrator: &ChainOrchestrator, chain: &Chain) -> usize {
    orchestrator.list_events(chain.id, 1000).await.unwrap().len()
}

/// Never finishes the first step
struct StalledProvisioner;

#[async_trait]
impl Provisioner for StalledProvisioner {
    async fn run_step(&self, _step: DeploymentStep, _chain: &Chain) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Memory backend whose inserts of one entity kind fail
#[derive(Default)]
struct FailingInserts {
    inner: MemoryBackend,
    kind: Option<EntityKind>,
}

#[async_trait]
impl Backend for FailingInserts {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        if self.kind == Some(kind) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.insert(kind, record).await
    }

    async fn replace(&self, kind: EntityKind, record: Record) -> StoreResult<()> {
        self.inner.replace(kind, record).await
    }

    async fn get(&self, kind: EntityKind, id: uuid::Uuid) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(kind, id).await
    }

    async fn scan(&self, kind: EntityKind, parent: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.inner.scan(kind, parent).await
    }

    async fn next_sequence(&self) -> StoreResult<u64> {
        self.inner.next_sequence().await
    }
}

fn failing_on(kind: EntityKind) -> ChainOrchestrator {
    let backend = FailingInserts {
        kind: Some(kind),
        ..Default::default()
    };
    ChainOrchestrator::new(
        EntityStore::new(Arc::new(backend)),
        OrchestratorConfig::fast(),
    )
}

#[tokio::test(start_paused = true)]
async fn failed_validator_write_leaves_no_chain_behind() {
    let orchestrator = failing_on(EntityKind::Validator);
    let err = orchestrator
        .create_chain("alice", chain_config(3))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    orchestrator.flush().await.unwrap();
    tokio::time::sleep(orchestrator.config().fallback_delay() * 4).await;
    assert!(orchestrator.list_chains("alice").await.unwrap().is_empty());
    assert_eq!(orchestrator.pending_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn chain_still_deploys_when_creation_event_is_lost() {
    let orchestrator = failing_on(EntityKind::Event);
    let chain = orchestrator
        .create_chain("alice", chain_config(2))
        .await
        .unwrap();
    orchestrator.flush().await.unwrap();

    let chains = orchestrator.list_chains("alice").await.unwrap();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].id, chain.id);
    assert_eq!(chains[0].status, ChainStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn public_chain_with_three_validators_goes_active() {
    let orchestrator = orchestrator();
    let chain = orchestrator
        .create_chain("alice", chain_config(3))
        .await
        .unwrap();
    assert_eq!(chain.status, ChainStatus::Pending);

    let validators = orchestrator.list_validators(chain.id, "alice").await.unwrap();
    assert_eq!(validators.len(), 3);
    assert!(validators.iter().all(|v| v.status == ValidatorStatus::Active));
    assert_eq!(validators.iter().filter(|v| v.is_genesis).count(), 1);

    tokio::time::sleep(orchestrator.config().fallback_delay()).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    let chain = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(chain.status, ChainStatus::Active);
    assert_eq!(chain.validator_count, 3);
}

#[tokio::test(start_paused = true)]
async fn fallback_activates_even_if_workflow_stalls() {
    let config = OrchestratorConfig::fast();
    let fallback = config.fallback_delay();
    let orchestrator =
        ChainOrchestrator::with_provisioner(EntityStore::memory(), config, Arc::new(StalledProvisioner));
    let start = Instant::now();
    let chain = orchestrator
        .create_chain("alice", chain_config(1))
        .await
        .unwrap();

    tokio::time::sleep(fallback + Duration::from_millis(1)).await;
    let activated = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(activated.status, ChainStatus::Active);
    assert!(activated.rpc_url.is_some());
    assert!(activated.agglayer_id.is_none());
    assert!(start.elapsed() < Duration::from_secs(1));

    let events = orchestrator.list_events(chain.id, 10).await.unwrap();
    assert_eq!(events[0].event_type, "deployment_fallback_activated");
}

#[tokio::test(start_paused = true)]
async fn removing_more_than_non_genesis_is_rejected() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 3).await;
    let events_before = event_count(&orchestrator, &chain).await;

    let err = orchestrator
        .scale_chain(chain.id, ScaleAction::Remove, 5, "alice")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), "only 2 non-genesis validators available");

    let after = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(after.status, ChainStatus::Active);
    assert_eq!(after.validator_count, 3);
    let validators = orchestrator.list_validators(chain.id, "alice").await.unwrap();
    assert!(validators.iter().all(|v| v.status == ValidatorStatus::Active));
    assert_eq!(event_count(&orchestrator, &chain).await, events_before);
}

#[tokio::test(start_paused = true)]
async fn genesis_validator_survives_any_removal() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 1).await;
    for count in [1, 2, 10] {
        let err = orchestrator
            .scale_chain(chain.id, ScaleAction::Remove, count, "alice")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let validators = orchestrator.list_validators(chain.id, "alice").await.unwrap();
    assert_eq!(validators.len(), 1);
    assert!(validators[0].is_genesis && validators[0].is_active());
}

#[tokio::test(start_paused = true)]
async fn scale_up_then_down_restores_count() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 2).await;

    let up = orchestrator
        .scale_chain(chain.id, ScaleAction::Add, 4, "alice")
        .await
        .unwrap();
    assert_eq!((up.old_count, up.new_count), (2, 6));
    assert_eq!(
        orchestrator.get_chain(chain.id).await.unwrap().status,
        ChainStatus::Scaling
    );
    orchestrator.flush().await.unwrap();

    let down = orchestrator
        .scale_chain(chain.id, ScaleAction::Remove, 4, "alice")
        .await
        .unwrap();
    assert_eq!((down.old_count, down.new_count), (6, 2));
    orchestrator.flush().await.unwrap();

    let chain = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(chain.status, ChainStatus::Active);
    assert_eq!(chain.validator_count, 2);

    let events = orchestrator.list_events(chain.id, 2).await.unwrap();
    assert_eq!(events[0].event_type, "scaled_down");
    assert_eq!(events[1].event_type, "scaled_up");
    assert_eq!(events[1].payload["oldCount"], 2);
    assert_eq!(events[1].payload["newCount"], 6);
}

#[tokio::test(start_paused = true)]
async fn add_then_immediate_remove_restores_count() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 1).await;

    let up = orchestrator
        .scale_chain(chain.id, ScaleAction::Add, 2, "alice")
        .await
        .unwrap();
    let down = orchestrator
        .scale_chain(chain.id, ScaleAction::Remove, 2, "alice")
        .await
        .unwrap();
    assert_eq!((up.old_count, up.new_count), (1, 3));
    assert_eq!((down.old_count, down.new_count), (3, 1));

    orchestrator.flush().await.unwrap();
    let chain = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(chain.status, ChainStatus::Active);
    assert_eq!(chain.validator_count, 1);
}

#[tokio::test(start_paused = true)]
async fn restore_waits_for_completed_backup() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 1).await;
    orchestrator.report_block_height(chain.id, 1_000).await.unwrap();

    let backup = orchestrator
        .create_backup(chain.id, BackupType::Full, "alice")
        .await
        .unwrap();
    assert_eq!(backup.block_height, 1_000);

    let err = orchestrator
        .restore_backup(chain.id, backup.id, "alice")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        orchestrator.get_chain(chain.id).await.unwrap().status,
        ChainStatus::Active
    );

    orchestrator.flush().await.unwrap();
    orchestrator.report_block_height(chain.id, 1_500).await.unwrap();

    let restoring = orchestrator
        .restore_backup(chain.id, backup.id, "alice")
        .await
        .unwrap();
    assert_eq!(restoring.status, BackupStatus::Restoring);
    assert_eq!(
        orchestrator.get_chain(chain.id).await.unwrap().status,
        ChainStatus::Maintenance
    );

    orchestrator.flush().await.unwrap();
    let chain = orchestrator.get_chain(chain.id).await.unwrap();
    assert_eq!(chain.status, ChainStatus::Active);
    assert_eq!(chain.block_height, 1_000);

    let types: Vec<String> = orchestrator
        .list_events(chain.id, 4)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            "backup_restored",
            "backup_restore_started",
            "backup_completed",
            "backup_created"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn each_operation_appends_its_events() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 2).await;
    // created + deployment_completed
    assert_eq!(event_count(&orchestrator, &chain).await, 2);

    orchestrator.pause_chain(chain.id, "alice").await.unwrap();
    assert_eq!(event_count(&orchestrator, &chain).await, 3);
    orchestrator.resume_chain(chain.id, "alice").await.unwrap();
    assert_eq!(event_count(&orchestrator, &chain).await, 4);

    orchestrator
        .upgrade_chain(chain.id, "1.1.0", UpgradeType::Minor, None, "alice")
        .await
        .unwrap();
    assert_eq!(event_count(&orchestrator, &chain).await, 5);
    orchestrator
        .fail_upgrade(chain.id, "bad migration", "alice")
        .await
        .unwrap();
    // upgrade_failed + upgrade_rolled_back
    assert_eq!(event_count(&orchestrator, &chain).await, 7);

    let validator = orchestrator
        .list_validators(chain.id, "alice")
        .await
        .unwrap()
        .remove(1);
    orchestrator
        .stake_validator(chain.id, validator.id, 500, "alice")
        .await
        .unwrap();
    assert_eq!(event_count(&orchestrator, &chain).await, 8);

    // rejected operations add nothing
    assert!(orchestrator.resume_chain(chain.id, "alice").await.is_err());
    orchestrator.report_block_height(chain.id, 10).await.unwrap();
    assert_eq!(event_count(&orchestrator, &chain).await, 8);

    let events = orchestrator.list_events(chain.id, 1000).await.unwrap();
    assert!(events
        .windows(2)
        .all(|pair| pair[0].sequence > pair[1].sequence));
}

#[tokio::test(start_paused = true)]
async fn delete_cascades() {
    let orchestrator = orchestrator();
    let chain = active_chain(&orchestrator, 3).await;
    orchestrator
        .create_backup(chain.id, BackupType::Snapshot, "alice")
        .await
        .unwrap();
    orchestrator.flush().await.unwrap();

    orchestrator.delete_chain(chain.id, "alice").await.unwrap();

    assert_eq!(
        orchestrator.get_chain(chain.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(orchestrator.list_chains("alice").await.unwrap().is_empty());

    let audited = orchestrator.audit_chain(chain.id).await.unwrap();
    assert_eq!(audited.status, ChainStatus::Deleted);
    assert!(audited.deleted_at.is_some());

    let events = orchestrator.list_events(chain.id, 1).await.unwrap();
    assert_eq!(events[0].event_type, "deleted");
    assert_eq!(events[0].payload["validatorsRemoved"], 3);
    assert_eq!(events[0].payload["backupsDeleted"], 1);

    assert_eq!(
        orchestrator
            .delete_chain(chain.id, "alice")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn delete_fails_an_open_upgrade() {
    let store = EntityStore::memory();
    let orchestrator = ChainOrchestrator::new(store.clone(), OrchestratorConfig::fast());
    let chain = active_chain(&orchestrator, 1).await;
    orchestrator
        .upgrade_chain(chain.id, "2.0.0", UpgradeType::Major, None, "alice")
        .await
        .unwrap();

    orchestrator.delete_chain(chain.id, "alice").await.unwrap();

    let upgrades: Vec<Upgrade> = store.get_by_parent(&chain.id.to_string()).await.unwrap();
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].status, UpgradeStatus::Failed);
    assert!(upgrades[0].completed_at.is_some());

    let events = orchestrator.list_events(chain.id, 1).await.unwrap();
    assert_eq!(events[0].payload["upgradesAbandoned"], 1);
}

#[tokio::test(start_paused = true)]
async fn delete_during_deployment_stops_it() {
    let orchestrator = orchestrator();
    let chain = orchestrator
        .create_chain("alice", chain_config(2))
        .await
        .unwrap();
    orchestrator.delete_chain(chain.id, "alice").await.unwrap();
    orchestrator.flush().await.unwrap();

    let audited = orchestrator.audit_chain(chain.id).await.unwrap();
    assert_eq!(audited.status, ChainStatus::Deleted);
    assert!(audited.rpc_url.is_none());

    let types: Vec<String> = orchestrator
        .list_events(chain.id, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["deleted", "created"]);
}

#[tokio::test]
async fn sled_backed_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let backend = StoreBackend::Sled {
        path: dir.path().join("chains"),
    };

    let chain_id = {
        let orchestrator = ChainOrchestrator::open(&backend, OrchestratorConfig::fast()).unwrap();
        let chain = orchestrator
            .create_chain("alice", chain_config(2))
            .await
            .unwrap();
        orchestrator.flush().await.unwrap();
        chain.id
    };

    let orchestrator = ChainOrchestrator::open(&backend, OrchestratorConfig::fast()).unwrap();
    let chain = orchestrator.get_chain(chain_id).await.unwrap();
    assert_eq!(chain.status, ChainStatus::Active);
    assert_eq!(
        orchestrator
            .list_validators(chain_id, "alice")
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(orchestrator.list_events(chain_id, 10).await.unwrap().len(), 2);
}
