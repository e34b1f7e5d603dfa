use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use changegate::connector::{DryRunConnector, ExecutionConnector};
use changegate::db;
use changegate::domain::{
    ChangeCategory, ChangeFilter, ChangeOperation, ChangeRequest, ChangeRequestRepository,
    ChangeStatus, CreateChangeInput, DeviceRepository, DomainError, ExecutionResult, ImpactLevel,
    QueueEntryFilter, QueueStatus, RESTART_INTERRUPTED_ERROR, StatusUpdate, UpsertDeviceInput,
};
use changegate::infrastructure::{
    AppState, SeaOrmChangeRequestRepository, SeaOrmDeviceRepository, SeaOrmQueueEntryRepository,
};
use changegate::services::{ChangeService, DeviceCommandQueue};
use sea_orm::DatabaseConnection;

/// Connector that fails any command list containing "fail" and remembers every call
#[derive(Default)]
struct ScriptedConnector {
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl ExecutionConnector for ScriptedConnector {
    async fn execute(
        &self,
        address: &str,
        commands: &[String],
    ) -> Result<ExecutionResult, DomainError> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), commands.to_vec()));

        if commands.iter().any(|c| c.contains("fail")) {
            Ok(ExecutionResult::failure("uci commit failed"))
        } else {
            Ok(ExecutionResult::success(Some(commands.join("\n")), 7))
        }
    }
}

// Helper to create a test database
async fn setup_test_db() -> DatabaseConnection {
    db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB")
}

async fn setup_state(db: DatabaseConnection) -> (AppState, Arc<ScriptedConnector>) {
    let connector = Arc::new(ScriptedConnector::default());
    let state = AppState::new(db, connector.clone())
        .await
        .expect("Failed to build state");

    state
        .device_repo
        .upsert(UpsertDeviceInput {
            id: "r1".to_string(),
            name: Some("Office gateway".to_string()),
            address: "100.64.0.1".to_string(),
        })
        .await
        .expect("Failed to register device");

    (state, connector)
}

fn change_input(device_id: &str, commands: &[&str]) -> CreateChangeInput {
    CreateChangeInput {
        device_id: device_id.to_string(),
        category: ChangeCategory::Wireless,
        operation: ChangeOperation::Update,
        target_type: "wifi-iface".to_string(),
        target_id: Some("default_radio0".to_string()),
        target_name: None,
        previous_value: None,
        proposed_value: Some(serde_json::json!({ "ssid": "office" })),
        commands: commands.iter().map(|c| c.to_string()).collect(),
        rollback_commands: Vec::new(),
        impact: ImpactLevel::Low,
        requires_reboot: false,
        affected_services: vec!["network".to_string()],
        dependencies: Vec::new(),
        created_by: Some("planner".to_string()),
    }
}

#[tokio::test]
async fn test_execute_requires_approval() {
    let (state, connector) = setup_state(setup_test_db().await).await;

    let change = state
        .changes
        .create(change_input("r1", &["uci set wireless.default_radio0.ssid=office"]))
        .await
        .unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);

    let err = state.changes.execute(&change.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
    assert!(connector.calls.lock().unwrap().is_empty());

    let approved = state
        .changes
        .approve(&change.id, "alice", Some("looks fine".to_string()))
        .await
        .unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("alice"));
    assert!(approved.reviewed_at.is_some());

    let report = state.changes.execute(&change.id).await.unwrap();
    assert!(report.success);
    assert_eq!(report.duration_ms, 7);

    let done = state.changes.get(&change.id).await.unwrap();
    assert_eq!(done.status, ChangeStatus::Completed);
    assert_eq!(
        done.result.as_deref(),
        Some("uci set wireless.default_radio0.ssid=office")
    );
    assert!(done.error_message.is_none());
    assert!(done.executed_at.is_some());
    assert_eq!(done.duration_ms, Some(7));

    let calls = connector.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "100.64.0.1");

    // Terminal: a second run is refused
    drop(calls);
    assert!(state.changes.execute(&change.id).await.is_err());
}

#[tokio::test]
async fn test_review_transitions() {
    let (state, _) = setup_state(setup_test_db().await).await;

    let change = state
        .changes
        .create(change_input("r1", &["uci commit"]))
        .await
        .unwrap();

    assert!(state.changes.approve(&change.id, "  ", None).await.is_err());

    let rejected = state
        .changes
        .reject(&change.id, "bob", Some("wrong radio".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, ChangeStatus::Cancelled);
    assert_eq!(rejected.review_notes.as_deref(), Some("wrong radio"));

    // Cancelled is terminal
    assert!(matches!(
        state.changes.approve(&change.id, "alice", None).await,
        Err(DomainError::Validation(_))
    ));
    assert!(matches!(
        state.changes.approve("no-such-change", "alice", None).await,
        Err(DomainError::NotFound)
    ));

    // Annotations are accepted in every status
    let annotated = state
        .changes
        .annotate(&change.id, "carol", "superseded by next week's plan")
        .await
        .unwrap();
    assert_eq!(annotated.annotations.len(), 1);
    assert_eq!(annotated.annotations[0].author, "carol");
    assert_eq!(annotated.status, ChangeStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_change_does_not_block_device() {
    let (state, _) = setup_state(setup_test_db().await).await;

    let c1 = state
        .changes
        .create(change_input("r1", &["uci set network.lan.ipaddr=bad", "fail"]))
        .await
        .unwrap();
    let c2 = state
        .changes
        .create(change_input("r1", &["uci set system.@system[0].hostname=gw"]))
        .await
        .unwrap();
    state.changes.approve(&c1.id, "alice", None).await.unwrap();
    state.changes.approve(&c2.id, "alice", None).await.unwrap();

    let report = state.changes.execute_all_approved(None).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 1);
    assert!(report.skipped.is_empty());

    let c1 = state.changes.get(&c1.id).await.unwrap();
    assert_eq!(c1.status, ChangeStatus::Failed);
    assert_eq!(c1.error_message.as_deref(), Some("uci commit failed"));

    let c2 = state.changes.get(&c2.id).await.unwrap();
    assert_eq!(c2.status, ChangeStatus::Completed);

    let entries = state
        .queue
        .entries(QueueEntryFilter {
            device_id: Some("r1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].change_id, c1.id);
    assert_eq!(entries[0].status, QueueStatus::Failed);
    assert_eq!(entries[0].error.as_deref(), Some("uci commit failed"));
    assert_eq!(entries[1].change_id, c2.id);
    assert_eq!(entries[1].status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_dependencies_gate_execution() {
    let (state, _) = setup_state(setup_test_db().await).await;

    let mut orphan = change_input("r1", &["uci commit"]);
    orphan.dependencies = vec!["does-not-exist".to_string()];
    assert!(matches!(
        state.changes.create(orphan).await,
        Err(DomainError::Validation(_))
    ));

    let first = state
        .changes
        .create(change_input("r1", &["uci set firewall.@zone[1].input=REJECT"]))
        .await
        .unwrap();
    let mut second = change_input("r1", &["uci commit firewall"]);
    second.dependencies = vec![first.id.clone()];
    let second = state.changes.create(second).await.unwrap();

    state.changes.approve(&first.id, "alice", None).await.unwrap();
    state.changes.approve(&second.id, "alice", None).await.unwrap();

    // Dependency still approved, not completed
    assert!(matches!(
        state.changes.execute(&second.id).await,
        Err(DomainError::Validation(_))
    ));
    assert_eq!(
        state.changes.get(&second.id).await.unwrap().status,
        ChangeStatus::Approved
    );

    // The batch hands off oldest first; the dependant sees its dependency executing
    let report = state.changes.execute_all_approved(None).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].change_id, second.id);

    let report = state.changes.execute(&second.id).await.unwrap();
    assert!(report.success);
}

#[tokio::test]
async fn test_unknown_device_leaves_change_approved() {
    let (state, connector) = setup_state(setup_test_db().await).await;

    let change = state
        .changes
        .create(change_input("r9", &["uci commit"]))
        .await
        .unwrap();
    state.changes.approve(&change.id, "alice", None).await.unwrap();

    assert!(matches!(
        state.changes.execute(&change.id).await,
        Err(DomainError::Validation(_))
    ));
    assert_eq!(
        state.changes.get(&change.id).await.unwrap().status,
        ChangeStatus::Approved
    );
    assert!(connector.calls.lock().unwrap().is_empty());
    assert_eq!(state.queue.queue_length("r9").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_execute_runs_once() {
    let (state, connector) = setup_state(setup_test_db().await).await;

    let change = state
        .changes
        .create(change_input("r1", &["uci commit"]))
        .await
        .unwrap();
    state.changes.approve(&change.id, "alice", None).await.unwrap();

    let (a, b) = tokio::join!(
        state.changes.execute(&change.id),
        state.changes.execute(&change.id)
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(connector.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_batch_filters_by_device() {
    let (state, _) = setup_state(setup_test_db().await).await;
    state
        .device_repo
        .upsert(UpsertDeviceInput {
            id: "r2".to_string(),
            name: None,
            address: "100.64.0.2".to_string(),
        })
        .await
        .unwrap();

    let on_r1 = state
        .changes
        .create(change_input("r1", &["uci commit"]))
        .await
        .unwrap();
    let on_r2 = state
        .changes
        .create(change_input("r2", &["uci commit"]))
        .await
        .unwrap();
    let pending = state
        .changes
        .create(change_input("r2", &["uci commit"]))
        .await
        .unwrap();
    state.changes.approve(&on_r1.id, "alice", None).await.unwrap();
    state.changes.approve(&on_r2.id, "alice", None).await.unwrap();

    let report = state
        .changes
        .execute_all_approved(Some("r2".to_string()))
        .await
        .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].change_id, on_r2.id);

    assert_eq!(
        state.changes.get(&on_r1.id).await.unwrap().status,
        ChangeStatus::Approved
    );
    assert_eq!(
        state.changes.get(&pending.id).await.unwrap().status,
        ChangeStatus::Pending
    );

    let approved = state
        .changes
        .list(ChangeFilter {
            device_id: None,
            status: Some(ChangeStatus::Approved),
        })
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);
}

#[tokio::test]
async fn test_startup_fails_interrupted_changes() {
    let db = setup_test_db().await;
    let (state, _) = setup_state(db.clone()).await;

    let change = state
        .changes
        .create(change_input("r1", &["uci commit"]))
        .await
        .unwrap();
    state.changes.approve(&change.id, "alice", None).await.unwrap();
    state
        .change_repo
        .transition(
            &change.id,
            ChangeStatus::Approved,
            ChangeStatus::Executing,
            StatusUpdate::default(),
        )
        .await
        .unwrap();

    // Second composition over the same store, as after a process restart
    let (restarted, _) = setup_state(db).await;

    let change = restarted.changes.get(&change.id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Failed);
    assert_eq!(
        change.error_message.as_deref(),
        Some(RESTART_INTERRUPTED_ERROR)
    );
}

#[tokio::test]
async fn test_batch_leaves_other_statuses_alone() {
    let (state, connector) = setup_state(setup_test_db().await).await;

    let pending = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=50"]))
        .await
        .unwrap();

    let cancelled = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=60"]))
        .await
        .unwrap();
    state.changes.reject(&cancelled.id, "bob", None).await.unwrap();

    let completed = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=70"]))
        .await
        .unwrap();
    state.changes.approve(&completed.id, "alice", None).await.unwrap();
    assert!(state.changes.execute(&completed.id).await.unwrap().success);

    let failed = state
        .changes
        .create(change_input("r1", &["fail"]))
        .await
        .unwrap();
    state.changes.approve(&failed.id, "alice", None).await.unwrap();
    assert!(!state.changes.execute(&failed.id).await.unwrap().success);

    let executing = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=80"]))
        .await
        .unwrap();
    state.changes.approve(&executing.id, "alice", None).await.unwrap();
    state
        .change_repo
        .transition(
            &executing.id,
            ChangeStatus::Approved,
            ChangeStatus::Executing,
            StatusUpdate::default(),
        )
        .await
        .unwrap();

    let good = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=200"]))
        .await
        .unwrap();
    let bad = state
        .changes
        .create(change_input("r1", &["uci set dhcp.lan.limit=oops", "fail"]))
        .await
        .unwrap();
    state.changes.approve(&good.id, "alice", None).await.unwrap();
    state.changes.approve(&bad.id, "alice", None).await.unwrap();

    let before: Vec<ChangeRequest> = {
        let mut rows = Vec::new();
        for id in [&pending.id, &cancelled.id, &completed.id, &failed.id, &executing.id] {
            rows.push(state.changes.get(id).await.unwrap());
        }
        rows
    };
    let calls_before = connector.calls.lock().unwrap().len();

    let report = state.changes.execute_all_approved(None).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 1);
    assert!(report.skipped.is_empty());

    let mut ran: Vec<String> = report.results.iter().map(|r| r.change_id.clone()).collect();
    ran.sort();
    let mut expected = vec![good.id.clone(), bad.id.clone()];
    expected.sort();
    assert_eq!(ran, expected);

    assert_eq!(connector.calls.lock().unwrap().len(), calls_before + 2);

    for row in before {
        assert_eq!(state.changes.get(&row.id).await.unwrap(), row);
    }
    assert_eq!(
        state.changes.get(&good.id).await.unwrap().status,
        ChangeStatus::Completed
    );
    assert_eq!(
        state.changes.get(&bad.id).await.unwrap().status,
        ChangeStatus::Failed
    );
}

/// Delegates to SQLite but fails the first `failures` write-backs out of `executing`
struct FlakyChangeRepository {
    inner: SeaOrmChangeRequestRepository,
    failures: AtomicUsize,
    error: DomainError,
}

#[async_trait]
impl ChangeRequestRepository for FlakyChangeRepository {
    async fn create(&self, input: CreateChangeInput) -> Result<ChangeRequest, DomainError> {
        self.inner.create(input).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ChangeRequest>, DomainError> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self, filter: ChangeFilter) -> Result<Vec<ChangeRequest>, DomainError> {
        self.inner.find_all(filter).await
    }

    async fn transition(
        &self,
        id: &str,
        from: ChangeStatus,
        to: ChangeStatus,
        update: StatusUpdate,
    ) -> Result<ChangeRequest, DomainError> {
        if from == ChangeStatus::Executing
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(self.error.clone());
        }
        self.inner.transition(id, from, to, update).await
    }

    async fn annotate(
        &self,
        id: &str,
        author: String,
        note: String,
    ) -> Result<ChangeRequest, DomainError> {
        self.inner.annotate(id, author, note).await
    }

    async fn fail_executing(&self, error: &str) -> Result<Vec<String>, DomainError> {
        self.inner.fail_executing(error).await
    }
}

async fn flaky_service(failures: usize, error: DomainError) -> ChangeService {
    let db = setup_test_db().await;
    let devices = Arc::new(SeaOrmDeviceRepository::new(db.clone()));
    devices
        .upsert(UpsertDeviceInput {
            id: "r1".to_string(),
            name: None,
            address: "100.64.0.1".to_string(),
        })
        .await
        .unwrap();

    let queue = DeviceCommandQueue::new(Arc::new(SeaOrmQueueEntryRepository::new(db.clone())))
        .await
        .unwrap();
    let changes = Arc::new(FlakyChangeRepository {
        inner: SeaOrmChangeRequestRepository::new(db),
        failures: AtomicUsize::new(failures),
        error,
    });

    ChangeService::new(changes, devices, queue, Arc::new(DryRunConnector))
        .with_store_retry_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_outcome_write_back_retries_store_errors() {
    let service = flaky_service(2, DomainError::Database("database is locked".to_string())).await;

    let change = service
        .create(change_input("r1", &["uci commit dhcp"]))
        .await
        .unwrap();
    service.approve(&change.id, "alice", None).await.unwrap();

    let report = service.execute(&change.id).await.unwrap();
    assert!(report.success);
    assert!(report.record_error.is_none());

    let change = service.get(&change.id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Completed);
    assert!(change.result.is_some());
    assert!(change.executed_at.is_some());

    let entries = service
        .queue()
        .entries(QueueEntryFilter {
            change_id: Some(change.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries[0].status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_unrecordable_outcome_is_reported() {
    let service = flaky_service(1, DomainError::Internal("row vanished".to_string())).await;

    let change = service
        .create(change_input("r1", &["uci commit dhcp"]))
        .await
        .unwrap();
    service.approve(&change.id, "alice", None).await.unwrap();

    let report = service.execute(&change.id).await.unwrap();
    assert!(report.success);
    assert!(report.record_error.unwrap().contains("row vanished"));
}
