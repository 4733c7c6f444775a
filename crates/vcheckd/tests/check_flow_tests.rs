//! End-to-end check execution: enqueue, dispatch, poll, verdict.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vcheck_common::check_store::CheckStore;
use vcheck_common::checks::{
    BackendKind, CheckDefinition, CheckKind, CheckStatus, Severity,
};
use vcheck_common::command::{CommandStatus, CommandType};
use vcheck_common::command_queue::{CommandQueue, QueueRole};
use vcheck_common::config_store::ConfigStore;
use vcheck_common::inventory::{ConnectionState, Host, InventoryStore};
use vcheck_common::paths::{PathObservation, PathState};
use vcheck_common::service_status::ServiceStatusStore;

use vcheckd::backends::{BackendRegistry, SimulatedBackend, SimulatedBackendBuilder};
use vcheckd::check_service::CheckExecutionService;
use vcheckd::config::DaemonConfig;
use vcheckd::dispatcher::Dispatcher;
use vcheckd::handlers::HandlerContext;

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    frontend: CommandQueue,
    service: CheckExecutionService,
    inventory: InventoryStore,
    checks: CheckStore,
    backend: Arc<SimulatedBackend>,
}

fn fixture_on(dir: &TempDir, backend: SimulatedBackend) -> Fixture {
    let backend = Arc::new(backend);
    let db = dir.path().join("vcheck.db");

    let worker_queue = CommandQueue::open(&db, QueueRole::Worker).unwrap();
    let frontend = CommandQueue::open(&db, QueueRole::Frontend).unwrap();
    let status = ServiceStatusStore::open(&db).unwrap();
    let checks = CheckStore::open(&db).unwrap();
    let inventory = InventoryStore::open(&db).unwrap();
    let config_store = ConfigStore::open(&db).unwrap();
    let config = DaemonConfig::default().into_shared();

    let mut registry = BackendRegistry::new();
    registry.register(backend.clone());
    registry.register_fallback(BackendKind::Script, BackendKind::Simulated);
    let registry = Arc::new(registry);

    let service = CheckExecutionService::new(
        registry.clone(),
        inventory.clone(),
        checks.clone(),
        &config,
    );

    let ctx = HandlerContext {
        queue: worker_queue.clone(),
        status: status.clone(),
        inventory: inventory.clone(),
        checks: checks.clone(),
        config_store,
        config: config.clone(),
        registry,
        service: service.clone(),
        shutdown: CancellationToken::new(),
    };

    Fixture {
        dispatcher: Arc::new(Dispatcher::new(worker_queue, status, ctx, config)),
        frontend,
        service,
        inventory,
        checks,
        backend,
    }
}

fn seed_host(f: &Fixture, host_id: &str, cluster: Option<&str>, state: ConnectionState) {
    if f.inventory.get_target_by_name("prod-vc").unwrap().is_none() {
        f.inventory
            .add_target(
                "prod-vc",
                "https://vc.example",
                "svc",
                "cred-1",
                BackendKind::Simulated,
            )
            .unwrap();
    }
    let target = f.inventory.get_target_by_name("prod-vc").unwrap().unwrap();
    f.inventory
        .upsert_host(&Host {
            id: host_id.to_string(),
            name: format!("esx-{}", host_id),
            cluster_id: cluster.map(str::to_string),
            target_id: Some(target.id),
            connection_state: state,
            is_enabled: true,
        })
        .unwrap();
}

fn seed_path_check(f: &Fixture, id: &str, max_dead_paths: i64) -> CheckDefinition {
    let def = CheckDefinition {
        id: id.to_string(),
        category_id: "storage".to_string(),
        name: format!("iscsi-path-redundancy-{}", id),
        backend_kind: BackendKind::Simulated,
        kind: CheckKind::StoragePaths,
        default_severity: Severity::Critical,
        timeout_seconds: 30,
        is_enabled: true,
        parameters: json!({ "transport": "iscsi" }),
        thresholds: json!({ "max_dead_paths": max_dead_paths }),
    };
    f.checks.insert_definition(&def).unwrap();
    def
}

fn iscsi_paths(active: usize, dead: usize) -> Vec<PathObservation> {
    let mut paths = Vec::new();
    for i in 0..active {
        paths.push(PathObservation::new(
            "vmhba64",
            &format!("iqn.tgt{}", i),
            0,
            PathState::Active,
        ));
    }
    for i in 0..dead {
        paths.push(PathObservation::new(
            "vmhba64",
            &format!("iqn.tgt{}", i),
            1,
            PathState::Dead,
        ));
    }
    paths
}

#[tokio::test]
async fn test_healthy_host_passes_end_to_end() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(2, 0))
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);
    seed_path_check(&f, "check-3", 0);

    let id = f
        .frontend
        .enqueue(
            CommandType::ExecuteCheck,
            json!({ "host_id": "host-7", "check_definition_id": "check-3" }),
        )
        .unwrap();
    f.dispatcher.run_cycle().await.unwrap();

    let row = f.frontend.get(&id).unwrap().unwrap();
    assert_eq!(row.status, CommandStatus::Completed);
    let result = row.result.unwrap();
    assert_eq!(result["status"], "passed");
    assert!(result["error_message"].is_null());

    // The attempt landed in the history exactly once.
    let history = f.checks.results_for("host-7", "check-3").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CheckStatus::Passed);
}

#[tokio::test]
async fn test_one_dead_path_fails_with_named_count() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(2, 1))
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);
    seed_path_check(&f, "check-3", 0);

    let id = f
        .frontend
        .enqueue(
            CommandType::ExecuteCheck,
            json!({ "host_id": "host-7", "check_definition_id": "check-3" }),
        )
        .unwrap();
    f.dispatcher.run_cycle().await.unwrap();

    let row = f.frontend.get(&id).unwrap().unwrap();
    assert_eq!(row.status, CommandStatus::Completed);
    let result = row.result.unwrap();
    assert_eq!(result["status"], "failed");
    assert!(result["error_message"]
        .as_str()
        .unwrap()
        .contains("1 dead path"));
    assert!(result["output"].as_str().unwrap().contains("-> DEAD"));
}

#[tokio::test]
async fn test_disconnected_host_short_circuits_to_error() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(4, 0))
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Disconnected);
    seed_path_check(&f, "check-3", 0);

    let cancel = CancellationToken::new();
    let result = f.service.execute_check("host-7", "check-3", &cancel).await;

    // Error, not Failed: the check could not run, regardless of how
    // healthy the canned paths are.
    assert_eq!(result.status, CheckStatus::Error);
    assert!(result
        .error_message
        .as_ref()
        .unwrap()
        .contains("disconnected"));
}

#[tokio::test]
async fn test_disconnected_host_never_touches_the_backend() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(4, 0))
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::NotResponding);
    seed_path_check(&f, "check-3", 0);

    let cancel = CancellationToken::new();
    let result = f.service.execute_check("host-7", "check-3", &cancel).await;
    assert_eq!(result.status, CheckStatus::Error);

    // No path enumeration happened.
    assert_eq!(f.backend.call_count("host-7"), 0);
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn test_cluster_partial_failure_yields_result_per_host() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-a", iscsi_paths(2, 0))
        .failing_host("host-b", "connection reset by peer")
        .host_paths("host-c", iscsi_paths(2, 0))
        .build();
    let f = fixture_on(&dir, backend);

    let cluster = f.inventory.add_cluster("prod-cluster").unwrap();
    for host in ["host-a", "host-b", "host-c"] {
        seed_host(&f, host, Some(cluster.id.as_str()), ConnectionState::Connected);
    }
    seed_path_check(&f, "check-3", 0);

    let id = f
        .frontend
        .enqueue(
            CommandType::ExecuteClusterChecks,
            json!({ "cluster_id": cluster.id }),
        )
        .unwrap();
    f.dispatcher.run_cycle().await.unwrap();

    let row = f.frontend.get(&id).unwrap().unwrap();
    assert_eq!(row.status, CommandStatus::Completed);
    let result = row.result.unwrap();

    assert_eq!(result["total"], 3);
    assert_eq!(result["passed"], 2);
    assert_eq!(result["errors"], 1);

    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let by_host = |id: &str| {
        results
            .iter()
            .find(|r| r["host_id"] == id)
            .unwrap_or_else(|| panic!("missing result for {}", id))
    };
    assert_eq!(by_host("host-a")["status"], "passed");
    assert_eq!(by_host("host-b")["status"], "error");
    assert_eq!(by_host("host-c")["status"], "passed");
    assert!(by_host("host-b")["error_message"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
}

#[tokio::test]
async fn test_unknown_cluster_fails_the_command() {
    let dir = TempDir::new().unwrap();
    let f = fixture_on(&dir, SimulatedBackendBuilder::new().build());

    let id = f
        .frontend
        .enqueue(
            CommandType::ExecuteClusterChecks,
            json!({ "cluster_id": "ghost" }),
        )
        .unwrap();
    f.dispatcher.run_cycle().await.unwrap();

    let row = f.frontend.get(&id).unwrap().unwrap();
    assert_eq!(row.status, CommandStatus::Failed);
    assert!(row.error_message.unwrap().contains("unknown cluster"));
}

#[tokio::test]
async fn test_fallback_result_is_tagged() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(2, 0))
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);

    // Declared backend is the script client, which is not registered;
    // resolution degrades to the simulated stand-in.
    let def = CheckDefinition {
        id: "check-9".to_string(),
        category_id: "storage".to_string(),
        name: "iscsi-path-redundancy-script".to_string(),
        backend_kind: BackendKind::Script,
        kind: CheckKind::StoragePaths,
        default_severity: Severity::Critical,
        timeout_seconds: 30,
        is_enabled: true,
        parameters: json!({ "transport": "iscsi" }),
        thresholds: json!({ "max_dead_paths": 0 }),
    };
    f.checks.insert_definition(&def).unwrap();

    let cancel = CancellationToken::new();
    let result = f.service.execute_check("host-7", "check-9", &cancel).await;

    assert_eq!(result.status, CheckStatus::Passed);
    let details: serde_json::Value = serde_json::from_str(&result.details).unwrap();
    assert_eq!(details["authority"], "simulated");
    assert!(details["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w.as_str().unwrap().contains("simulated backend")));
}

#[tokio::test]
async fn test_zero_adapters_pass_is_flagged_in_details() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", Vec::new())
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);
    seed_path_check(&f, "check-3", 0);

    let cancel = CancellationToken::new();
    let result = f.service.execute_check("host-7", "check-3", &cancel).await;

    assert_eq!(result.status, CheckStatus::Passed);
    let details: serde_json::Value = serde_json::from_str(&result.details).unwrap();
    assert_eq!(details["adapter_count"], 0);
    assert!(details["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w.as_str().unwrap().contains("no adapters")));
}

#[tokio::test]
async fn test_timeout_yields_error_not_failed() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(2, 0))
        .slow_host("host-7", 1500)
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);

    let def = CheckDefinition {
        id: "check-tight".to_string(),
        category_id: "storage".to_string(),
        name: "iscsi-path-redundancy-tight".to_string(),
        backend_kind: BackendKind::Simulated,
        kind: CheckKind::StoragePaths,
        default_severity: Severity::Critical,
        timeout_seconds: 1,
        is_enabled: true,
        parameters: json!({ "transport": "iscsi" }),
        thresholds: json!({ "max_dead_paths": 0 }),
    };
    f.checks.insert_definition(&def).unwrap();

    let cancel = CancellationToken::new();
    let result = f
        .service
        .execute_check("host-7", "check-tight", &cancel)
        .await;

    assert_eq!(result.status, CheckStatus::Error);
    assert!(result.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_cancelled_execution_returns_well_formed_error() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_paths("host-7", iscsi_paths(2, 0))
        .slow_host("host-7", 5000)
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);
    seed_path_check(&f, "check-3", 0);

    let cancel = CancellationToken::new();
    let service = f.service.clone();
    let token = cancel.clone();
    let run = tokio::spawn(async move {
        service.execute_check("host-7", "check-3", &token).await
    });

    // Cancel while the backend is still mid-answer.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let result = run.await.unwrap();
    assert_eq!(result.status, CheckStatus::Error);
    assert_eq!(result.error_message.as_deref(), Some("cancelled"));

    // The attempt is still recorded, like any other outcome.
    let history = f.checks.results_for("host-7", "check-3").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CheckStatus::Error);
}

#[tokio::test]
async fn test_unknown_host_is_error_result_not_command_failure() {
    let dir = TempDir::new().unwrap();
    let f = fixture_on(&dir, SimulatedBackendBuilder::new().build());
    seed_path_check(&f, "check-3", 0);

    let id = f
        .frontend
        .enqueue(
            CommandType::ExecuteCheck,
            json!({ "host_id": "ghost", "check_definition_id": "check-3" }),
        )
        .unwrap();
    f.dispatcher.run_cycle().await.unwrap();

    let row = f.frontend.get(&id).unwrap().unwrap();
    assert_eq!(row.status, CommandStatus::Completed);
    let result = row.result.unwrap();
    assert_eq!(result["status"], "error");
    assert!(result["error_message"]
        .as_str()
        .unwrap()
        .contains("unknown host"));
}

#[tokio::test]
async fn test_metric_check_over_bound_fails() {
    let dir = TempDir::new().unwrap();
    let backend = SimulatedBackendBuilder::new()
        .host_metric("host-7", "datastore_usage_pct", 87.5)
        .build();
    let f = fixture_on(&dir, backend);
    seed_host(&f, "host-7", None, ConnectionState::Connected);

    let def = CheckDefinition {
        id: "check-ds".to_string(),
        category_id: "capacity".to_string(),
        name: "datastore-usage".to_string(),
        backend_kind: BackendKind::Simulated,
        kind: CheckKind::Metric,
        default_severity: Severity::Warning,
        timeout_seconds: 30,
        is_enabled: true,
        parameters: json!({ "metric": "datastore_usage_pct" }),
        thresholds: json!({ "max_value": 80.0 }),
    };
    f.checks.insert_definition(&def).unwrap();

    let cancel = CancellationToken::new();
    let result = f.service.execute_check("host-7", "check-ds", &cancel).await;

    assert_eq!(result.status, CheckStatus::Failed);
    assert!(result.error_message.unwrap().contains("exceeds"));
}
