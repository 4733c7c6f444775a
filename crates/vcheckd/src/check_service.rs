//! Check execution: backend resolution, invocation, threshold verdicts.
//!
//! Every entry point returns well-formed [`CheckResult`]s: backend
//! trouble, timeouts, and cancellation all become `Error` verdicts and
//! never propagate as errors past this boundary. The verdict itself comes
//! from the threshold comparison, not from "the backend call succeeded".

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use vcheck_common::check_store::CheckStore;
use vcheck_common::checks::{CheckDefinition, CheckResult, CheckStatus};
use vcheck_common::error::BackendError;
use vcheck_common::inventory::{ConnectionState, Host, InventoryStore, Target};
use vcheck_common::paths;
use vcheck_common::thresholds::{self, Evaluation};

use crate::backends::{
    BackendRegistry, CheckPayload, Credentials, DataAuthority, ResolvedBackend,
};
use crate::config::SharedConfig;

/// Runs checks against hosts and records the attempts.
#[derive(Clone)]
pub struct CheckExecutionService {
    registry: Arc<BackendRegistry>,
    inventory: InventoryStore,
    checks: CheckStore,
    /// Cluster-wide cap on hosts in flight.
    cluster_gate: Arc<Semaphore>,
    /// Per-host cap on concurrent checks, so a batch cannot overload one
    /// hypervisor.
    host_gates: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    max_checks_per_host: usize,
}

impl CheckExecutionService {
    pub fn new(
        registry: Arc<BackendRegistry>,
        inventory: InventoryStore,
        checks: CheckStore,
        config: &SharedConfig,
    ) -> Self {
        let (max_hosts, max_per_host) = {
            let cfg = config.read().unwrap();
            (cfg.max_concurrent_hosts, cfg.max_checks_per_host)
        };
        Self {
            registry,
            inventory,
            checks,
            cluster_gate: Arc::new(Semaphore::new(max_hosts.max(1))),
            host_gates: Arc::new(Mutex::new(HashMap::new())),
            max_checks_per_host: max_per_host.max(1),
        }
    }

    /// Run one check against one host.
    pub async fn execute_check(
        &self,
        host_id: &str,
        check_definition_id: &str,
        cancel: &CancellationToken,
    ) -> CheckResult {
        let definition = match self.checks.get_definition(check_definition_id) {
            Ok(Some(def)) => def,
            Ok(None) => {
                return self.finish(CheckResult::error(
                    check_definition_id,
                    host_id,
                    format!("unknown check definition {}", check_definition_id),
                ))
            }
            Err(e) => {
                return self.finish(CheckResult::error(
                    check_definition_id,
                    host_id,
                    format!("failed to load check definition: {:#}", e),
                ))
            }
        };
        let host = match self.inventory.get_host(host_id) {
            Ok(Some(host)) => host,
            Ok(None) => {
                return self.finish(CheckResult::error(
                    check_definition_id,
                    host_id,
                    format!("unknown host {}", host_id),
                ))
            }
            Err(e) => {
                return self.finish(CheckResult::error(
                    check_definition_id,
                    host_id,
                    format!("failed to load host: {:#}", e),
                ))
            }
        };

        self.run_for_host(&host, &definition, cancel).await
    }

    /// Run every enabled check against every enabled host of a cluster.
    ///
    /// Partial success is the expected outcome: one host failing becomes
    /// an `Error` result for that host and never aborts the others.
    pub async fn execute_cluster_checks(
        &self,
        cluster_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let hosts = match self.inventory.enabled_hosts_in_cluster(cluster_id) {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Failed to list hosts of cluster {}: {:#}", cluster_id, e);
                return Vec::new();
            }
        };
        let definitions = match self.checks.list_enabled_definitions() {
            Ok(defs) => defs,
            Err(e) => {
                error!("Failed to list check definitions: {:#}", e);
                return Vec::new();
            }
        };
        debug!(
            "Cluster {}: {} hosts x {} checks",
            cluster_id,
            hosts.len(),
            definitions.len()
        );

        let mut host_tasks = JoinSet::new();
        for host in hosts {
            let service = self.clone();
            let definitions = definitions.clone();
            let cancel = cancel.clone();
            let gate = self.cluster_gate.clone();
            host_tasks.spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                let mut check_tasks = JoinSet::new();
                for definition in definitions {
                    let service = service.clone();
                    let host = host.clone();
                    let cancel = cancel.clone();
                    check_tasks.spawn(async move {
                        service.run_for_host(&host, &definition, &cancel).await
                    });
                }
                let mut results = Vec::new();
                while let Some(joined) = check_tasks.join_next().await {
                    match joined {
                        Ok(result) => results.push(result),
                        Err(e) => error!("check task aborted: {}", e),
                    }
                }
                results
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = host_tasks.join_next().await {
            match joined {
                Ok(results) => all.extend(results),
                Err(e) => error!("host task aborted: {}", e),
            }
        }
        all
    }

    /// The single-attempt core: resolve, invoke under timeout, evaluate,
    /// persist.
    pub async fn run_for_host(
        &self,
        host: &Host,
        definition: &CheckDefinition,
        cancel: &CancellationToken,
    ) -> CheckResult {
        if !definition.is_enabled {
            return self.finish(CheckResult::skipped(
                &definition.id,
                &host.id,
                "check is disabled",
            ));
        }

        // A host we cannot reach has no meaningful path or metric state;
        // don't even resolve a backend for it.
        if host.connection_state != ConnectionState::Connected {
            return self.finish(CheckResult::error(
                &definition.id,
                &host.id,
                format!(
                    "host {} is {}; check cannot run",
                    host.name,
                    host.connection_state.as_str()
                ),
            ));
        }

        let Some(resolved) = self.registry.resolve(definition.backend_kind) else {
            return self.finish(CheckResult::error(
                &definition.id,
                &host.id,
                format!(
                    "no execution backend available for '{}'",
                    definition.backend_kind
                ),
            ));
        };

        let target = match self.target_for(host) {
            Ok(target) => target,
            Err(message) => {
                return self.finish(CheckResult::error(&definition.id, &host.id, message))
            }
        };

        let gate = self.host_gate(&host.id);
        let _permit = match gate.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.finish(CheckResult::error(
                    &definition.id,
                    &host.id,
                    "worker is shutting down",
                ))
            }
        };

        let executed_at = Utc::now();
        let started = Instant::now();
        let window = Duration::from_secs(definition.timeout_seconds.max(1));

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            invoked = timeout(window, self.invoke(&resolved, &target, host, definition)) => {
                match invoked {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(definition.timeout_seconds)),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(payload) => {
                self.evaluate(host, definition, &resolved, payload, executed_at, duration_ms)
            }
            Err(e) => CheckResult {
                id: uuid::Uuid::new_v4().to_string(),
                check_definition_id: definition.id.clone(),
                host_id: host.id.clone(),
                status: CheckStatus::Error,
                output: String::new(),
                details: json!({
                    "authority": resolved.authority,
                    "backend": resolved.backend.kind(),
                })
                .to_string(),
                error_message: Some(e.to_string()),
                executed_at,
                duration_ms,
            },
        };
        self.finish(result)
    }

    /// Connect, run, disconnect. The session handle never outlives the
    /// attempt.
    async fn invoke(
        &self,
        resolved: &ResolvedBackend,
        target: &Target,
        host: &Host,
        definition: &CheckDefinition,
    ) -> Result<CheckPayload, BackendError> {
        let credentials = Credentials::for_target(target);
        let session = resolved.backend.connect(target, &credentials).await?;
        let payload = resolved.backend.run_check(&session, host, definition).await;
        resolved.backend.disconnect(session).await;
        payload
    }

    /// Fold a raw payload through the definition's thresholds.
    fn evaluate(
        &self,
        host: &Host,
        definition: &CheckDefinition,
        resolved: &ResolvedBackend,
        payload: CheckPayload,
        executed_at: chrono::DateTime<Utc>,
        duration_ms: u64,
    ) -> CheckResult {
        let (evaluation, output, mut details) = match payload {
            CheckPayload::StoragePaths(observations) => {
                let counts = paths::aggregate(&observations);
                let evaluation = paths::evaluate(&counts, &definition.thresholds);
                let output = paths::detail_lines(&observations);
                let details = json!({
                    "adapter_count": counts.adapter_count,
                    "total": counts.total,
                    "active": counts.active,
                    "dead": counts.dead,
                    "standby": counts.standby,
                    "disabled": counts.disabled,
                    "unknown": counts.unknown,
                });
                (evaluation, output, details)
            }
            CheckPayload::Metric { name, value } => {
                let evaluation = thresholds::evaluate_metric(&name, value, &definition.thresholds);
                let output = evaluation.summary.clone();
                let details = json!({ "metric": name, "value": value });
                (evaluation, output, details)
            }
        };

        let Evaluation {
            status,
            summary,
            mut warnings,
        } = evaluation;

        // A degraded resolution must be visible in the persisted record,
        // not just in worker logs.
        if resolved.authority != DataAuthority::Authoritative {
            warnings.push(format!(
                "result produced by {} backend, not the declared '{}'",
                resolved.authority.as_str(),
                definition.backend_kind
            ));
        }

        details["authority"] = json!(resolved.authority);
        details["backend"] = json!(resolved.backend.kind());
        details["warnings"] = json!(warnings);

        CheckResult {
            id: uuid::Uuid::new_v4().to_string(),
            check_definition_id: definition.id.clone(),
            host_id: host.id.clone(),
            status,
            output,
            details: details.to_string(),
            error_message: match status {
                CheckStatus::Failed => Some(summary),
                _ => None,
            },
            executed_at,
            duration_ms,
        }
    }

    fn target_for(&self, host: &Host) -> Result<Target, String> {
        let Some(target_id) = &host.target_id else {
            return Err(format!("host {} has no managed endpoint", host.name));
        };
        match self.inventory.get_target(target_id) {
            Ok(Some(target)) => Ok(target),
            Ok(None) => Err(format!("host {} references unknown target {}", host.name, target_id)),
            Err(e) => Err(format!("failed to load target: {:#}", e)),
        }
    }

    fn host_gate(&self, host_id: &str) -> Arc<Semaphore> {
        let mut gates = self.host_gates.lock().unwrap();
        gates
            .entry(host_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_checks_per_host)))
            .clone()
    }

    /// Persist the attempt. A storage hiccup is logged, never raised; the
    /// caller still gets the result.
    fn finish(&self, result: CheckResult) -> CheckResult {
        if let Err(e) = self.checks.record_result(&result) {
            warn!(
                "Failed to record result for check {} on host {}: {:#}",
                result.check_definition_id, result.host_id, e
            );
        }
        result
    }
}
