//! Fixture-driven execution backend.
//!
//! Serves two jobs: the registered fallback when no real backend can reach
//! a target, and the deterministic test double for everything above the
//! backend contract. Responses are pre-configured per host through the
//! builder; call counts are tracked for assertions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

use vcheck_common::checks::{BackendKind, CheckDefinition, CheckKind};
use vcheck_common::error::BackendError;
use vcheck_common::inventory::{Host, Target};
use vcheck_common::paths::PathObservation;

use super::{BackendSession, CheckPayload, Credentials, ExecutionBackend};

/// Pre-configured behavior for one host.
#[derive(Debug, Clone, Default)]
struct HostFixture {
    paths: Vec<PathObservation>,
    metrics: HashMap<String, f64>,
    /// Fail `run_check` with this transport error.
    failure: Option<String>,
    /// Delay before answering, for timeout tests.
    delay_ms: u64,
}

/// Simulated backend with canned per-host responses.
pub struct SimulatedBackend {
    available: bool,
    hosts: HashMap<String, HostFixture>,
    /// Target URLs whose `connect` is rejected.
    connect_failures: HashMap<String, String>,
    call_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl SimulatedBackend {
    /// Number of `run_check` calls made against one host.
    pub fn call_count(&self, host_id: &str) -> usize {
        self.call_counts
            .lock()
            .unwrap()
            .get(host_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.call_counts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn connect(
        &self,
        target: &Target,
        _credentials: &Credentials,
    ) -> Result<BackendSession, BackendError> {
        if let Some(message) = self.connect_failures.get(&target.url) {
            return Err(BackendError::Transport(message.clone()));
        }
        Ok(BackendSession::new(BackendKind::Simulated, &target.url))
    }

    async fn run_check(
        &self,
        _session: &BackendSession,
        host: &Host,
        definition: &CheckDefinition,
    ) -> Result<CheckPayload, BackendError> {
        {
            let mut counts = self.call_counts.lock().unwrap();
            *counts.entry(host.id.clone()).or_insert(0) += 1;
        }

        let fixture = self
            .hosts
            .get(&host.id)
            .ok_or_else(|| BackendError::Transport(format!("no data for host {}", host.id)))?;

        if fixture.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(fixture.delay_ms)).await;
        }
        if let Some(message) = &fixture.failure {
            return Err(BackendError::Transport(message.clone()));
        }

        match definition.kind {
            CheckKind::StoragePaths => Ok(CheckPayload::StoragePaths(fixture.paths.clone())),
            CheckKind::Metric => {
                let name = definition
                    .parameters
                    .get("metric")
                    .and_then(|m| m.as_str())
                    .ok_or_else(|| {
                        BackendError::Protocol("metric check without a 'metric' parameter".into())
                    })?;
                let value = fixture.metrics.get(name).copied().ok_or_else(|| {
                    BackendError::NotSupported(format!("metric '{}' not collected", name))
                })?;
                Ok(CheckPayload::Metric {
                    name: name.to_string(),
                    value,
                })
            }
        }
    }

    async fn disconnect(&self, _session: BackendSession) {}
}

/// Builder for [`SimulatedBackend`].
pub struct SimulatedBackendBuilder {
    available: bool,
    hosts: HashMap<String, HostFixture>,
    connect_failures: HashMap<String, String>,
}

impl SimulatedBackendBuilder {
    pub fn new() -> Self {
        Self {
            available: true,
            hosts: HashMap::new(),
            connect_failures: HashMap::new(),
        }
    }

    /// Canned path observations for a host.
    pub fn host_paths(mut self, host_id: &str, paths: Vec<PathObservation>) -> Self {
        self.hosts.entry(host_id.to_string()).or_default().paths = paths;
        self
    }

    /// Canned scalar metric for a host.
    pub fn host_metric(mut self, host_id: &str, name: &str, value: f64) -> Self {
        self.hosts
            .entry(host_id.to_string())
            .or_default()
            .metrics
            .insert(name.to_string(), value);
        self
    }

    /// Make every `run_check` against this host fail at the transport
    /// level.
    pub fn failing_host(mut self, host_id: &str, message: &str) -> Self {
        self.hosts.entry(host_id.to_string()).or_default().failure = Some(message.to_string());
        self
    }

    /// Delay answers from this host.
    pub fn slow_host(mut self, host_id: &str, delay_ms: u64) -> Self {
        self.hosts.entry(host_id.to_string()).or_default().delay_ms = delay_ms;
        self
    }

    /// Reject `connect` for a target URL.
    pub fn connect_failure(mut self, url: &str, message: &str) -> Self {
        self.connect_failures
            .insert(url.to_string(), message.to_string());
        self
    }

    /// Report the backend as unavailable to the registry.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn build(self) -> SimulatedBackend {
        SimulatedBackend {
            available: self.available,
            hosts: self.hosts,
            connect_failures: self.connect_failures,
            call_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for SimulatedBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vcheck_common::checks::Severity;
    use vcheck_common::inventory::ConnectionState;
    use vcheck_common::paths::PathState;

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            name: format!("esx-{}", id),
            cluster_id: None,
            target_id: Some("vc-1".to_string()),
            connection_state: ConnectionState::Connected,
            is_enabled: true,
        }
    }

    fn target(url: &str) -> Target {
        Target {
            id: "vc-1".to_string(),
            name: "prod-vc".to_string(),
            url: url.to_string(),
            username: "svc".to_string(),
            credential_ref: "cred-1".to_string(),
            backend_kind: BackendKind::Simulated,
            last_connected: None,
        }
    }

    fn paths_definition() -> CheckDefinition {
        CheckDefinition {
            id: "check-3".to_string(),
            category_id: "storage".to_string(),
            name: "iscsi-path-redundancy".to_string(),
            backend_kind: BackendKind::Simulated,
            kind: CheckKind::StoragePaths,
            default_severity: Severity::Critical,
            timeout_seconds: 30,
            is_enabled: true,
            parameters: json!({ "transport": "iscsi" }),
            thresholds: json!({ "max_dead_paths": 0 }),
        }
    }

    #[tokio::test]
    async fn test_canned_paths_round_trip() {
        let backend = SimulatedBackendBuilder::new()
            .host_paths(
                "host-7",
                vec![
                    PathObservation::new("vmhba64", "t1", 0, PathState::Active),
                    PathObservation::new("vmhba64", "t1", 1, PathState::Dead),
                ],
            )
            .build();

        let session = backend
            .connect(&target("https://vc.example"), &Credentials {
                username: "svc".into(),
                credential_ref: "cred-1".into(),
            })
            .await
            .unwrap();
        let payload = backend
            .run_check(&session, &host("host-7"), &paths_definition())
            .await
            .unwrap();

        match payload {
            CheckPayload::StoragePaths(obs) => assert_eq!(obs.len(), 2),
            _ => panic!("expected path payload"),
        }
        assert_eq!(backend.call_count("host-7"), 1);
    }

    #[tokio::test]
    async fn test_unknown_host_is_transport_error() {
        let backend = SimulatedBackendBuilder::new().build();
        let session = BackendSession::new(BackendKind::Simulated, "https://vc.example");
        let err = backend
            .run_check(&session, &host("ghost"), &paths_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let backend = SimulatedBackendBuilder::new()
            .connect_failure("https://down.example", "connection refused")
            .build();
        let err = backend
            .connect(&target("https://down.example"), &Credentials {
                username: "svc".into(),
                credential_ref: "cred-1".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_missing_metric_is_capability_gap() {
        let backend = SimulatedBackendBuilder::new()
            .host_metric("host-7", "datastore_usage_pct", 71.0)
            .build();
        let session = BackendSession::new(BackendKind::Simulated, "https://vc.example");

        let mut def = paths_definition();
        def.kind = CheckKind::Metric;
        def.parameters = json!({ "metric": "cpu_ready_pct" });

        let err = backend
            .run_check(&session, &host("host-7"), &def)
            .await
            .unwrap_err();
        assert!(err.is_capability_gap());
    }
}
