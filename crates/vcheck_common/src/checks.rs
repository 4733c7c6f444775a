//! Check catalog and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which execution backend a check definition declares as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Shell-script driven (esxcli over SSH and friends).
    Script,
    /// vCenter REST API.
    RestApi,
    /// SDK object-model traversal.
    ObjectModel,
    /// Fixture-driven stand-in; also the registered fallback of last resort.
    Simulated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::RestApi => "rest_api",
            Self::ObjectModel => "object_model",
            Self::Simulated => "simulated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "script" => Some(Self::Script),
            "rest_api" => Some(Self::RestApi),
            "object_model" => Some(Self::ObjectModel),
            "simulated" => Some(Self::Simulated),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check family: decides how the raw backend payload is aggregated and
/// which threshold schema applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Redundant storage path counting (iSCSI, FC).
    StoragePaths,
    /// A single scalar compared against an upper bound.
    Metric,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoragePaths => "storage_paths",
            Self::Metric => "metric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "storage_paths" => Some(Self::StoragePaths),
            "metric" => Some(Self::Metric),
            _ => None,
        }
    }
}

/// Default severity attached to a failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Verdict of one check execution.
///
/// `Failed` means the check ran and found a problem; `Error` means the
/// check could not run (unreachable host, timeout, cancellation). Dashboards
/// treat the two very differently, so the distinction is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entry describing one check.
///
/// Created and edited by configuration workflows; execution only ever reads
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: String,
    pub category_id: String,
    /// Unique within its category.
    pub name: String,
    pub backend_kind: BackendKind,
    pub kind: CheckKind,
    pub default_severity: Severity,
    pub timeout_seconds: u64,
    pub is_enabled: bool,
    pub parameters: serde_json::Value,
    pub thresholds: serde_json::Value,
}

/// Immutable record of one execution attempt of one check against one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub check_definition_id: String,
    pub host_id: String,
    pub status: CheckStatus,
    /// Human-readable diagnosis lines.
    pub output: String,
    /// Structured payload (JSON text) consumed by dashboards.
    pub details: String,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CheckResult {
    /// A result for an attempt that could not run at all.
    pub fn error(check_definition_id: &str, host_id: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            check_definition_id: check_definition_id.to_string(),
            host_id: host_id.to_string(),
            status: CheckStatus::Error,
            output: String::new(),
            details: "{}".to_string(),
            error_message: Some(message),
            executed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A result for a definition that is disabled for this host.
    pub fn skipped(check_definition_id: &str, host_id: &str, reason: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            check_definition_id: check_definition_id.to_string(),
            host_id: host_id.to_string(),
            status: CheckStatus::Skipped,
            output: String::new(),
            details: "{}".to_string(),
            error_message: Some(reason.to_string()),
            executed_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip() {
        for kind in [
            BackendKind::Script,
            BackendKind::RestApi,
            BackendKind::ObjectModel,
            BackendKind::Simulated,
        ] {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::parse("powershell"), None);
    }

    #[test]
    fn test_check_status_wire_format() {
        let json = serde_json::to_string(&CheckStatus::Passed).unwrap();
        assert_eq!(json, "\"passed\"");
        let back: CheckStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, CheckStatus::Error);
    }

    #[test]
    fn test_error_result_shape() {
        let r = CheckResult::error("check-3", "host-7", "host not connected");
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.duration_ms, 0);
        assert_eq!(r.error_message.as_deref(), Some("host not connected"));
    }
}
