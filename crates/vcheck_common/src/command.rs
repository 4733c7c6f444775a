//! Command rows: the persisted mailbox between front end and worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checks::BackendKind;

/// Lifecycle state of a command row.
///
/// Transitions only ever move forward: `Pending -> Processing ->
/// {Completed | Failed}`. The queue enforces this by refusing terminal
/// writes against rows that are not `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and Failed rows never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The command vocabulary the worker understands.
///
/// The dispatcher's routing table is the single source of truth for this
/// set; a tag it cannot parse becomes an explicit `Failed` outcome rather
/// than a silently dropped row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ExecuteCheck,
    ExecuteClusterChecks,
    ValidateBackendAvailability,
    GetServiceStatus,
    ReloadConfiguration,
    ConnectTarget,
    TestTargetConnection,
    TestTargetConnectionWithCredentials,
    AddTarget,
    EditTarget,
    DeleteTarget,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteCheck => "execute_check",
            Self::ExecuteClusterChecks => "execute_cluster_checks",
            Self::ValidateBackendAvailability => "validate_backend_availability",
            Self::GetServiceStatus => "get_service_status",
            Self::ReloadConfiguration => "reload_configuration",
            Self::ConnectTarget => "connect_target",
            Self::TestTargetConnection => "test_target_connection",
            Self::TestTargetConnectionWithCredentials => "test_target_connection_with_credentials",
            Self::AddTarget => "add_target",
            Self::EditTarget => "edit_target",
            Self::DeleteTarget => "delete_target",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execute_check" => Some(Self::ExecuteCheck),
            "execute_cluster_checks" => Some(Self::ExecuteClusterChecks),
            "validate_backend_availability" => Some(Self::ValidateBackendAvailability),
            "get_service_status" => Some(Self::GetServiceStatus),
            "reload_configuration" => Some(Self::ReloadConfiguration),
            "connect_target" => Some(Self::ConnectTarget),
            "test_target_connection" => Some(Self::TestTargetConnection),
            "test_target_connection_with_credentials" => {
                Some(Self::TestTargetConnectionWithCredentials)
            }
            "add_target" => Some(Self::AddTarget),
            "edit_target" => Some(Self::EditTarget),
            "delete_target" => Some(Self::DeleteTarget),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One persisted command.
///
/// `command_type` is kept as the raw string tag so rows written by newer or
/// older clients still round-trip; the dispatcher parses it at claim time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub command_type: String,
    pub parameters: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Parameters for `execute_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCheckParams {
    pub host_id: String,
    pub check_definition_id: String,
}

/// Parameters for `execute_cluster_checks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteClusterChecksParams {
    pub cluster_id: String,
}

/// Parameters for `validate_backend_availability`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateBackendParams {
    pub backend_kind: BackendKind,
}

/// Parameters for `connect_target` and `test_target_connection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRefParams {
    pub target_id: String,
}

/// Parameters for `test_target_connection_with_credentials`.
///
/// Nothing here is persisted; the worker connects once and throws the
/// session away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCredentialsParams {
    pub url: String,
    pub username: String,
    pub credential_ref: String,
    #[serde(default)]
    pub backend_kind: Option<BackendKind>,
}

/// Parameters for `add_target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTargetParams {
    pub name: String,
    pub url: String,
    pub username: String,
    pub credential_ref: String,
    #[serde(default)]
    pub backend_kind: Option<BackendKind>,
}

/// Parameters for `edit_target`. Absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditTargetParams {
    pub target_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential_ref: Option<String>,
}

/// Parameters for `delete_target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTargetParams {
    pub target_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_round_trip() {
        for ct in [
            CommandType::ExecuteCheck,
            CommandType::ExecuteClusterChecks,
            CommandType::ValidateBackendAvailability,
            CommandType::GetServiceStatus,
            CommandType::ReloadConfiguration,
            CommandType::ConnectTarget,
            CommandType::TestTargetConnection,
            CommandType::TestTargetConnectionWithCredentials,
            CommandType::AddTarget,
            CommandType::EditTarget,
            CommandType::DeleteTarget,
        ] {
            assert_eq!(CommandType::parse(ct.as_str()), Some(ct));
        }
    }

    #[test]
    fn test_command_type_rejects_unknown() {
        assert_eq!(CommandType::parse("no_such_command"), None);
        assert_eq!(CommandType::parse("ExecuteCheck"), None);
        assert_eq!(CommandType::parse(""), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Processing.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for st in [
            CommandStatus::Pending,
            CommandStatus::Processing,
            CommandStatus::Completed,
            CommandStatus::Failed,
        ] {
            assert_eq!(CommandStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(CommandStatus::parse("running"), None);
    }

    #[test]
    fn test_params_serialization() {
        let params = ExecuteCheckParams {
            host_id: "host-7".to_string(),
            check_definition_id: "check-3".to_string(),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["host_id"], "host-7");

        let back: ExecuteCheckParams = serde_json::from_value(json).unwrap();
        assert_eq!(back.check_definition_id, "check-3");
    }
}
